// Concurrent writers against the in-memory stores

use futures::future::join_all;
use ledgerline_shared::{AlertSeverity, AlertStatus, ApprovalStatus};
use std::sync::Arc;
use uuid::Uuid;

use crate::alerts::{AlertEngine, MemoryAlertStore};
use crate::approvals::{ApprovalService, Decision, MemoryApprovalStore};
use crate::auth::{AdminPolicy, Principal};
use crate::error::{AutomationError, ConflictKind};
use crate::tests::fixtures::{alert_for_role, approval_for};
use crate::tests::helpers::init_test_logging;

fn approval_service() -> Arc<ApprovalService> {
    Arc::new(ApprovalService::new(
        Arc::new(MemoryApprovalStore::new()),
        AdminPolicy::default(),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_decisions_resolve_exactly_once() {
    init_test_logging();
    let service = approval_service();
    let approvers: Vec<Uuid> = (0..12).map(|_| Uuid::new_v4()).collect();
    let request = service.create(approval_for(approvers.clone(), None)).await.unwrap();

    let attempts = approvers.iter().enumerate().map(|(i, approver)| {
        let service = service.clone();
        let principal = Principal::new(*approver, vec![]);
        let decision = if i % 2 == 0 { Decision::Approved } else { Decision::Rejected };
        tokio::spawn(async move {
            service
                .resolve_as(request.id, &principal, decision, None)
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);

    let final_state = service.get(request.id).await.unwrap();
    assert_eq!(final_state.status, winners[0].status);
    assert_eq!(final_state.resolved_by, winners[0].resolved_by);

    for loser in results.iter().filter_map(|r| r.as_ref().err()) {
        match loser {
            AutomationError::Conflict(ConflictKind::AlreadyResolved { status }) => {
                assert_eq!(*status, final_state.status);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_racing_decision_yields_one_outcome() {
    init_test_logging();
    let service = approval_service();
    let approver = Uuid::new_v4();

    for _ in 0..20 {
        let request = service.create(approval_for(vec![approver], None)).await.unwrap();

        let decide = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .resolve(request.id, approver, Decision::Approved, None)
                    .await
            })
        };
        let expire = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .expire(request.id, ApprovalStatus::TimedOut, None)
                    .await
            })
        };

        let (decided, expired) = (decide.await.unwrap(), expire.await.unwrap());
        assert!(decided.is_ok() ^ expired.is_ok());

        let status = service.get(request.id).await.unwrap().status;
        if decided.is_ok() {
            assert_eq!(status, ApprovalStatus::Approved);
        } else {
            assert_eq!(status, ApprovalStatus::TimedOut);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_user_acknowledges_once() {
    init_test_logging();
    let engine = Arc::new(AlertEngine::new(Arc::new(MemoryAlertStore::new())));
    let alert = engine
        .create(alert_for_role("warehouse", AlertSeverity::Error))
        .await
        .unwrap();
    let clerk = Principal::new(Uuid::new_v4(), vec!["warehouse".to_string()]);

    let attempts = (0..10).map(|i| {
        let engine = engine.clone();
        let clerk = clerk.clone();
        tokio::spawn(async move {
            engine
                .acknowledge(alert.id, &clerk, Some(format!("attempt {i}")))
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
        e,
        AutomationError::Conflict(ConflictKind::AlreadyAcknowledged)
    )));

    let acks = engine.acknowledgments(alert.id, &clerk).await.unwrap();
    assert_eq!(acks.len(), 1);
    assert_eq!(engine.get(alert.id, &clerk).await.unwrap().status, AlertStatus::Acknowledged);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_acknowledge_all_from_many_users() {
    init_test_logging();
    let engine = Arc::new(AlertEngine::new(Arc::new(MemoryAlertStore::new())));
    for _ in 0..5 {
        engine
            .create(alert_for_role("warehouse", AlertSeverity::Warning).keep_related())
            .await
            .unwrap();
    }

    let clerks: Vec<Principal> = (0..6)
        .map(|_| Principal::new(Uuid::new_v4(), vec!["warehouse".to_string()]))
        .collect();
    let runs = clerks.iter().cloned().map(|clerk| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.acknowledge_all(&clerk, None).await })
    });
    let outcomes: Vec<_> = join_all(runs)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    // Each alert flips from active exactly once, whoever got there first
    let flipped: u64 = outcomes.iter().map(|o| o.updated).sum();
    assert_eq!(flipped, 5);
    for outcome in &outcomes {
        assert_eq!(outcome.acted + outcome.skipped, outcome.requested);
    }

    let summary = engine.count_mine_by_severity(&clerks[0]).await.unwrap();
    assert_eq!(summary.total, 0);
}
