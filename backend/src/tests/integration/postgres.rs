// Postgres-backed stores. Skipped unless TEST_DATABASE_URL is set.

use futures::future::join_all;
use ledgerline_shared::{AlertSeverity, AlertStatus, ApprovalStatus};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::alerts::{AlertEngine, AlertFilter, PgAlertStore};
use crate::approvals::{ApprovalService, Decision, PgApprovalStore};
use crate::auth::{AdminPolicy, PgRoleDirectory, Principal, RoleDirectory};
use crate::error::{AutomationError, ConflictKind, StoreError};
use crate::pagination::PaginationParams;
use crate::tests::fixtures::{alert_for_role, approval_for};
use crate::tests::helpers::init_test_logging;
use crate::tests::TestContext;
use crate::workflows::conditions::{ConditionOperator, FieldCondition};
use crate::workflows::{whitelist, EntityStore, PgEntityStore};

macro_rules! require_db {
    () => {
        match TestContext::from_env().await {
            Some(ctx) => ctx,
            None => {
                eprintln!("TEST_DATABASE_URL not set; skipping");
                return;
            }
        }
    };
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_guarded_resolution_under_contention() {
    init_test_logging();
    let ctx = require_db!();
    let service = Arc::new(ApprovalService::new(
        Arc::new(PgApprovalStore::new(ctx.db_pool.clone())),
        AdminPolicy::default(),
    ));

    let approvers: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
    let request = service.create(approval_for(approvers.clone(), None)).await.unwrap();

    let attempts = approvers.into_iter().map(|approver| {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .resolve(request.id, approver, Decision::Approved, None)
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
        AutomationError::Conflict(ConflictKind::AlreadyResolved {
            status: ApprovalStatus::Approved
        })
    )));

    let stored = service.get(request.id).await.unwrap();
    assert_eq!(stored.status, ApprovalStatus::Approved);
    assert!(stored.resolved_at.is_some());
}

#[tokio::test]
async fn test_pg_alert_visibility_and_acknowledgment() {
    init_test_logging();
    let ctx = require_db!();
    let engine = AlertEngine::new(Arc::new(PgAlertStore::new(ctx.db_pool.clone())));

    // Unique role name keeps concurrent test runs apart
    let role = format!("warehouse-{}", Uuid::new_v4());
    let alert = engine
        .create(alert_for_role(&role, AlertSeverity::Critical))
        .await
        .unwrap();

    let clerk = Principal::new(Uuid::new_v4(), vec![role.clone()]);
    let stranger = Principal::new(Uuid::new_v4(), vec!["buyer".to_string()]);

    let (mine, total) = engine
        .list(&clerk, &AlertFilter::default(), &PaginationParams::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(mine[0].id, alert.id);
    assert!(engine.get(alert.id, &stranger).await.is_err());

    let acked = engine.acknowledge(alert.id, &clerk, None).await.unwrap();
    assert_eq!(acked.status, AlertStatus::Acknowledged);
    assert!(matches!(
        engine.acknowledge(alert.id, &clerk, None).await,
        Err(AutomationError::Conflict(ConflictKind::AlreadyAcknowledged))
    ));

    let outcome = engine
        .dismiss_selected(&[alert.id, Uuid::new_v4()], &clerk)
        .await
        .unwrap();
    assert_eq!((outcome.acted, outcome.skipped, outcome.updated), (1, 1, 1));
}

#[tokio::test]
async fn test_pg_supersession_resolves_previous_alert() {
    init_test_logging();
    let ctx = require_db!();
    let engine = AlertEngine::new(Arc::new(PgAlertStore::new(ctx.db_pool.clone())));
    let role = format!("buyers-{}", Uuid::new_v4());

    let first = engine
        .create(alert_for_role(&role, AlertSeverity::Warning).source("products", "p-dup"))
        .await
        .unwrap();
    let second = engine
        .create(alert_for_role(&role, AlertSeverity::Warning).source("products", "p-dup"))
        .await
        .unwrap();

    let viewer = Principal::new(Uuid::new_v4(), vec![role]);
    assert_eq!(engine.get(first.id, &viewer).await.unwrap().status, AlertStatus::Resolved);
    assert_eq!(engine.get(second.id, &viewer).await.unwrap().status, AlertStatus::Active);
}

#[tokio::test]
async fn test_pg_resolve_related_spares_excluded_alert() {
    init_test_logging();
    let ctx = require_db!();
    let engine = AlertEngine::new(Arc::new(PgAlertStore::new(ctx.db_pool.clone())));
    let role = format!("stock-{}", Uuid::new_v4());
    let entity = format!("P2-{}", Uuid::new_v4());

    let mut ids = Vec::new();
    for _ in 0..3 {
        let alert = engine
            .create(
                alert_for_role(&role, AlertSeverity::Warning)
                    .source("products", &entity)
                    .keep_related(),
            )
            .await
            .unwrap();
        ids.push(alert.id);
    }
    let survivor = ids[2];

    let resolved = engine
        .resolve_related_alerts(&entity, "low_stock", Some(survivor))
        .await
        .unwrap();
    assert_eq!(resolved, 2);

    let viewer = Principal::new(Uuid::new_v4(), vec![role]);
    assert_eq!(engine.get(ids[0], &viewer).await.unwrap().status, AlertStatus::Resolved);
    assert_eq!(engine.get(ids[1], &viewer).await.unwrap().status, AlertStatus::Resolved);
    assert_eq!(engine.get(survivor, &viewer).await.unwrap().status, AlertStatus::Active);

    assert_eq!(engine.resolve_related_alerts("", "low_stock", None).await.unwrap(), 0);
    assert_eq!(engine.resolve_related_alerts(&entity, "", None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_pg_entity_store_round_trip() {
    init_test_logging();
    let ctx = require_db!();
    let store = PgEntityStore::new(ctx.db_pool.clone());
    let products = whitelist::table("products").unwrap();
    let sku = format!("SKU-{}", Uuid::new_v4());

    let mut fields = BTreeMap::new();
    fields.insert("sku".to_string(), json!(sku));
    fields.insert("name".to_string(), json!("Blue Widget"));
    fields.insert("reorder_level".to_string(), json!("10"));
    let inserted = store.insert(products, &fields).await.unwrap();
    assert_eq!(inserted["reorder_level"], 10);

    let by_sku = vec![FieldCondition::new("sku", ConditionOperator::Equals, json!(sku))];
    let mut assignments = BTreeMap::new();
    assignments.insert("status".to_string(), json!("low_stock"));
    assert_eq!(store.update(products, &assignments, &by_sku).await.unwrap(), 1);

    let rows = store.select(products, &by_sku, 2).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "low_stock");

    let duplicate = store.insert(products, &fields).await;
    assert!(matches!(duplicate, Err(StoreError::UniqueViolation(_))));

    let shipments = whitelist::table("shipments").unwrap();
    let mut shipment = BTreeMap::new();
    shipment.insert("carrier".to_string(), json!("DHL"));
    let row = store.insert(shipments, &shipment).await.unwrap();
    assert!(row["id"].as_i64().is_some());
}

#[tokio::test]
async fn test_pg_role_directory_reads_live_assignments() {
    init_test_logging();
    let ctx = require_db!();
    let directory = PgRoleDirectory::new(ctx.db_pool.clone());
    let user = Uuid::new_v4();
    let role = format!("auditor-{}", Uuid::new_v4());

    let role_id: Uuid = sqlx::query_scalar("INSERT INTO roles (name) VALUES ($1) RETURNING id")
        .bind(&role)
        .fetch_one(&ctx.db_pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
        .bind(user)
        .bind(role_id)
        .execute(&ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(directory.roles_for(user).await.unwrap(), vec![role]);

    sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
        .bind(user)
        .execute(&ctx.db_pool)
        .await
        .unwrap();
    assert!(directory.roles_for(user).await.unwrap().is_empty());
}
