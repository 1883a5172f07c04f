// Rule runs through the executor with every collaborator in memory

use ledgerline_shared::{AlertSeverity, ApprovalStatus};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use crate::alerts::AlertFilter;
use crate::approvals::{ApprovalFilter, Decision};
use crate::auth::Principal;
use crate::pagination::PaginationParams;
use crate::tests::fixtures::{ProductFixture, PurchaseOrderFixture};
use crate::tests::helpers::TestApp;
use crate::workflows::actions::presets;
use crate::workflows::whitelist;
use crate::workflows::Action;

#[tokio::test]
async fn test_low_stock_rule_updates_product_and_alerts_role() {
    let app = TestApp::new();
    let product = ProductFixture::default();
    app.entities
        .seed(whitelist::table("products").unwrap(), vec![product.row()])
        .await;

    let mut ctx = product.stock_change(40, 3);
    let result = app
        .state
        .executor
        .execute_rule(&presets::low_stock_alert(), &mut ctx)
        .await;

    assert!(result.success, "{:?}", result.outputs);
    assert_eq!(result.actions_executed, 2);
    assert!(!result.halted);

    let rows = app.entities.rows(whitelist::table("products").unwrap()).await;
    assert_eq!(rows[0]["status"], "low_stock");

    let manager = Principal::new(Uuid::new_v4(), vec!["inventory_manager".to_string()]);
    let (alerts, total) = app
        .state
        .alerts
        .list(&manager, &AlertFilter::default(), &PaginationParams::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    assert_eq!(alerts[0].title, format!("Stock for {} is down to 3", product.sku));
    assert_eq!(alerts[0].source_entity_id.as_deref(), Some(product.id.to_string().as_str()));

    let outsider = Principal::new(Uuid::new_v4(), vec!["buyer".to_string()]);
    let (hidden, _) = app
        .state
        .alerts
        .list(&outsider, &AlertFilter::default(), &PaginationParams::default())
        .await
        .unwrap();
    assert!(hidden.is_empty());
}

#[tokio::test]
async fn test_repeated_low_stock_supersedes_previous_alert() {
    let app = TestApp::new();
    let product = ProductFixture::default();
    app.entities
        .seed(whitelist::table("products").unwrap(), vec![product.row()])
        .await;

    for level in [4, 2] {
        let mut ctx = product.stock_change(10, level);
        app.state
            .executor
            .execute_rule(&presets::low_stock_alert(), &mut ctx)
            .await;
    }

    let manager = Principal::new(Uuid::new_v4(), vec!["inventory_manager".to_string()]);
    let summary = app.state.alerts.count_mine_by_severity(&manager).await.unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.counts[&AlertSeverity::Warning], 1);
}

#[tokio::test]
async fn test_purchase_order_rule_suspends_on_approval() {
    let app = TestApp::new();
    let po = PurchaseOrderFixture::default();
    app.entities
        .seed(whitelist::table("purchase_orders").unwrap(), vec![po.row()])
        .await;

    let approver = Uuid::new_v4();
    let mut actions = presets::purchase_order_approval(&[approver]);
    actions.push(Action::update_field("purchase_orders", "status", json!("sent")));

    let mut ctx = po.created().with_resume_token("engine:activity/77");
    let result = app.state.executor.execute_rule(&actions, &mut ctx).await;

    assert!(result.success);
    assert_eq!(result.actions_executed, 2);
    assert!(result.halted);
    assert_eq!(result.suspended_at.as_deref(), Some("Seek Approval"));

    let rows = app
        .entities
        .rows(whitelist::table("purchase_orders").unwrap())
        .await;
    assert_eq!(rows[0]["status"], "pending_approval");

    let filter = ApprovalFilter {
        execution_id: Some(ctx.execution_id),
        ..ApprovalFilter::default()
    };
    let (requests, total) = app
        .state
        .approvals
        .list(&filter, &PaginationParams::default())
        .await
        .unwrap();
    assert_eq!(total, 1);
    let request = &requests[0];
    assert_eq!(request.action_name, "Seek Approval");
    assert_eq!(request.resume_token.as_deref(), Some("engine:activity/77"));
    assert_eq!(
        request.message.as_deref(),
        Some(format!("Purchase order {} totals {}", po.po_number, po.total_amount).as_str())
    );

    let principal = Principal::new(approver, vec![]);
    let resolved = assert_ok!(
        app.state
            .approvals
            .resolve_as(request.id, &principal, Decision::Approved, None)
            .await
    );
    assert_eq!(resolved.status, ApprovalStatus::Approved);
    assert_err!(
        app.state
            .approvals
            .resolve_as(request.id, &principal, Decision::Rejected, None)
            .await
    );
}

#[tokio::test]
async fn test_invalid_transition_takes_branch_and_continues() {
    let app = TestApp::new();
    let po = PurchaseOrderFixture {
        status: "cancelled".to_string(),
        ..PurchaseOrderFixture::default()
    };
    app.entities
        .seed(whitelist::table("purchase_orders").unwrap(), vec![po.row()])
        .await;

    let mut ctx = po.created();
    let result = app
        .state
        .executor
        .execute_rule(&presets::purchase_order_approval(&[Uuid::new_v4()]), &mut ctx)
        .await;

    // invalid_transition is a branch, not a failure, so the rule carries on
    assert_eq!(
        result.outputs[0].result.port(),
        Some("invalid_transition")
    );
    assert_eq!(result.suspended_at.as_deref(), Some("Seek Approval"));
}

#[tokio::test]
async fn test_lookup_output_feeds_later_action() {
    let app = TestApp::new();
    app.entities
        .seed(
            whitelist::table("suppliers").unwrap(),
            vec![json!({
                "id": Uuid::new_v4().to_string(),
                "code": "ACME",
                "name": "Acme Components",
                "email": "orders@acme.test",
                "status": "active"
            })],
        )
        .await;

    let buyer = Uuid::new_v4();
    let actions = vec![
        Action::lookup_entity(
            "supplier",
            "suppliers",
            json!([{"field": "code", "operator": "equals", "value": "{{entity.supplier_code}}"}]),
        )
        .stop_on_failure(),
        Action::send_notification(
            "{{context.user_id}}",
            "Reorder from {{actions.supplier.name}}",
            "Contact {{actions.supplier.email}}",
        ),
    ];

    let mut ctx = crate::workflows::ExecutionContext::new("products", "p-1", "updated")
        .with_entity(json!({"supplier_code": "ACME"}))
        .with_user(buyer);
    let result = app.state.executor.execute_rule(&actions, &mut ctx).await;

    assert!(result.success, "{:?}", result.outputs);
    assert_eq!(result.outputs[0].result.port(), Some("found"));
    assert!(result.outputs[1].result.template_errors.is_empty());

    let inbox = app.notifications.for_user(buyer).await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].title, "Reorder from Acme Components");
    assert_eq!(inbox[0].message, "Contact orders@acme.test");
}

#[tokio::test]
async fn test_unresolved_reference_is_reported_not_fatal() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let actions = vec![Action::send_notification(
        &user.to_string(),
        "Order {{entity.order_number}}",
        "Priority {{entity.priority}}",
    )];

    let mut ctx = crate::workflows::ExecutionContext::new("orders", "o-9", "updated")
        .with_entity(json!({"order_number": "SO-9"}));
    let result = app.state.executor.execute_rule(&actions, &mut ctx).await;

    assert!(result.success);
    let errors = &result.outputs[0].result.template_errors;
    assert_eq!(errors.len(), 1);

    let inbox = app.notifications.for_user(user).await;
    assert_eq!(inbox[0].title, "Order SO-9");
    assert_eq!(inbox[0].message, "Priority {{entity.priority}}");
}
