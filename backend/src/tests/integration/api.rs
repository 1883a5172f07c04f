// HTTP surface, driven through the router with `oneshot`

use axum::http::{Method, StatusCode};
use ledgerline_shared::AlertSeverity;
use serde_json::json;
use uuid::Uuid;

use crate::tests::fixtures::{alert_for_role, alert_for_user, approval_for};
use crate::tests::helpers::TestApp;

#[tokio::test]
async fn test_health_reports_memory_backend() {
    let app = TestApp::new();
    let (status, body) = app.request(Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"], "memory");
    assert_eq!(body["action_types"], 9);
}

#[tokio::test]
async fn test_requests_without_valid_token_rejected() {
    let app = TestApp::new();

    let (status, body) = app
        .request(Method::GET, "/api/v1/alerts", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let forged = crate::auth::jwt::create_jwt(Uuid::new_v4(), "not-the-secret", chrono::Duration::hours(1))
        .unwrap()
        .token;
    let request = axum::http::Request::builder()
        .uri("/api/v1/approvals")
        .header("authorization", format!("Bearer {}", forged))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.router(), request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_approval_resolution_flow() {
    let app = TestApp::new();
    let approver = Uuid::new_v4();
    let outsider = Uuid::new_v4();
    let request = app
        .state
        .approvals
        .create(approval_for(vec![approver], Some("secret-resume-token")))
        .await
        .unwrap();
    let uri = format!("/api/v1/approvals/{}", request.id);

    let (status, listed) = app.get("/api/v1/approvals?status=pending", approver).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["meta"]["total"], 1);
    assert!(listed["data"][0].get("resume_token").is_none());

    let (_, hidden) = app.get("/api/v1/approvals", outsider).await;
    assert_eq!(hidden["meta"]["total"], 0);

    let (status, _) = app.get(&uri, outsider).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .post(&format!("{}/resolve", uri), outsider, json!({"decision": "approved"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, body) = app
        .post(
            &format!("{}/resolve", uri),
            approver,
            json!({"decision": "rejected", "reason": "Supplier on hold"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");
    assert_eq!(body["resolution_reason"], "Supplier on hold");
    assert_eq!(body["resolved_by"], approver.to_string());

    let (status, body) = app
        .post(&format!("{}/resolve", uri), approver, json!({"decision": "approved"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn test_admin_resolves_and_unknown_id_is_not_found() {
    let app = TestApp::new();
    let admin = Uuid::new_v4();
    app.roles.assign(admin, "admin").await;

    let request = app
        .state
        .approvals
        .create(approval_for(vec![Uuid::new_v4()], None))
        .await
        .unwrap();

    let (_, listed) = app.get("/api/v1/approvals", admin).await;
    assert_eq!(listed["meta"]["total"], 1);

    let (status, body) = app
        .post(
            &format!("/api/v1/approvals/{}/resolve", request.id),
            admin,
            json!({"decision": "approved"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");

    let (status, _) = app
        .post(
            &format!("/api/v1/approvals/{}/resolve", Uuid::new_v4()),
            admin,
            json!({"decision": "approved"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_resolve_rejects_bad_bodies() {
    let app = TestApp::new();
    let approver = Uuid::new_v4();
    let request = app
        .state
        .approvals
        .create(approval_for(vec![approver], None))
        .await
        .unwrap();
    let uri = format!("/api/v1/approvals/{}/resolve", request.id);

    let (status, _) = app.post(&uri, approver, json!({"decision": "maybe"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = app
        .post(&uri, approver, json!({"decision": "approved", "reason": "x".repeat(2001)}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"]["reason"].is_array());

    // Neither attempt touched the request
    assert!(app.state.approvals.get(request.id).await.unwrap().is_pending());
}

#[tokio::test]
async fn test_alert_visibility_follows_role_changes() {
    let app = TestApp::new();
    let clerk = Uuid::new_v4();
    app.roles.assign(clerk, "warehouse").await;

    let alert = app
        .state
        .alerts
        .create(alert_for_role("warehouse", AlertSeverity::Critical))
        .await
        .unwrap();
    let uri = format!("/api/v1/alerts/{}", alert.id);

    let (status, listed) = app.get("/api/v1/alerts?severity=critical", clerk).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["meta"]["total"], 1);

    let (_, summary) = app.get("/api/v1/alerts/summary", clerk).await;
    assert_eq!(summary["total"], 1);
    assert_eq!(summary["counts"]["critical"], 1);
    assert_eq!(summary["counts"]["info"], 0);

    app.roles.revoke(clerk, "warehouse").await;
    let (status, body) = app.get(&uri, clerk).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (_, listed) = app.get("/api/v1/alerts", clerk).await;
    assert_eq!(listed["meta"]["total"], 0);
}

#[tokio::test]
async fn test_acknowledge_and_dismiss_alert() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let alert = app
        .state
        .alerts
        .create(alert_for_user(user, AlertSeverity::Error))
        .await
        .unwrap();
    let uri = format!("/api/v1/alerts/{}", alert.id);

    let (status, body) = app
        .post(&format!("{}/acknowledge", uri), user, json!({"notes": "Recounting bin 4"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "acknowledged");

    let (status, _) = app
        .request(Method::POST, &format!("{}/acknowledge", uri), Some(user), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, acks) = app.get(&format!("{}/acknowledgments", uri), user).await;
    assert_eq!(acks.as_array().unwrap().len(), 1);
    assert_eq!(acks[0]["notes"], "Recounting bin 4");

    let (status, body) = app
        .request(Method::POST, &format!("{}/dismiss", uri), Some(user), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "dismissed");

    let (status, _) = app.get(&format!("/api/v1/alerts/{}", Uuid::new_v4()), user).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bulk_alert_operations_report_skips() {
    let app = TestApp::new();
    let user = Uuid::new_v4();
    let mine = app
        .state
        .alerts
        .create(alert_for_user(user, AlertSeverity::Warning))
        .await
        .unwrap();
    let theirs = app
        .state
        .alerts
        .create(alert_for_user(Uuid::new_v4(), AlertSeverity::Warning))
        .await
        .unwrap();

    let (status, outcome) = app
        .post(
            "/api/v1/alerts/acknowledge-selected",
            user,
            json!({"ids": [mine.id, theirs.id, mine.id]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["requested"], 2);
    assert_eq!(outcome["acted"], 1);
    assert_eq!(outcome["skipped"], 1);
    assert_eq!(outcome["updated"], 1);

    let (status, _) = app
        .post("/api/v1/alerts/dismiss-selected", user, json!({"ids": []}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, outcome) = app
        .request(Method::POST, "/api/v1/alerts/dismiss-all", Some(user), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["acted"], 1);

    let other = app.state.alerts.create(alert_for_user(user, AlertSeverity::Info)).await.unwrap();
    let (_, outcome) = app
        .post("/api/v1/alerts/acknowledge-all", user, json!({"notes": "seen"}))
        .await;
    assert_eq!(outcome["acted"], 1);

    let (_, listed) = app.get("/api/v1/alerts?status=acknowledged", user).await;
    assert_eq!(listed["data"][0]["id"], other.id.to_string());
}

#[tokio::test]
async fn test_action_catalog_and_validation() {
    let app = TestApp::new();
    let user = Uuid::new_v4();

    let (status, catalog) = app.get("/api/v1/actions", user).await;
    assert_eq!(status, StatusCode::OK);
    let entries = catalog.as_array().unwrap();
    assert_eq!(entries.len(), 9);
    let approval = entries
        .iter()
        .find(|e| e["action_type"] == "seek_approval")
        .unwrap();
    assert_eq!(approval["is_async"], true);
    assert_eq!(approval["ports"], json!(["approved", "rejected", "timed_out"]));

    let (status, body) = app
        .post(
            "/api/v1/actions/validate",
            user,
            json!({"action_type": "update_field", "config": {"table": "products", "field": "status"}}),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"]["value"].is_array());

    let (status, body) = app
        .post("/api/v1/actions/validate", user, json!({"action_type": "teleport", "config": {}}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["details"]["action_type"].is_array());

    let (status, body) = app
        .post(
            "/api/v1/actions/validate",
            user,
            json!({
                "action_type": "send_email",
                "config": {"to": "{{entity.customer_email}}", "subject": "Shipped", "body": "On its way"}
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);

    let (status, body) = app
        .post(
            "/api/v1/actions/validate-rule",
            user,
            json!({"actions": [
                {"name": "notify", "action_type": "send_notification", "config": {"title": "t", "message": "m"}},
                {"name": "notify", "action_type": "send_email", "config": {"to": "a@b.c", "subject": "s", "body": "b"}}
            ]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert_eq!(body["errors"].as_array().unwrap().len(), 2);
}
