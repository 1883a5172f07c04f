use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use ledgerline_shared::{Alert, AlertAcknowledgment, AlertSeverity, AlertStatus};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::alerts::{AlertFilter, BulkOutcome, SeveritySummary};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::pagination::{PaginatedResponse, PaginationParams};
use crate::AppState;

pub fn alert_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_alerts))
        .route("/summary", get(alert_summary))
        .route("/acknowledge-selected", post(acknowledge_selected))
        .route("/dismiss-selected", post(dismiss_selected))
        .route("/acknowledge-all", post(acknowledge_all))
        .route("/dismiss-all", post(dismiss_all))
        .route("/:id", get(get_alert))
        .route("/:id/acknowledgments", get(list_acknowledgments))
        .route("/:id/acknowledge", post(acknowledge_alert))
        .route("/:id/dismiss", post(dismiss_alert))
}

#[derive(Debug, Deserialize)]
pub struct ListAlertsQuery {
    pub status: Option<AlertStatus>,
    pub severity: Option<AlertSeverity>,
    pub alert_type: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct AcknowledgeRequest {
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SelectedAlertsRequest {
    #[validate(length(min = 1, max = 500, message = "must list between 1 and 500 alerts"))]
    pub ids: Vec<Uuid>,
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub notes: Option<String>,
}

async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListAlertsQuery>,
    AuthUser(principal): AuthUser,
) -> ApiResult<Json<PaginatedResponse<Alert>>> {
    let filter = AlertFilter {
        status: query.status,
        severity: query.severity,
        alert_type: query.alert_type.filter(|t| !t.trim().is_empty()),
    };
    let params = PaginationParams::new(query.page, query.limit);

    let (data, total) = state.alerts.list(&principal, &filter, &params).await?;
    Ok(Json(PaginatedResponse::new(data, &params, total)))
}

async fn alert_summary(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
) -> ApiResult<Json<SeveritySummary>> {
    Ok(Json(state.alerts.count_mine_by_severity(&principal).await?))
}

async fn get_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    AuthUser(principal): AuthUser,
) -> ApiResult<Json<Alert>> {
    Ok(Json(state.alerts.get(id, &principal).await?))
}

async fn list_acknowledgments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    AuthUser(principal): AuthUser,
) -> ApiResult<Json<Vec<AlertAcknowledgment>>> {
    Ok(Json(state.alerts.acknowledgments(id, &principal).await?))
}

async fn acknowledge_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    AuthUser(principal): AuthUser,
    body: Option<Json<AcknowledgeRequest>>,
) -> ApiResult<Json<Alert>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    request.validate()?;

    Ok(Json(state.alerts.acknowledge(id, &principal, request.notes).await?))
}

async fn dismiss_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    AuthUser(principal): AuthUser,
) -> ApiResult<Json<Alert>> {
    Ok(Json(state.alerts.dismiss(id, &principal).await?))
}

async fn acknowledge_selected(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    Json(request): Json<SelectedAlertsRequest>,
) -> ApiResult<Json<BulkOutcome>> {
    request.validate()?;

    let outcome = state
        .alerts
        .acknowledge_selected(&request.ids, &principal, request.notes.as_deref())
        .await?;
    Ok(Json(outcome))
}

async fn dismiss_selected(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    Json(request): Json<SelectedAlertsRequest>,
) -> ApiResult<Json<BulkOutcome>> {
    request.validate()?;

    Ok(Json(state.alerts.dismiss_selected(&request.ids, &principal).await?))
}

async fn acknowledge_all(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
    body: Option<Json<AcknowledgeRequest>>,
) -> ApiResult<Json<BulkOutcome>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    request.validate()?;

    let outcome = state
        .alerts
        .acknowledge_all(&principal, request.notes.as_deref())
        .await?;
    Ok(Json(outcome))
}

async fn dismiss_all(
    State(state): State<Arc<AppState>>,
    AuthUser(principal): AuthUser,
) -> ApiResult<Json<BulkOutcome>> {
    Ok(Json(state.alerts.dismiss_all(&principal).await?))
}
