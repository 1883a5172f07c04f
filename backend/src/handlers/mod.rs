use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::StorageBackend;
use crate::database;
use crate::AppState;

pub mod actions;
pub mod alerts;
pub mod approvals;

pub use actions::action_routes;
pub use alerts::alert_routes;
pub use approvals::approval_routes;

/// Full application router, state applied.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Ledgerline Automation API v1.0.0" }))
        .route("/health", get(health_check))
        .nest("/api/v1/approvals", approval_routes())
        .nest("/api/v1/alerts", alert_routes())
        .nest("/api/v1/actions", action_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let (backend, healthy) = match (&state.config.storage, &state.db_pool) {
        (StorageBackend::Postgres, Some(pool)) => ("postgres", database::health_check(pool).await),
        (StorageBackend::Postgres, None) => ("postgres", false),
        (StorageBackend::Memory, _) => ("memory", true),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "service": "ledgerline-automation",
            "storage": backend,
            "action_types": state.executor.registry().len(),
        })),
    )
}
