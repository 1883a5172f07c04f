use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::AuthUser;
use crate::error::{validation_error, ApiResult};
use crate::workflows::{Action, HandlerDescriptor, RuleValidationError};
use crate::AppState;

pub fn action_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_action_types))
        .route("/validate", post(validate_action))
        .route("/validate-rule", post(validate_rule))
}

#[derive(Debug, Deserialize)]
pub struct ValidateActionRequest {
    pub action_type: String,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRuleRequest {
    pub actions: Vec<Action>,
}

#[derive(Debug, Serialize)]
pub struct RuleValidationResponse {
    pub valid: bool,
    pub errors: Vec<RuleValidationError>,
}

async fn list_action_types(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
) -> Json<Vec<HandlerDescriptor>> {
    Json(state.executor.registry().describe())
}

/// Offline check of one action config. Problems come back as a 422.
async fn validate_action(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(request): Json<ValidateActionRequest>,
) -> ApiResult<Json<Value>> {
    if request.action_type.trim().is_empty() {
        return Err(validation_error("action_type", "is required"));
    }

    state
        .executor
        .registry()
        .validate(&request.action_type, &request.config)?;
    Ok(Json(json!({ "valid": true, "action_type": request.action_type })))
}

/// Validates a whole action list and reports every problem found.
async fn validate_rule(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(request): Json<ValidateRuleRequest>,
) -> Json<RuleValidationResponse> {
    let errors = match state.executor.validate_rule(&request.actions) {
        Ok(()) => Vec::new(),
        Err(errors) => errors,
    };
    Json(RuleValidationResponse {
        valid: errors.is_empty(),
        errors,
    })
}
