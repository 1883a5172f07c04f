use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::jwt;
use super::rbac::Principal;
use crate::error::AppError;
use crate::AppState;

/// Authenticated caller with the roles they hold right now.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Principal);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Extract Bearer token from Authorization header
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|header| header.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing authorization header".to_string()).into_response())?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("Invalid authorization format".to_string()).into_response())?;

        let token_data = jwt::verify_jwt(token, &state.config.jwt_secret)
            .map_err(|e| AppError::from(e).into_response())?;

        // Never cached: visibility and approval rights follow role changes
        let user_id = token_data.claims.sub;
        let roles = state
            .roles
            .roles_for(user_id)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()).into_response())?;

        Ok(AuthUser(Principal::new(user_id, roles)))
    }
}
