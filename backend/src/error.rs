//! Error handling for the Ledgerline automation core and its API
//!
//! `AutomationError` is the taxonomy returned by handlers, the approval
//! service and the alert engine. `AppError` is the HTTP-facing error with a
//! consistent JSON body; every `AutomationError` converts into it.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ledgerline_shared::ApprovalStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ===== Core taxonomy =====

/// Expected race outcomes. Callers render these as "already handled".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    AlreadyResolved { status: ApprovalStatus },
    AlreadyAcknowledged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationKind {
    NotARecipient,
    NotAnApprover,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Classify a sqlx error, surfacing Postgres unique violations (23505).
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some("23505") {
                return Self::UniqueViolation(db.message().to_string());
            }
        }
        Self::Database(err)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("invalid configuration for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("unknown action type '{0}'")]
    UnknownActionType(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{}", conflict_message(.0))]
    Conflict(ConflictKind),

    #[error("{}", authorization_message(.0))]
    Authorization(AuthorizationKind),

    #[error("{handler} failed on {target}: {message}")]
    Execution {
        handler: String,
        target: String,
        message: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn conflict_message(kind: &ConflictKind) -> String {
    match kind {
        ConflictKind::AlreadyResolved { status } => {
            format!("approval request already resolved ({})", status)
        }
        ConflictKind::AlreadyAcknowledged => "alert already acknowledged".to_string(),
    }
}

fn authorization_message(kind: &AuthorizationKind) -> String {
    match kind {
        AuthorizationKind::NotARecipient => "caller is not a recipient of this alert".to_string(),
        AuthorizationKind::NotAnApprover => {
            "caller is not an approver for this request".to_string()
        }
    }
}

impl AutomationError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn execution(
        handler: impl Into<String>,
        target: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Execution {
            handler: handler.into(),
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn approval_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "approval request",
            id: id.to_string(),
        }
    }

    pub fn alert_not_found(id: Uuid) -> Self {
        Self::NotFound {
            entity: "alert",
            id: id.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

pub type AutomationResult<T> = Result<T, AutomationError>;

// ===== HTTP errors =====

/// Standard API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code (e.g., "VALIDATION_ERROR", "NOT_FOUND", "CONFLICT")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional field-level errors for validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Vec<String>>>,
    /// ISO 8601 timestamp
    pub timestamp: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: HashMap<String, Vec<String>>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Application error type that can be converted to HTTP responses
#[derive(Debug)]
pub enum AppError {
    Unauthorized(String),
    Forbidden(String),

    NotFound(String),
    Conflict(String),

    ValidationError { details: HashMap<String, Vec<String>> },
    BadRequest(String),

    InternalError(String),
    DatabaseError(String),
    ExternalServiceError { service: String, message: String },
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ValidationError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InternalError(_) | Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ExternalServiceError { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::InternalError(_) => "INTERNAL_ERROR",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::ExternalServiceError { .. } => "EXTERNAL_SERVICE_ERROR",
        }
    }

    /// Get the error message
    pub fn message(&self) -> String {
        match self {
            Self::Unauthorized(msg) => msg.clone(),
            Self::Forbidden(msg) => msg.clone(),
            Self::NotFound(resource) => format!("{} not found", resource),
            Self::Conflict(msg) => msg.clone(),
            Self::ValidationError { .. } => "Validation failed".to_string(),
            Self::BadRequest(msg) => msg.clone(),
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            Self::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                "A database error occurred".to_string()
            }
            Self::ExternalServiceError { service, message } => {
                tracing::error!("External service error ({}): {}", service, message);
                format!("External service '{}' is unavailable", service)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut error = ApiError::new(self.error_code(), self.message());

        if let Self::ValidationError { details } = &self {
            error.details = Some(details.clone());
        }

        (status, Json(error)).into_response()
    }
}

impl From<AutomationError> for AppError {
    fn from(err: AutomationError) -> Self {
        match err {
            AutomationError::Validation { field, message } => validation_error(&field, &message),
            AutomationError::UnknownActionType(name) => {
                validation_error("action_type", &format!("unknown action type '{}'", name))
            }
            AutomationError::NotFound { entity, id } => Self::NotFound(format!("{} {}", entity, id)),
            err @ AutomationError::Conflict(_) => Self::Conflict(err.to_string()),
            err @ AutomationError::Authorization(_) => Self::Forbidden(err.to_string()),
            AutomationError::Execution {
                handler,
                target,
                message,
            } => Self::ExternalServiceError {
                service: handler,
                message: format!("{}: {}", target, message),
            },
            AutomationError::Store(StoreError::Database(e)) => Self::DatabaseError(e.to_string()),
            AutomationError::Store(e) => Self::InternalError(e.to_string()),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("Resource".to_string()),
            _ => Self::DatabaseError(err.to_string()),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                Self::Unauthorized("Authentication token has expired".to_string())
            }
            _ => Self::Unauthorized(format!("Invalid token: {}", err)),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut builder = ValidationBuilder::new();
        for (field, field_errors) in errors.field_errors() {
            for e in field_errors {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                builder = builder.error(&field, &message);
            }
        }
        builder
            .build()
            .unwrap_or_else(|| Self::BadRequest("Invalid request".to_string()))
    }
}

/// Result type alias for handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper to create validation errors
pub fn validation_error(field: &str, message: &str) -> AppError {
    let mut details = HashMap::new();
    details.insert(field.to_string(), vec![message.to_string()]);
    AppError::ValidationError { details }
}

/// Helper to add multiple validation errors
pub struct ValidationBuilder {
    details: HashMap<String, Vec<String>>,
}

impl ValidationBuilder {
    pub fn new() -> Self {
        Self {
            details: HashMap::new(),
        }
    }

    pub fn error(mut self, field: &str, message: &str) -> Self {
        self.details
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
        self
    }

    pub fn build(self) -> Option<AppError> {
        if self.details.is_empty() {
            None
        } else {
            Some(AppError::ValidationError {
                details: self.details,
            })
        }
    }
}

impl Default for ValidationBuilder {
    fn default() -> Self {
        Self::new()
    }
}
