use axum::{
    body::Body,
    http::{header::AUTHORIZATION, header::CONTENT_TYPE, HeaderValue, Method, Request, StatusCode},
    Router,
};
use chrono::Duration;
use serde_json::Value;
use std::sync::{Arc, Once};
use tower::ServiceExt;
use uuid::Uuid;

use crate::alerts::{AlertEngine, MemoryAlertStore};
use crate::approvals::{ApprovalService, MemoryApprovalStore};
use crate::auth::{jwt, AdminPolicy, MemoryRoleDirectory};
use crate::config::{Config, SmtpConfig, StorageBackend};
use crate::notifications::MemoryNotificationSender;
use crate::workflows::{
    builtin_registry, Collaborators, MemoryEntityStore, TemplateProcessor, WorkflowExecutor,
};
use crate::AppState;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_only";

static LOGGING: Once = Once::new();

/// Route `tracing` output through the test harness. Safe to call from every test.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn create_test_jwt(user_id: Uuid) -> String {
    jwt::create_jwt(user_id, TEST_JWT_SECRET, Duration::hours(1))
        .expect("Failed to create test JWT")
        .token
}

pub fn bearer(user_id: Uuid) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", create_test_jwt(user_id)))
        .expect("Failed to create auth header")
}

pub fn test_config() -> Config {
    Config {
        database_url: String::new(),
        server_addr: "127.0.0.1:0".to_string(),
        jwt_secret: TEST_JWT_SECRET.to_string(),
        storage: StorageBackend::Memory,
        admin_roles: vec!["admin".to_string()],
        durable_engine: None,
        template_max_depth: 32,
        smtp: SmtpConfig {
            host: String::new(),
            port: 2525,
            username: String::new(),
            password: String::new(),
            from_email: "automation@ledgerline.test".to_string(),
            from_name: "Ledgerline Test".to_string(),
            use_tls: false,
        },
    }
}

/// Memory-backed application with handles on the stores tests need to poke.
pub struct TestApp {
    pub state: Arc<AppState>,
    pub roles: Arc<MemoryRoleDirectory>,
    pub entities: Arc<MemoryEntityStore>,
    pub notifications: Arc<MemoryNotificationSender>,
}

impl TestApp {
    pub fn new() -> Self {
        init_test_logging();

        let config = test_config();
        let roles = Arc::new(MemoryRoleDirectory::new());
        let entities = Arc::new(MemoryEntityStore::new());
        let notifications = Arc::new(MemoryNotificationSender::new());

        let admin = AdminPolicy::new(config.admin_roles.clone());
        let approvals = Arc::new(ApprovalService::new(
            Arc::new(MemoryApprovalStore::new()),
            admin.clone(),
        ));
        let alerts = Arc::new(AlertEngine::new(Arc::new(MemoryAlertStore::new())));

        let collaborators = Collaborators {
            entities: Some(entities.clone()),
            notifications: Some(notifications.clone()),
            alerts: Some(alerts.clone()),
            approvals: Some(approvals.clone()),
            ..Collaborators::default()
        };
        let executor = WorkflowExecutor::new(
            Arc::new(builtin_registry(&collaborators)),
            TemplateProcessor::new(config.template_max_depth),
        );

        let state = Arc::new(AppState {
            config,
            db_pool: None,
            roles: roles.clone(),
            admin,
            approvals,
            alerts,
            executor,
        });

        Self {
            state,
            roles,
            entities,
            notifications,
        }
    }

    pub fn router(&self) -> Router {
        crate::handlers::router(self.state.clone())
    }

    /// Send one request through a fresh router and decode the JSON reply.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        user: Option<Uuid>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = user {
            builder = builder.header(AUTHORIZATION, bearer(user_id));
        }
        let request = match body {
            Some(json) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");

        let response = self
            .router()
            .oneshot(request)
            .await
            .expect("Router failed");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn get(&self, uri: &str, user: Uuid) -> (StatusCode, Value) {
        self.request(Method::GET, uri, Some(user), None).await
    }

    pub async fn post(&self, uri: &str, user: Uuid, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(user), Some(body)).await
    }
}
