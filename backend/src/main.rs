use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod alerts;
mod approvals;
mod auth;
mod config;
mod database;
mod error;
mod handlers;
mod notifications;
mod pagination;
mod services;
mod workflows;

#[cfg(test)]
mod tests;

use alerts::{AlertEngine, AlertStore, MemoryAlertStore, PgAlertStore};
use approvals::{ApprovalService, ApprovalStore, HttpCompleter, MemoryApprovalStore, PgApprovalStore};
use auth::{AdminPolicy, MemoryRoleDirectory, PgRoleDirectory, RoleDirectory};
use config::{Config, StorageBackend};
use notifications::{MemoryNotificationSender, NotificationSender, PgNotificationSender};
use services::email::{EmailSender, EmailService};
use workflows::{
    builtin_registry, Collaborators, EntityStore, MemoryEntityStore, PgEntityStore,
    TemplateProcessor, WorkflowExecutor,
};

pub struct AppState {
    pub config: Config,
    /// Present only with the Postgres storage backend
    pub db_pool: Option<sqlx::PgPool>,
    pub roles: Arc<dyn RoleDirectory>,
    pub admin: AdminPolicy,
    pub approvals: Arc<ApprovalService>,
    pub alerts: Arc<AlertEngine>,
    pub executor: WorkflowExecutor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db_pool = match config.storage {
        StorageBackend::Postgres => {
            let pool = database::create_pool(&config.database_url).await?;
            database::migrate(&pool).await?;
            Some(pool)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; nothing survives a restart");
            None
        }
    };

    let server_addr = config.server_addr.clone();
    let app_state = Arc::new(build_state(config, db_pool)?);
    let app = handlers::router(app_state);

    let listener = tokio::net::TcpListener::bind(&server_addr).await?;
    tracing::info!("Server running on {}", server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Wire stores, collaborators and the handler registry for the configured backend.
fn build_state(config: Config, db_pool: Option<sqlx::PgPool>) -> anyhow::Result<AppState> {
    let (roles, approval_store, alert_store, entities, notifications): (
        Arc<dyn RoleDirectory>,
        Arc<dyn ApprovalStore>,
        Arc<dyn AlertStore>,
        Arc<dyn EntityStore>,
        Arc<dyn NotificationSender>,
    ) = match &db_pool {
        Some(pool) => (
            Arc::new(PgRoleDirectory::new(pool.clone())),
            Arc::new(PgApprovalStore::new(pool.clone())),
            Arc::new(PgAlertStore::new(pool.clone())),
            Arc::new(PgEntityStore::new(pool.clone())),
            Arc::new(PgNotificationSender::new(pool.clone())),
        ),
        None => (
            Arc::new(MemoryRoleDirectory::new()),
            Arc::new(MemoryApprovalStore::new()),
            Arc::new(MemoryAlertStore::new()),
            Arc::new(MemoryEntityStore::new()),
            Arc::new(MemoryNotificationSender::new()),
        ),
    };

    let admin = AdminPolicy::new(config.admin_roles.clone());
    let mut approvals = ApprovalService::new(approval_store, admin.clone());
    match &config.durable_engine {
        Some(engine) => {
            approvals = approvals.with_completer(Arc::new(HttpCompleter::new(engine)?));
            tracing::info!(base_url = %engine.base_url, "Durable engine bridge enabled");
        }
        None => tracing::info!("Durable engine bridge disabled"),
    }
    let approvals = Arc::new(approvals);
    let alerts = Arc::new(AlertEngine::new(alert_store));

    let email: Option<Arc<dyn EmailSender>> = if config.smtp.is_configured() {
        Some(Arc::new(EmailService::new(&config.smtp)?))
    } else {
        tracing::warn!("SMTP not configured; send_email actions will fail outside dry run");
        None
    };

    let collaborators = Collaborators {
        entities: Some(entities),
        email,
        notifications: Some(notifications),
        alerts: Some(alerts.clone()),
        approvals: Some(approvals.clone()),
        allocator: None,
    };
    let registry = Arc::new(builtin_registry(&collaborators));
    tracing::info!(action_types = registry.len(), "Action registry ready");

    let executor = WorkflowExecutor::new(registry, TemplateProcessor::new(config.template_max_depth));

    Ok(AppState {
        config,
        db_pool,
        roles,
        admin,
        approvals,
        alerts,
        executor,
    })
}
