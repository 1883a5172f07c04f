pub mod unit;
pub mod integration;
pub mod helpers;

// Shared setup for Postgres-backed tests
use sqlx::PgPool;

pub struct TestContext {
    pub db_pool: PgPool,
}

impl TestContext {
    /// Connects to `TEST_DATABASE_URL` and applies migrations. `None` when the
    /// variable is unset, so callers can skip without failing.
    pub async fn from_env() -> Option<Self> {
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;

        let pool = PgPool::connect(&database_url)
            .await
            .expect("Failed to connect to test database");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        Some(Self { db_pool: pool })
    }
}
