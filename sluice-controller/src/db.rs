use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create monitor instances table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS monitor_instances (
            id UUID PRIMARY KEY,
            job_id VARCHAR(64) NOT NULL,
            last_polled_at TIMESTAMPTZ,
            status VARCHAR(20) NOT NULL,
            wake_at TIMESTAMPTZ NOT NULL,
            lease_expires_at TIMESTAMPTZ,
            polls BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            completed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one polling instance per job
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_monitor_instances_polling_job \
         ON monitor_instances(job_id) WHERE status = 'Polling'",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_monitor_instances_due \
         ON monitor_instances(wake_at) WHERE status = 'Polling'",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
