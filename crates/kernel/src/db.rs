//! Database connection pool management.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::config::Config;

/// Schema statements, applied in order. Each is idempotent.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS documents (
        id uuid PRIMARY KEY,
        collection text NOT NULL,
        body jsonb NOT NULL DEFAULT '{}'::jsonb
    )",
    "CREATE INDEX IF NOT EXISTS documents_collection_idx ON documents (collection)",
    "CREATE INDEX IF NOT EXISTS documents_body_idx ON documents USING gin (body jsonb_path_ops)",
];

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// Check if the database connection is healthy.
pub async fn check_health(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

/// Create the document table and its indexes.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to begin migration transaction")?;

    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to apply schema statement: {statement}"))?;
    }

    tx.commit()
        .await
        .context("failed to commit migration transaction")?;

    info!(statements = SCHEMA.len(), "schema up to date");
    Ok(())
}
