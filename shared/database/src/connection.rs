use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, Pool, Postgres};

use learnvault_common::{AppError, DatabaseConfig};

pub type DbPool = Pool<Postgres>;

pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await
        .map_err(AppError::Database)?;

    // Test the connection
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(AppError::Database)?;

    tracing::info!("Database connection established");
    Ok(pool)
}

/// Applies a schema script. Statements are idempotent (`CREATE TABLE IF NOT
/// EXISTS`), so this is safe to run at every startup.
pub async fn apply_schema(pool: &PgPool, schema: &str) -> Result<(), AppError> {
    pool.execute(schema).await.map_err(AppError::Database)?;
    tracing::info!("Database schema applied");
    Ok(())
}
