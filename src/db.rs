//! Database pool setup.
//!
//! The pool backs [`crate::store::PgStore`]; migrations in `migrations/` are
//! applied on every start.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Type alias for the application database pool.
pub type AppDb = PgPool;

/// Connect and bring the schema up to date.
pub async fn connect(database_url: &str) -> anyhow::Result<AppDb> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    info!("Connected to application database");

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Application migrations complete");

    Ok(pool)
}
