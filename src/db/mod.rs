//! Database initialization and migration runner.
//!
//! SYSTEM CONTEXT
//! ==============
//! Startup uses this module when `DATABASE_URL` is set: it creates the shared
//! SQLx pool behind the PostgreSQL document store and applies the `kv_entries`
//! schema before any request is served.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::env_parse;

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_DB_MAX_WATCHES: u32 = 64;

/// Initialize the `PostgreSQL` connection pool and run migrations.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS))
        .connect(database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}

/// Separate lazily-connected pool for watch listeners.
///
/// Every live watch pins one connection for its whole lifetime, so listeners
/// get their own connection limit.
///
/// # Errors
///
/// Returns an error if `database_url` cannot be parsed.
pub fn init_listener_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(env_parse("DB_MAX_WATCHES", DEFAULT_DB_MAX_WATCHES))
        .connect_lazy(database_url)
}
