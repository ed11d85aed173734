//! Connection pool and SQL identifier handling

use calllog_common::config::DatabaseConfig;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;

use crate::error::{IngestError, Result};

/// Build the shared pool from explicit settings
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let connect = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(&config.password)
        .database(&config.name);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_with(connect)
        .await
        .map_err(IngestError::Connection)?;

    tracing::info!(
        host = %config.host,
        port = config.port,
        database = %config.name,
        max_connections = config.max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Double-quote a single identifier such as a column name
///
/// Embedded quotes are doubled, so any name coming from a file header is
/// safe to splice into a statement.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Validate and quote a configured table or view name
///
/// Accepts `name` or `schema.name`, each segment `[A-Za-z0-9_]+`.
pub fn quote_qualified(name: &str) -> Result<String> {
    let segments: Vec<&str> = name.split('.').collect();

    let valid = segments.len() <= 2
        && segments
            .iter()
            .all(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));

    if !valid {
        return Err(IngestError::InvalidIdentifier(name.to_string()));
    }

    Ok(segments
        .iter()
        .map(|s| quote_ident(s))
        .collect::<Vec<_>>()
        .join("."))
}

/// Comma-separated quoted column list
pub fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}
