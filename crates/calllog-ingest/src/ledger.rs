//! Import ledger
//!
//! One row per fully loaded file, unique on the file's base name. The
//! unique constraint is the only guard against loading a file twice.

use sqlx::PgPool;
use tracing::{debug, info};

use crate::db::quote_qualified;
use crate::error::{IngestError, Result};
use crate::models::ImportLedgerEntry;

/// Tracks which files have been imported
#[derive(Debug, Clone)]
pub struct LoadTracker {
    pool: PgPool,
    table: String,
}

impl LoadTracker {
    pub fn new(pool: PgPool, ledger_table: &str) -> Result<Self> {
        Ok(Self {
            pool,
            table: quote_qualified(ledger_table)?,
        })
    }

    /// Create the ledger table if it does not exist
    pub async fn ensure_schema(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id SERIAL PRIMARY KEY,
                file_name TEXT UNIQUE NOT NULL,
                imported_at TIMESTAMP NOT NULL DEFAULT now()
            )",
            self.table
        );

        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(IngestError::Ledger)?;

        debug!(table = %self.table, "Import ledger ready");
        Ok(())
    }

    pub async fn already_imported(&self, file_name: &str) -> Result<bool> {
        let sql = format!("SELECT EXISTS (SELECT 1 FROM {} WHERE file_name = $1)", self.table);

        sqlx::query_scalar::<_, bool>(&sql)
            .bind(file_name)
            .fetch_one(&self.pool)
            .await
            .map_err(IngestError::Ledger)
    }

    /// Record a completed file; a second mark for the same name is a no-op
    pub async fn mark_imported(&self, file_name: &str) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (file_name) VALUES ($1) ON CONFLICT (file_name) DO NOTHING",
            self.table
        );

        let result = sqlx::query(&sql)
            .bind(file_name)
            .execute(&self.pool)
            .await
            .map_err(IngestError::Ledger)?;

        info!(
            file = file_name,
            newly_marked = result.rows_affected() == 1,
            "File marked as imported"
        );
        Ok(())
    }

    pub async fn entry(&self, file_name: &str) -> Result<Option<ImportLedgerEntry>> {
        let sql = format!(
            "SELECT file_name, imported_at FROM {} WHERE file_name = $1",
            self.table
        );

        sqlx::query_as::<_, ImportLedgerEntry>(&sql)
            .bind(file_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(IngestError::Ledger)
    }
}
