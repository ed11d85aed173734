//! Configuration management
//!
//! Settings are read once by the process entry point and handed down as
//! plain structs. Library code never looks at the environment itself.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CommonError, Result};

// ============================================================================
// Defaults
// ============================================================================

/// Default database host.
pub const DEFAULT_DB_HOST: &str = "localhost";

/// Default database port.
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Default maximum connections in the pool.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Default connection acquire timeout in seconds.
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default destination table for call records.
pub const DEFAULT_TABLE_NAME: &str = "call_logs";

/// Default view read by the export command.
pub const DEFAULT_VIEW_NAME: &str = "v_incoming_reiteration";

/// Default ledger table recording imported files.
pub const DEFAULT_LEDGER_TABLE: &str = "imported_files";

/// Default number of rows per batch.
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

/// Column left out of the load unless explicitly included.
pub const DEFAULT_EXCLUDED_COLUMN: &str = "COMMENTAIRE";

/// Database connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Destination table for normalized call records
    pub table_name: String,
    /// View exported by the `export` command
    pub view_name: String,
    /// Table tracking which files were fully imported
    pub ledger_table: String,
    /// Rows per batch
    pub chunk_size: usize,
    /// Column dropped at read time (matched case-insensitively)
    pub excluded_column: String,
    /// Keep the excluded column anyway
    pub include_excluded_column: bool,
    /// Directory where daily exports land
    pub csv_dir: PathBuf,
    /// Decoded bytes validated per encoding candidate; `None` scans the whole file
    pub encoding_probe_limit: Option<u64>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            view_name: DEFAULT_VIEW_NAME.to_string(),
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            excluded_column: DEFAULT_EXCLUDED_COLUMN.to_string(),
            include_excluded_column: false,
            csv_dir: PathBuf::from("."),
            encoding_probe_limit: None,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub ingest: IngestSettings,
}

impl AppConfig {
    /// Load configuration from `.env` and the process environment
    ///
    /// Recognized variables:
    /// - `DB_USER`, `DB_PASSWORD`, `DB_HOST`, `DB_PORT`, `DB_NAME`
    /// - `DB_MAX_CONNECTIONS`, `DB_CONNECT_TIMEOUT`
    /// - `TABLE_NAME`, `VIEW_NAME`, `LEDGER_TABLE`
    /// - `CHUNK_SIZE`, `EXCLUDED_COLUMN`, `INCLUDE_EXCLUDED_COLUMN`
    /// - `CSV_DIR`, `ENCODING_PROBE_LIMIT`
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = IngestSettings::default();

        let config = Self {
            database: DatabaseConfig {
                user: lookup("DB_USER").ok_or(CommonError::MissingVar("DB_USER"))?,
                password: lookup("DB_PASSWORD").unwrap_or_default(),
                host: lookup("DB_HOST").unwrap_or_else(|| DEFAULT_DB_HOST.to_string()),
                port: parse_or(&lookup, "DB_PORT", DEFAULT_DB_PORT)?,
                name: lookup("DB_NAME").ok_or(CommonError::MissingVar("DB_NAME"))?,
                max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
                connect_timeout_secs: parse_or(
                    &lookup,
                    "DB_CONNECT_TIMEOUT",
                    DEFAULT_DB_CONNECT_TIMEOUT_SECS,
                )?,
            },
            ingest: IngestSettings {
                table_name: lookup("TABLE_NAME").unwrap_or(defaults.table_name),
                view_name: lookup("VIEW_NAME").unwrap_or(defaults.view_name),
                ledger_table: lookup("LEDGER_TABLE").unwrap_or(defaults.ledger_table),
                chunk_size: parse_or(&lookup, "CHUNK_SIZE", defaults.chunk_size)?,
                excluded_column: lookup("EXCLUDED_COLUMN").unwrap_or(defaults.excluded_column),
                include_excluded_column: parse_or(
                    &lookup,
                    "INCLUDE_EXCLUDED_COLUMN",
                    defaults.include_excluded_column,
                )?,
                csv_dir: lookup("CSV_DIR").map(PathBuf::from).unwrap_or(defaults.csv_dir),
                encoding_probe_limit: match lookup("ENCODING_PROBE_LIMIT") {
                    Some(raw) => Some(
                        raw.trim()
                            .parse()
                            .map_err(|_| CommonError::invalid("ENCODING_PROBE_LIMIT", raw))?,
                    ),
                    None => None,
                },
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.user.trim().is_empty() {
            return Err(CommonError::invalid("DB_USER", &self.database.user));
        }

        if self.database.name.trim().is_empty() {
            return Err(CommonError::invalid("DB_NAME", &self.database.name));
        }

        if self.database.port == 0 {
            return Err(CommonError::invalid("DB_PORT", "0"));
        }

        if self.database.max_connections == 0 {
            return Err(CommonError::Config(
                "DB_MAX_CONNECTIONS must be greater than 0".to_string(),
            ));
        }

        if self.ingest.chunk_size == 0 {
            return Err(CommonError::Config(
                "CHUNK_SIZE must be greater than 0".to_string(),
            ));
        }

        for (key, value) in [
            ("TABLE_NAME", &self.ingest.table_name),
            ("VIEW_NAME", &self.ingest.view_name),
            ("LEDGER_TABLE", &self.ingest.ledger_table),
        ] {
            if value.trim().is_empty() {
                return Err(CommonError::invalid(key, value.as_str()));
            }
        }

        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CommonError::invalid(key, raw)),
        None => Ok(default),
    }
}
