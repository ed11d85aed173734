//! Error types for the ingestion pipeline
//!
//! Only failures that end a file's run live here. Malformed rows and fields
//! that fail coercion are recovered where they happen and never surface as
//! errors; an already-imported file is an `IngestOutcome::Skipped`.

use std::path::PathBuf;
use thiserror::Error;

use crate::encoding::MalformedInput;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// No candidate encoding could decode the file
    #[error("Could not decode '{}' with any of {tried:?}: {source}", .path.display())]
    DecodeExhausted {
        path: PathBuf,
        tried: Vec<String>,
        #[source]
        source: MalformedInput,
    },

    /// The encoding chosen for the file failed on a later part of it
    #[error("Decoding failed mid-file with {encoding}: {source}")]
    Decode {
        encoding: String,
        #[source]
        source: MalformedInput,
    },

    #[error("CSV read error: {0}")]
    Csv(#[from] csv::Error),

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a file path: '{}'", .0.display())]
    InvalidPath(PathBuf),

    #[error("Invalid SQL identifier '{0}'. Use letters, digits and underscores, optionally schema-qualified")]
    InvalidIdentifier(String),

    /// Pool creation or connection acquisition failed
    #[error("Database connection failed: {0}. Check DB_HOST, DB_PORT and credentials")]
    Connection(#[source] sqlx::Error),

    /// Destination provisioning or bulk load rejected
    #[error("Bulk load of batch {batch} failed: {source}")]
    Load {
        batch: usize,
        #[source]
        source: sqlx::Error,
    },

    #[error("Import ledger query failed: {0}")]
    Ledger(#[source] sqlx::Error),

    #[error("Export failed: {0}")]
    Export(#[source] sqlx::Error),

    #[error("Database query failed: {0}")]
    Query(#[source] sqlx::Error),
}

impl IngestError {
    /// Short machine-friendly label, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::DecodeExhausted { .. } | IngestError::Decode { .. } => "decode",
            IngestError::Csv(_) => "csv",
            IngestError::Io(_) | IngestError::InvalidPath(_) => "io",
            IngestError::InvalidIdentifier(_) => "config",
            IngestError::Connection(_) => "connection",
            IngestError::Load { .. } => "load",
            IngestError::Ledger(_) => "ledger",
            IngestError::Export(_) => "export",
            IngestError::Query(_) => "query",
        }
    }
}
