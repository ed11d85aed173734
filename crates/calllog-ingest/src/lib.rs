//! Call Log Ingest
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads call-center CSV exports into PostgreSQL exactly once per file.
//!
//! A file goes through:
//! 1. ledger check ([`ledger::LoadTracker`]); already imported files are skipped
//! 2. encoding resolution ([`encoding`]) with a strict decode ladder
//! 3. chunked reading ([`reader::ChunkedReader`]); malformed lines are skipped
//! 4. normalization ([`normalizer::normalize`]); bad values become null
//! 5. `COPY` per batch ([`writer::BulkWriter`])
//! 6. ledger mark
//!
//! # Example
//!
//! ```no_run
//! use calllog_common::config::AppConfig;
//! use calllog_ingest::{db, Pipeline};
//! use std::path::Path;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = AppConfig::load()?;
//! let pool = db::create_pool(&config.database).await?;
//! let pipeline = Pipeline::new(pool, config.ingest)?;
//!
//! let outcome = pipeline
//!     .ingest(Path::new("2024-03-05_VocalCom_Incoming.csv"), false)
//!     .await?;
//! println!("{}: skipped = {}", outcome.file_name(), outcome.is_skipped());
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod driver;
pub mod encoding;
pub mod error;
pub mod export;
pub mod ledger;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod reader;
pub mod writer;

pub use error::{IngestError, Result};
pub use models::{ImportSummary, IngestOutcome, NormalizedBatch, RawBatch, Value};
pub use pipeline::Pipeline;
