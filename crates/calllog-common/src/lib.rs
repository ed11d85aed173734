//! Call Log Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ambient pieces shared by every workspace member.
//!
//! - **Configuration**: database and ingestion settings, built once by the caller
//! - **Logging**: `tracing` subscriber setup (console, rolling file, text or JSON)
//! - **Errors**: configuration error type and result alias
//!
//! # Example
//!
//! ```no_run
//! use calllog_common::config::AppConfig;
//! use calllog_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     let config = AppConfig::load()?;
//!     tracing::info!(table = %config.ingest.table_name, "Configuration loaded");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
