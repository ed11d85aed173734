//! Call Log Ingest - load call-center CSV exports into PostgreSQL

use anyhow::{bail, Context, Result};
use calllog_common::config::AppConfig;
use calllog_common::logging::{init_logging, LogConfig, LogLevel};
use calllog_ingest::driver::{self, DailyOutcome};
use calllog_ingest::{db, export, IngestOutcome, Pipeline};
use chrono::{Local, NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "calllog-ingest")]
#[command(author, version, about = "Call-center CSV ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load one CSV file
    Ingest {
        path: PathBuf,

        /// Keep the excluded comment column
        #[arg(long)]
        include_comment: bool,
    },

    /// Load the export for one day (yesterday by default)
    Daily {
        /// Directory holding the daily exports [default: CSV_DIR]
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Date to load, YYYY-MM-DD
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Load every CSV file in a directory
    Scan { dir: PathBuf },

    /// Run the daily load every day at a fixed local time
    Schedule {
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Local time of day, HH:MM
        #[arg(long, value_parser = parse_time_of_day)]
        at: NaiveTime,
    },

    /// Export the reiteration view to CSV
    Export {
        #[arg(short, long, default_value = "incoming_reiteration.csv")]
        output: PathBuf,
    },
}

fn parse_time_of_day(s: &str) -> std::result::Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|e| format!("expected HH:MM: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("calllog-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(database = ?config.database, table = %config.ingest.table_name, "Configuration loaded");

    let pool = db::create_pool(&config.database).await?;
    let csv_dir = config.ingest.csv_dir.clone();
    let view_name = config.ingest.view_name.clone();
    let pipeline = Pipeline::new(pool.clone(), config.ingest)?;

    match cli.command {
        Command::Ingest {
            path,
            include_comment,
        } => {
            let include = include_comment || pipeline.settings().include_excluded_column;
            match pipeline.ingest(&path, include).await? {
                IngestOutcome::Imported(summary) => info!(
                    file = %summary.file_name,
                    rows = summary.rows_written,
                    "Ingestion complete"
                ),
                IngestOutcome::Skipped { file_name } => {
                    info!(file = %file_name, "Nothing to do, file already imported")
                },
            }
        },
        Command::Daily { dir, date } => {
            let dir = dir.unwrap_or(csv_dir);
            let date = date.unwrap_or_else(|| driver::previous_day(Local::now().date_naive()));

            match driver::run_daily(&pipeline, &dir, date).await? {
                DailyOutcome::Missing(path) => {
                    warn!(path = %path.display(), "No export to load")
                },
                DailyOutcome::AlreadyLoaded(date) => info!(%date, "Day already loaded"),
                DailyOutcome::Ingested(outcome) => {
                    info!(file = %outcome.file_name(), skipped = outcome.is_skipped(), "Daily load complete")
                },
            }
        },
        Command::Scan { dir } => {
            let report = driver::run_directory(&pipeline, &dir).await?;
            for failure in &report.failed {
                warn!(file = %failure.file_name, kind = failure.kind, reason = %failure.reason, "File failed");
            }
            if report.has_failures() {
                bail!("{} of {} files failed", report.failed.len(), report.total());
            }
        },
        Command::Schedule { dir, at } => {
            let dir = dir.unwrap_or(csv_dir);
            info!(dir = %dir.display(), at = %at.format("%H:%M"), "Scheduler started");

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Could not listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
            };
            driver::run_schedule(&pipeline, &dir, at, shutdown).await;
        },
        Command::Export { output } => {
            let file = File::create(&output)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            let mut out = BufWriter::new(file);
            let bytes = export::export_view(&pool, &view_name, &mut out).await?;
            info!(path = %output.display(), bytes, "Export complete");
        },
    }

    pool.close().await;
    Ok(())
}
