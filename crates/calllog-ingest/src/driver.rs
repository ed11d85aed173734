//! Drivers around the pipeline
//!
//! - daily: load yesterday's export unless rows for that date already exist
//! - directory scan: load every `*.csv` in a folder, continuing past failures
//! - schedule: run the daily driver once a day at a fixed local time

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::PgPool;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::db::quote_qualified;
use crate::error::{IngestError, Result};
use crate::models::{ImportSummary, IngestOutcome};
use crate::normalizer::DATE_COLUMN;
use crate::pipeline::Pipeline;

/// Suffix of the telephony platform's daily export
pub const DAILY_FILE_SUFFIX: &str = "_VocalCom_Incoming.csv";

/// `{dir}/{YYYY-MM-DD}_VocalCom_Incoming.csv`
pub fn expected_daily_file(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{}{}", date.format("%Y-%m-%d"), DAILY_FILE_SUFFIX))
}

/// The day before `today`
pub fn previous_day(today: NaiveDate) -> NaiveDate {
    today.pred_opt().unwrap_or(today)
}

/// Whether the destination table holds any call on `date`
///
/// A table that does not exist yet holds nothing.
pub async fn data_exists_for_date(pool: &PgPool, table_name: &str, date: NaiveDate) -> Result<bool> {
    let table = quote_qualified(table_name)?;

    let table_exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
        .bind(&table)
        .fetch_one(pool)
        .await
        .map_err(IngestError::Query)?;

    if !table_exists {
        return Ok(false);
    }

    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE \"{}\"::date = $1)",
        table, DATE_COLUMN
    );

    sqlx::query_scalar(&sql)
        .bind(date)
        .fetch_one(pool)
        .await
        .map_err(IngestError::Query)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DailyOutcome {
    /// No export for the date in the directory
    Missing(PathBuf),
    /// Rows for the date are already in the destination table
    AlreadyLoaded(NaiveDate),
    Ingested(IngestOutcome),
}

/// Load the export for `date` from `dir`
pub async fn run_daily(pipeline: &Pipeline, dir: &Path, date: NaiveDate) -> Result<DailyOutcome> {
    let path = expected_daily_file(dir, date);

    if !path.is_file() {
        warn!(path = %path.display(), "Daily export not found");
        return Ok(DailyOutcome::Missing(path));
    }

    if data_exists_for_date(pipeline.pool(), &pipeline.settings().table_name, date).await? {
        info!(%date, "Calls for this date already loaded, skipping");
        return Ok(DailyOutcome::AlreadyLoaded(date));
    }

    let include = pipeline.settings().include_excluded_column;
    let outcome = pipeline.ingest(&path, include).await?;
    Ok(DailyOutcome::Ingested(outcome))
}

/// A file the directory scan could not load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFailure {
    pub file_name: String,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub imported: Vec<ImportSummary>,
    pub skipped: Vec<String>,
    pub failed: Vec<ScanFailure>,
}

impl ScanReport {
    pub fn total(&self) -> usize {
        self.imported.len() + self.skipped.len() + self.failed.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// `*.csv` files directly under `dir`, sorted by name
pub fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if is_csv && path.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Load every CSV file in `dir`, one at a time
pub async fn run_directory(pipeline: &Pipeline, dir: &Path) -> Result<ScanReport> {
    let files = list_csv_files(dir)?;
    info!(dir = %dir.display(), files = files.len(), "Scanning directory");

    let include = pipeline.settings().include_excluded_column;
    let mut report = ScanReport::default();

    for path in files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match pipeline.ingest(&path, include).await {
            Ok(IngestOutcome::Imported(summary)) => report.imported.push(summary),
            Ok(IngestOutcome::Skipped { file_name }) => report.skipped.push(file_name),
            Err(e) => report.failed.push(ScanFailure {
                file_name,
                kind: e.kind(),
                reason: e.to_string(),
            }),
        }
    }

    info!(
        imported = report.imported.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Directory scan finished"
    );

    Ok(report)
}

/// Time from `now` until the next occurrence of `at`
pub fn next_run_delay(now: NaiveDateTime, at: NaiveTime) -> Duration {
    let today = now.date().and_time(at);
    let next = if today > now {
        today
    } else {
        now.date().succ_opt().unwrap_or(now.date()).and_time(at)
    };

    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Run the daily driver for yesterday at `at` each day until `shutdown`
/// resolves
///
/// Failures are logged and the loop waits for the next day.
pub async fn run_schedule<F>(pipeline: &Pipeline, dir: &Path, at: NaiveTime, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let delay = next_run_delay(Local::now().naive_local(), at);
        info!(next_run_in_secs = delay.as_secs(), at = %at.format("%H:%M"), "Waiting for next daily run");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            _ = &mut shutdown => {
                info!("Scheduler stopped");
                return;
            },
        }

        let date = previous_day(Local::now().date_naive());
        match run_daily(pipeline, dir, date).await {
            Ok(outcome) => info!(%date, outcome = ?outcome, "Daily run finished"),
            Err(e) => error!(%date, error = %e, kind = e.kind(), "Daily run failed"),
        }
    }
}
