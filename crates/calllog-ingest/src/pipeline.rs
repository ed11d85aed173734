//! Call-log ingestion pipeline
//!
//! Loads one file exactly once: ledger check, encoding resolution, chunked
//! read, normalization, COPY per batch, then the ledger mark.

use calllog_common::config::IngestSettings;
use sqlx::PgPool;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::encoding::detect_encoding;
use crate::error::{IngestError, Result};
use crate::ledger::LoadTracker;
use crate::models::{ImportSummary, IngestOutcome};
use crate::normalizer::normalize;
use crate::reader::{ChunkedReader, ReaderOptions};
use crate::writer::BulkWriter;

/// File ingestion pipeline
///
/// Holds the shared pool; every [`Pipeline::ingest`] call checks out its
/// own connection for the duration of the file.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pool: PgPool,
    settings: IngestSettings,
    tracker: LoadTracker,
    writer: BulkWriter,
}

impl Pipeline {
    /// Create a pipeline; fails on invalid table names
    pub fn new(pool: PgPool, settings: IngestSettings) -> Result<Self> {
        let tracker = LoadTracker::new(pool.clone(), &settings.ledger_table)?;
        let writer = BulkWriter::new(&settings.table_name)?;

        Ok(Self {
            pool,
            settings,
            tracker,
            writer,
        })
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub fn tracker(&self) -> &LoadTracker {
        &self.tracker
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Load one file
    ///
    /// Returns [`IngestOutcome::Skipped`] when the ledger already lists the
    /// file's base name. Batches committed before a failure stay committed
    /// and the file is not marked, so a rerun loads it again from the start.
    #[instrument(skip(self), fields(file = %path.display()))]
    pub async fn ingest(&self, path: &Path, include_excluded_column: bool) -> Result<IngestOutcome> {
        let started = Instant::now();

        match self.run(path, include_excluded_column).await {
            Ok(outcome) => {
                if let IngestOutcome::Imported(summary) = &outcome {
                    info!(
                        encoding = %summary.encoding,
                        batches = summary.batches,
                        rows = summary.rows_written,
                        skipped_rows = summary.skipped_rows,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "File imported"
                    );
                }
                Ok(outcome)
            },
            Err(e) => {
                error!(error = %e, kind = e.kind(), "File import failed");
                Err(e)
            },
        }
    }

    async fn run(&self, path: &Path, include_excluded_column: bool) -> Result<IngestOutcome> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| IngestError::InvalidPath(path.to_path_buf()))?;

        self.tracker.ensure_schema().await?;
        if self.tracker.already_imported(&file_name).await? {
            warn!(file = %file_name, "File already imported, skipping");
            return Ok(IngestOutcome::Skipped { file_name });
        }

        let guess = detect_encoding(path);
        let drop_column = (!include_excluded_column && !self.settings.excluded_column.is_empty())
            .then(|| self.settings.excluded_column.clone());

        let mut reader = ChunkedReader::open(
            path,
            ReaderOptions {
                chunk_size: self.settings.chunk_size,
                drop_column,
                encoding_hint: Some(guess.label),
                probe_limit: self.settings.encoding_probe_limit,
            },
        )?;

        let mut conn = self.pool.acquire().await.map_err(IngestError::Connection)?;

        let mut batches = 0usize;
        let mut rows_written = 0u64;

        for raw in reader.by_ref() {
            let raw = raw?;
            let batch = normalize(&raw);

            if batches == 0 {
                self.writer.ensure_table(&mut conn, &batch).await?;
            }

            let written = self.writer.write_batch(&mut conn, &batch).await?;
            batches += 1;
            rows_written += written;

            info!(
                batch = batch.index,
                rows = written,
                total = rows_written,
                "Batch inserted"
            );
        }

        if reader.skipped_rows() > 0 {
            warn!(skipped_rows = reader.skipped_rows(), "Malformed lines were skipped");
        }

        self.tracker.mark_imported(&file_name).await?;

        Ok(IngestOutcome::Imported(ImportSummary {
            file_name,
            encoding: reader.used_encoding().to_string(),
            batches,
            rows_written,
            skipped_rows: reader.skipped_rows(),
        }))
    }
}
