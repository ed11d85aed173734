//! Batch and outcome types shared by the pipeline stages

use chrono::{NaiveDate, NaiveDateTime};

/// A slice of raw rows sharing one header
///
/// Each row is positionally aligned with `columns`; `None` is the null
/// marker produced for empty, `NA` and `NULL` fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBatch {
    /// Zero-based position of the batch within its file
    pub index: usize,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A typed field value after normalization
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Field as written in a `COPY ... (FORMAT csv)` payload; null is empty
    pub fn to_copy_field(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Timestamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        }
    }
}

/// Normalized rows with canonical column names
///
/// The column list comes from the batch itself, so files with different
/// layouts load into whatever subset of destination columns they carry.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    pub index: usize,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl NormalizedBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value of `column` in row `row`, if both exist
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

/// A row of the import ledger
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ImportLedgerEntry {
    pub file_name: String,
    pub imported_at: NaiveDateTime,
}

/// Statistics for a file that was loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub file_name: String,
    /// Encoding label the file was decoded with
    pub encoding: String,
    pub batches: usize,
    pub rows_written: u64,
    /// Malformed lines dropped by the reader
    pub skipped_rows: u64,
}

/// Terminal state of one `ingest` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Imported(ImportSummary),
    /// The ledger already lists the file
    Skipped { file_name: String },
}

impl IngestOutcome {
    pub fn file_name(&self) -> &str {
        match self {
            IngestOutcome::Imported(summary) => &summary.file_name,
            IngestOutcome::Skipped { file_name } => file_name,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, IngestOutcome::Skipped { .. })
    }
}
