//! Chunked CSV reader
//!
//! Opens a call-log export with the first encoding on the ladder that
//! decodes it cleanly, then yields fixed-size batches of raw text rows on
//! demand. The encoding chosen for the header is kept for the whole file.
//!
//! # Format
//! Comma separated, `"` quoted, with both `""` and `\"` accepted as an
//! escaped quote inside a quoted field. Values stay text; the tokens
//! `""`, `NA` and `NULL` become null. Lines whose field count differs from
//! the header are skipped with a warning.

use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::encoding::{candidate_ladder, probe, Candidate, DecodingReader, MalformedInput};
use crate::error::{IngestError, Result};
use crate::models::RawBatch;

/// Field values read as null
pub const NULL_TOKENS: [&str; 3] = ["", "NA", "NULL"];

/// Options for [`ChunkedReader::open`]
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Rows per batch
    pub chunk_size: usize,
    /// Column left out of every batch (trimmed, case-insensitive match)
    pub drop_column: Option<String>,
    /// First encoding to try, usually from detection
    pub encoding_hint: Option<String>,
    /// Decoded bytes validated per candidate; `None` validates the whole file
    pub probe_limit: Option<u64>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            chunk_size: calllog_common::config::DEFAULT_CHUNK_SIZE,
            drop_column: None,
            encoding_hint: None,
            probe_limit: None,
        }
    }
}

/// Lazy batch iterator over one file
pub struct ChunkedReader {
    path: PathBuf,
    csv: csv::Reader<DecodingReader<File>>,
    encoding: Candidate,
    columns: Vec<String>,
    selected: Vec<usize>,
    header_len: usize,
    chunk_size: usize,
    record: StringRecord,
    next_index: usize,
    skipped: u64,
    done: bool,
}

impl ChunkedReader {
    /// Pick an encoding, read the header and prepare the column filter
    pub fn open(path: &Path, options: ReaderOptions) -> Result<Self> {
        let ladder = candidate_ladder(options.encoding_hint.as_deref());
        Self::open_with_ladder(path, &ladder, options)
    }

    fn open_with_ladder(path: &Path, ladder: &[Candidate], options: ReaderOptions) -> Result<Self> {
        let encoding = select_encoding(path, ladder, options.probe_limit)?;
        info!(path = %path.display(), encoding = encoding.label, "File read with encoding");

        let file = File::open(path)?;
        let mut csv = csv_builder().from_reader(DecodingReader::new(file, encoding.encoding));

        let header = csv
            .headers()
            .map_err(|e| classify(e, encoding.label))?
            .clone();
        let (columns, selected) = select_columns(&header, options.drop_column.as_deref());

        if columns.len() < header.len() {
            debug!(
                path = %path.display(),
                dropped = ?options.drop_column,
                "Excluded column left out of the load"
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            csv,
            encoding,
            columns,
            selected,
            header_len: header.len(),
            chunk_size: options.chunk_size.max(1),
            record: StringRecord::new(),
            next_index: 0,
            skipped: 0,
            done: false,
        })
    }

    /// Encoding label the file is being decoded with
    pub fn used_encoding(&self) -> &'static str {
        self.encoding.label
    }

    /// Output columns, in file order, after the drop filter
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Malformed lines skipped so far
    pub fn skipped_rows(&self) -> u64 {
        self.skipped
    }
}

impl Iterator for ChunkedReader {
    type Item = Result<RawBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut rows = Vec::with_capacity(self.chunk_size.min(4096));

        while rows.len() < self.chunk_size {
            match self.csv.read_record(&mut self.record) {
                Ok(true) => {
                    if self.record.len() != self.header_len {
                        self.skipped += 1;
                        warn!(
                            path = %self.path.display(),
                            line = self.record.position().map(|p| p.line()),
                            expected = self.header_len,
                            found = self.record.len(),
                            "Skipping malformed line"
                        );
                        continue;
                    }

                    let row = self
                        .selected
                        .iter()
                        .map(|&i| null_marker(&self.record[i]))
                        .collect();
                    rows.push(row);
                },
                Ok(false) => {
                    self.done = true;
                    break;
                },
                Err(e) => {
                    self.done = true;
                    return Some(Err(classify(e, self.encoding.label)));
                },
            }
        }

        if rows.is_empty() {
            return None;
        }

        let batch = RawBatch {
            index: self.next_index,
            columns: self.columns.clone(),
            rows,
        };
        self.next_index += 1;

        Some(Ok(batch))
    }
}

fn csv_builder() -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder
        .delimiter(b',')
        .quote(b'"')
        .double_quote(true)
        .escape(Some(b'\\'))
        .has_headers(true)
        .flexible(true);
    builder
}

/// First candidate that decodes the file, or the last decode error
fn select_encoding(path: &Path, ladder: &[Candidate], limit: Option<u64>) -> Result<Candidate> {
    let mut last_error = None;

    for candidate in ladder {
        match probe(path, candidate.encoding, limit) {
            Ok(()) => return Ok(*candidate),
            Err(e) => match MalformedInput::from_io(&e) {
                Some(malformed) => {
                    warn!(
                        path = %path.display(),
                        encoding = candidate.label,
                        error = %malformed,
                        "Decoding failed, trying next encoding"
                    );
                    last_error = Some(malformed);
                },
                None => return Err(IngestError::Io(e)),
            },
        }
    }

    Err(IngestError::DecodeExhausted {
        path: path.to_path_buf(),
        tried: ladder.iter().map(|c| c.label.to_string()).collect(),
        source: last_error.unwrap_or(MalformedInput {
            encoding: "none",
            offset: 0,
        }),
    })
}

/// Output column names and the source indices they come from
fn select_columns(header: &StringRecord, drop: Option<&str>) -> (Vec<String>, Vec<usize>) {
    let drop = drop.map(|d| d.trim().to_uppercase());

    header
        .iter()
        .enumerate()
        .filter(|(_, name)| drop.as_deref() != Some(name.trim().to_uppercase().as_str()))
        .map(|(i, name)| (name.to_string(), i))
        .unzip()
}

fn null_marker(field: &str) -> Option<String> {
    if NULL_TOKENS.contains(&field) {
        None
    } else {
        Some(field.to_string())
    }
}

fn classify(err: csv::Error, encoding: &str) -> IngestError {
    if let csv::ErrorKind::Io(io_err) = err.kind() {
        if let Some(source) = MalformedInput::from_io(io_err) {
            return IngestError::Decode {
                encoding: encoding.to_string(),
                source,
            };
        }
    }
    IngestError::Csv(err)
}
