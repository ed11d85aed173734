//! Bulk loading into the destination table
//!
//! Each batch is encoded as CSV in memory and streamed with
//! `COPY ... FROM STDIN`, so a batch commits or fails as a unit. The column
//! list comes from the batch, which lets files with different layouts load
//! into the subset of columns they carry.

use csv::WriterBuilder;
use sqlx::PgConnection;
use tracing::{debug, warn};

use crate::db::{column_list, quote_ident, quote_qualified};
use crate::error::{IngestError, Result};
use crate::models::{NormalizedBatch, Value};
use crate::normalizer::column_sql_type;

/// Bytes sent per COPY data message
const COPY_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct BulkWriter {
    table: String,
}

impl BulkWriter {
    pub fn new(table_name: &str) -> Result<Self> {
        Ok(Self {
            table: quote_qualified(table_name)?,
        })
    }

    /// Quoted, validated destination table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the destination table from the batch's columns if absent
    ///
    /// An existing table is left as is, whatever its columns.
    pub async fn ensure_table(&self, conn: &mut PgConnection, batch: &NormalizedBatch) -> Result<()> {
        sqlx::query(&self.create_table_sql(&batch.columns))
            .execute(&mut *conn)
            .await
            .map_err(|source| IngestError::Load {
                batch: batch.index,
                source,
            })?;

        debug!(table = %self.table, columns = batch.columns.len(), "Destination table ready");
        Ok(())
    }

    /// Stream one batch with COPY; returns the server's row count
    pub async fn write_batch(&self, conn: &mut PgConnection, batch: &NormalizedBatch) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let payload = encode_csv(batch)?;
        let load_err = |source| IngestError::Load {
            batch: batch.index,
            source,
        };

        let mut copy = conn
            .copy_in_raw(&self.copy_sql(&batch.columns))
            .await
            .map_err(load_err)?;

        for chunk in payload.chunks(COPY_CHUNK_BYTES) {
            let sent = copy.send(chunk).await.map(|_| ());
            if let Err(e) = sent {
                if let Err(abort_err) = copy.abort(e.to_string()).await {
                    warn!(error = %abort_err, "COPY abort failed");
                }
                return Err(load_err(e));
            }
        }

        copy.finish().await.map_err(load_err)
    }

    fn create_table_sql(&self, columns: &[String]) -> String {
        let definitions = columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(c), column_sql_type(c)))
            .collect::<Vec<_>>()
            .join(", ");

        format!("CREATE TABLE IF NOT EXISTS {} ({})", self.table, definitions)
    }

    fn copy_sql(&self, columns: &[String]) -> String {
        let cols = column_list(columns);
        format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT csv, FORCE_NULL ({}))",
            self.table, cols, cols
        )
    }
}

/// CSV payload without header; null is an empty field
fn encode_csv(batch: &NormalizedBatch) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::with_capacity(batch.len() * 128));

    for row in &batch.rows {
        writer.write_record(row.iter().map(Value::to_copy_field))?;
    }

    writer
        .into_inner()
        .map_err(|e| IngestError::Io(e.into_error()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn batch(columns: &[&str], rows: Vec<Vec<Value>>) -> NormalizedBatch {
        NormalizedBatch {
            index: 3,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn test_copy_sql_quotes_everything() {
        let writer = BulkWriter::new("public.call_logs").unwrap();
        let sql = writer.copy_sql(&["date_appel".to_string(), "agent".to_string()]);
        assert_eq!(
            sql,
            "COPY \"public\".\"call_logs\" (\"date_appel\", \"agent\") FROM STDIN \
             WITH (FORMAT csv, FORCE_NULL (\"date_appel\", \"agent\"))"
        );
    }

    #[test]
    fn test_create_table_sql_uses_column_types() {
        let writer = BulkWriter::new("call_logs").unwrap();
        let sql = writer.create_table_sql(&[
            "date_appel".to_string(),
            "duree_appel".to_string(),
            "agent".to_string(),
        ]);
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"call_logs\" (\"date_appel\" DATE, \"duree_appel\" BIGINT, \"agent\" TEXT)"
        );
    }

    #[test]
    fn test_invalid_table_rejected() {
        assert!(matches!(
            BulkWriter::new("logs; drop"),
            Err(IngestError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_encode_csv_nulls_and_quoting() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let b = batch(
            &["date_appel", "duree_appel", "agent", "note"],
            vec![
                vec![
                    Value::Date(date),
                    Value::Integer(12),
                    Value::Text("Dupont, Jean".into()),
                    Value::Null,
                ],
                vec![
                    Value::Timestamp(date.and_hms_opt(8, 5, 0).unwrap()),
                    Value::Null,
                    Value::Text("say \"hi\"".into()),
                    Value::Text("x".into()),
                ],
            ],
        );

        let payload = String::from_utf8(encode_csv(&b).unwrap()).unwrap();
        assert_eq!(
            payload,
            "2024-03-05,12,\"Dupont, Jean\",\n2024-03-05 08:05:00,,\"say \"\"hi\"\"\",x\n"
        );
    }
}
