//! View export to CSV

use futures::StreamExt;
use sqlx::PgPool;
use std::io::Write;
use tracing::info;

use crate::db::quote_qualified;
use crate::error::{IngestError, Result};

/// Stream `SELECT * FROM <view>` as CSV with a header into `out`
///
/// Returns the number of bytes written.
pub async fn export_view<W: Write>(pool: &PgPool, view_name: &str, out: &mut W) -> Result<u64> {
    let view = quote_qualified(view_name)?;
    let sql = format!("COPY (SELECT * FROM {}) TO STDOUT WITH (FORMAT csv, HEADER true)", view);

    let mut conn = pool.acquire().await.map_err(IngestError::Connection)?;
    let mut stream = conn.copy_out_raw(&sql).await.map_err(IngestError::Export)?;

    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(IngestError::Export)?;
        out.write_all(&chunk)?;
        written += chunk.len() as u64;
    }
    out.flush()?;

    info!(view = %view, bytes = written, "View exported");
    Ok(written)
}
