use crate::domain::model::{ExportResult, Row, TableDescriptor};
use crate::domain::ports::{ArtifactWriter, RowStream, SourceDatabase, StagingStore};
use crate::utils::error::{Result, TransferError};
use tokio_util::sync::CancellationToken;

/// Streams one table into a CSV artifact: a header line from the column
/// names, then one line per row, pushed to staging every `batch_rows` rows.
pub struct RowExporter {
    batch_rows: usize,
    prefix: String,
}

impl RowExporter {
    pub fn new(batch_rows: usize, prefix: impl Into<String>) -> Self {
        Self {
            batch_rows: batch_rows.max(1),
            prefix: prefix.into(),
        }
    }

    pub fn artifact_key(&self, table: &TableDescriptor) -> String {
        table.artifact_key(&self.prefix)
    }

    /// Cancellation is not an error: the artifact is closed as written so far
    /// and the result reports `completed = false`. Any source or staging
    /// failure comes back as `ExportError` for this table only.
    pub async fn export(
        &self,
        source: &dyn SourceDatabase,
        table: &TableDescriptor,
        staging: &dyn StagingStore,
        cancel: &CancellationToken,
    ) -> Result<ExportResult> {
        if cancel.is_cancelled() {
            return Ok(ExportResult::default());
        }

        let key = self.artifact_key(table);
        let mut rows = source
            .stream_rows(table)
            .await
            .map_err(|e| export_error(&table.name, e))?;
        let mut writer = staging
            .open_write(&key)
            .await
            .map_err(|e| export_error(&table.name, e))?;

        let written = self
            .write_artifact(table, &mut rows, writer.as_mut(), cancel)
            .await;
        // The handle is closed on every path, partial or not.
        let closed = writer.finish().await;

        match (written, closed) {
            (Ok(result), Ok(())) => {
                tracing::debug!(
                    "Wrote {} row(s) of '{}' to {} (completed: {})",
                    result.rows_written,
                    table.name,
                    key,
                    result.completed
                );
                Ok(result)
            }
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    tracing::warn!("Closing {} after a failed export: {}", key, close_err);
                }
                Err(export_error(&table.name, e))
            }
            (Ok(_), Err(e)) => Err(export_error(&table.name, e)),
        }
    }

    async fn write_artifact(
        &self,
        table: &TableDescriptor,
        rows: &mut RowStream,
        writer: &mut dyn ArtifactWriter,
        cancel: &CancellationToken,
    ) -> Result<ExportResult> {
        let mut result = ExportResult::default();

        if cancel.is_cancelled() {
            return Ok(result);
        }
        writer.write(&encode_header(&table.columns)?).await?;

        let mut batch: Vec<Row> = Vec::with_capacity(self.batch_rows);
        loop {
            let Some(next) = rows.recv().await else {
                result.completed = true;
                break;
            };
            let row = next?;
            if cancel.is_cancelled() {
                break;
            }

            batch.push(row);
            if batch.len() >= self.batch_rows {
                writer.write(&encode_rows(&batch)?).await?;
                result.rows_written += batch.len() as u64;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            writer.write(&encode_rows(&batch)?).await?;
            result.rows_written += batch.len() as u64;
        }

        Ok(result)
    }
}

/// Errors already attributed to a table pass through unchanged.
fn export_error(table: &str, error: TransferError) -> TransferError {
    match error {
        TransferError::ExportError { .. } => error,
        other => TransferError::export(table, other),
    }
}

fn encode_header(columns: &[String]) -> Result<Vec<u8>> {
    let mut csv = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    csv.write_record(columns)?;
    csv.into_inner().map_err(|e| e.into_error().into())
}

/// Standard CSV quoting; NULL becomes an empty field.
fn encode_rows(rows: &[Row]) -> Result<Vec<u8>> {
    let mut csv = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for row in rows {
        csv.write_record(row.iter().map(|value| value.as_deref().unwrap_or("")))?;
    }
    csv.into_inner().map_err(|e| e.into_error().into())
}
