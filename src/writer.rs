use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::transform::SheetRow;

/// Destination of forwarded rows.
#[async_trait]
pub trait RowSink: Send + Sync {
    /// True when the destination has no header row yet.
    async fn is_empty(&self) -> Result<bool>;

    /// Append rows in order. Returns once the destination confirmed the write.
    async fn append_rows(&self, rows: Vec<Vec<String>>) -> Result<()>;

    /// Fails when the destination cannot be written to at all (unknown
    /// spreadsheet or tab, unusable directory).
    async fn verify(&self) -> Result<String>;

    fn describe(&self) -> String;
}

/// Writes one row per forwarded message, adding the header row before the
/// first data row when the destination is empty.
pub struct RowWriter<'a, S: RowSink + ?Sized> {
    sink: &'a S,
    header_ready: bool,
}

impl<'a, S: RowSink + ?Sized> RowWriter<'a, S> {
    pub fn new(sink: &'a S) -> Self {
        Self {
            sink,
            header_ready: false,
        }
    }

    pub async fn ensure_header(&mut self) -> Result<()> {
        if self.header_ready {
            return Ok(());
        }
        if self.sink.is_empty().await? {
            self.sink.append_rows(vec![SheetRow::headers()]).await?;
            info!("Added headers to {}", self.sink.describe());
        } else {
            debug!("Header row already present in {}", self.sink.describe());
        }
        self.header_ready = true;
        Ok(())
    }

    pub async fn write(&mut self, row: &SheetRow) -> Result<()> {
        self.ensure_header()
            .await
            .context("failed to ensure header row")?;
        self.sink
            .append_rows(vec![row.to_cells()])
            .await
            .with_context(|| format!("failed to append row to {}", self.sink.describe()))
    }
}
