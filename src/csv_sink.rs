use anyhow::{Context, Result};
use async_trait::async_trait;
use csv::Writer;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::writer::RowSink;

/// Local CSV file standing in for the spreadsheet (dry runs).
pub struct CsvSink {
    path: PathBuf,
    ensure_directories: bool,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>, ensure_directories: bool) -> Self {
        Self {
            path: path.into(),
            ensure_directories,
        }
    }
}

#[async_trait]
impl RowSink for CsvSink {
    async fn is_empty(&self) -> Result<bool> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len() == 0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e).with_context(|| format!("failed to stat {}", self.path.display())),
        }
    }

    async fn append_rows(&self, rows: Vec<Vec<String>>) -> Result<()> {
        if rows.is_empty() {
            debug!("No rows to append, skipping");
            return Ok(());
        }

        if self.ensure_directories {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
                debug!("Created directory: {:?}", parent);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;

        let mut writer = Writer::from_writer(file);
        for row in &rows {
            writer.write_record(row)?;
        }
        writer.flush()?;

        info!("Appended {} rows to {}", rows.len(), self.path.display());
        Ok(())
    }

    async fn verify(&self) -> Result<String> {
        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = parent {
            if !self.ensure_directories && !dir.is_dir() {
                anyhow::bail!("output directory does not exist: {}", dir.display());
            }
        }
        if self.path.is_dir() {
            anyhow::bail!("output path is a directory: {}", self.path.display());
        }
        Ok(self.describe())
    }

    fn describe(&self) -> String {
        format!("csv file {}", self.path.display())
    }
}
