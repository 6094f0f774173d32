use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use google_sheets4::api::ValueRange;
use google_sheets4::{hyper, hyper_rustls, Sheets};
use serde_json::Value;
use tracing::{debug, info};

use crate::transform::LAST_COLUMN;
use crate::writer::RowSink;

pub type SheetsHub = Sheets<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>;

/// Appends rows to one tab of a Google spreadsheet.
pub struct SheetsSink {
    hub: SheetsHub,
    spreadsheet_id: String,
    sheet_name: String,
}

impl SheetsSink {
    pub fn new(hub: SheetsHub, spreadsheet_id: String, sheet_name: String) -> Self {
        Self {
            hub,
            spreadsheet_id,
            sheet_name,
        }
    }
}

#[async_trait]
impl RowSink for SheetsSink {
    async fn is_empty(&self) -> Result<bool> {
        let range = header_range(&self.sheet_name);
        debug!("Checking header range {}", range);

        let (_, value_range) = self
            .hub
            .spreadsheets()
            .values_get(&self.spreadsheet_id, &range)
            .doit()
            .await
            .map_err(|e| anyhow!("Failed to read range {}: {}", range, e))?;

        Ok(value_range
            .values
            .map_or(true, |rows| rows.iter().all(|row| row.is_empty())))
    }

    async fn append_rows(&self, rows: Vec<Vec<String>>) -> Result<()> {
        let range = append_range(&self.sheet_name);
        let row_count = rows.len();
        let request = ValueRange {
            values: Some(
                rows.into_iter()
                    .map(|row| row.into_iter().map(Value::String).collect())
                    .collect(),
            ),
            ..Default::default()
        };

        let (_, response) = self
            .hub
            .spreadsheets()
            .values_append(request, &self.spreadsheet_id, &range)
            .value_input_option("RAW")
            .insert_data_option("INSERT_ROWS")
            .doit()
            .await
            .map_err(|e| anyhow!("Failed to append to {}: {}", range, e))?;

        let updated_cells = response
            .updates
            .and_then(|u| u.updated_cells)
            .unwrap_or(0);
        info!("Appended {} rows ({} cells) to {}", row_count, updated_cells, range);
        Ok(())
    }

    /// Opens the spreadsheet metadata; fails when the id is unknown, not shared
    /// with the service account, or has no tab named `sheet_name`.
    async fn verify(&self) -> Result<String> {
        let (_, spreadsheet) = self
            .hub
            .spreadsheets()
            .get(&self.spreadsheet_id)
            .doit()
            .await
            .map_err(|e| anyhow!("Failed to open spreadsheet {}: {}", self.spreadsheet_id, e))?;

        let title = spreadsheet
            .properties
            .and_then(|p| p.title)
            .unwrap_or_else(|| "Unknown".to_string());
        let tabs: Vec<String> = spreadsheet
            .sheets
            .unwrap_or_default()
            .into_iter()
            .filter_map(|sheet| sheet.properties.and_then(|p| p.title))
            .collect();
        ensure_tab(&tabs, &self.sheet_name)
            .with_context(|| format!("spreadsheet '{}' cannot be used", title))?;

        Ok(format!("'{}' tab '{}'", title, self.sheet_name))
    }

    fn describe(&self) -> String {
        format!("spreadsheet {} tab {}", self.spreadsheet_id, self.sheet_name)
    }
}

fn ensure_tab(tabs: &[String], sheet_name: &str) -> Result<()> {
    if tabs.iter().any(|tab| tab == sheet_name) {
        return Ok(());
    }
    Err(anyhow!(
        "no tab named '{}' (found: {})",
        sheet_name,
        tabs.join(", ")
    ))
}

/// Sheet name as written in A1 notation: quoted unless it is a plain word.
pub fn quote_sheet_name(name: &str) -> String {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

pub fn header_range(sheet_name: &str) -> String {
    format!("{}!A1:{}1", quote_sheet_name(sheet_name), LAST_COLUMN)
}

pub fn append_range(sheet_name: &str) -> String {
    format!("{}!A:{}", quote_sheet_name(sheet_name), LAST_COLUMN)
}
