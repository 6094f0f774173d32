use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "reaction_logger")]
#[command(about = "Copy emoji-tagged Slack messages into a Google Sheets tab, once each")]
#[command(version)]
pub struct Args {
    /// Slack channel to watch
    #[arg(long, value_name = "CHANNEL_ID")]
    pub channel_id: Option<String>,

    /// Target Google Sheets spreadsheet ID
    #[arg(long, value_name = "SPREADSHEET_ID")]
    pub spreadsheet_id: Option<String>,

    /// Tab the rows are appended to
    #[arg(long, value_name = "NAME")]
    pub sheet_name: Option<String>,

    /// Checkpoint file of already forwarded messages
    #[arg(long, value_name = "PATH")]
    pub state_path: Option<String>,

    /// Run a single cycle then exit
    #[arg(long)]
    pub once: bool,

    /// Test the Slack and Google Sheets connections then exit
    #[arg(long)]
    pub check: bool,

    /// Write rows to a local CSV file instead of the spreadsheet
    #[arg(long)]
    pub dry_run: bool,

    /// CSV file used by --dry-run
    #[arg(long, value_name = "PATH", requires = "dry_run")]
    pub csv_path: Option<String>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Path to config file
    #[arg(long, default_value = "config/config.toml")]
    pub config: String,
}
