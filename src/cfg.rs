use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

use crate::args::Args;
use crate::filter::{emoji_name, TriggerRule};

const PLACEHOLDER_CHANNEL: &str = "YOUR_CHANNEL_ID";
const PLACEHOLDER_SPREADSHEET: &str = "YOUR_SPREADSHEET_ID";

/// Slack's upper bound for `conversations.history`.
const MAX_HISTORY_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Cfg {
    pub channel_id: String,
    pub history_limit: u32,
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub credentials_path: String,
    pub state_path: String,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    #[serde(skip_serializing)]
    pub slack_bot_token: SlackToken,
    /// Emoji whitelist; earlier entries win when a message carries several.
    pub triggers: Vec<TriggerRule>,
    pub output_csv: OutputCsvConfig,

    #[serde(skip)]
    pub once: bool,
    #[serde(skip)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct OutputCsvConfig {
    pub path: String,
    pub ensure: bool,
}

/// Bot token; never shown in logs.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SlackToken(String);

impl SlackToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SlackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str("[REDACTED]")
        }
    }
}

impl Cfg {
    pub fn load(args: Args) -> Result<Self> {
        info!("Loading configuration from: {}", args.config);

        let mut cfg = Self::from_file(&args.config)?;

        if let Ok(token) = std::env::var("SLACK_BOT_TOKEN") {
            if !token.trim().is_empty() {
                debug!("Using Slack token from SLACK_BOT_TOKEN");
                cfg.slack_bot_token = SlackToken::new(token);
            }
        }

        cfg.apply_args(args);
        debug!("Final configuration: {:?}", cfg);
        Ok(cfg)
    }

    /// Defaults, overlaid by the (optional) config file, overlaid by
    /// `REACTION_LOGGER_*` environment variables.
    pub fn from_file(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            debug!("Config file not found, using defaults and environment");
        }

        let built = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("REACTION_LOGGER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path))?;

        built
            .try_deserialize()
            .with_context(|| format!("invalid configuration in {}", path))
    }

    fn apply_args(&mut self, args: Args) {
        if let Some(channel_id) = args.channel_id {
            debug!("Overriding channel_id from command line");
            self.channel_id = channel_id;
        }
        if let Some(spreadsheet_id) = args.spreadsheet_id {
            debug!("Overriding spreadsheet_id from command line");
            self.spreadsheet_id = spreadsheet_id;
        }
        if let Some(sheet_name) = args.sheet_name {
            debug!("Overriding sheet_name from command line");
            self.sheet_name = sheet_name;
        }
        if let Some(state_path) = args.state_path {
            debug!("Overriding state_path from command line");
            self.state_path = state_path;
        }
        if let Some(csv_path) = args.csv_path {
            debug!("Overriding output_csv.path from command line");
            self.output_csv.path = csv_path;
        }
        self.once = args.once;
        self.dry_run = args.dry_run;
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_id.trim().is_empty() || self.channel_id == PLACEHOLDER_CHANNEL {
            anyhow::bail!("channel_id must be set to a Slack channel ID");
        }
        if self.history_limit == 0 || self.history_limit > MAX_HISTORY_LIMIT {
            anyhow::bail!(
                "history_limit must be between 1 and {}, found: {}",
                MAX_HISTORY_LIMIT,
                self.history_limit
            );
        }
        if self.slack_bot_token.is_empty() {
            anyhow::bail!("slack_bot_token (or SLACK_BOT_TOKEN) must be set");
        }

        if self.dry_run {
            if self.output_csv.path.trim().is_empty() {
                anyhow::bail!("output_csv.path cannot be empty in dry-run mode");
            }
        } else {
            if self.spreadsheet_id.trim().is_empty() || self.spreadsheet_id == PLACEHOLDER_SPREADSHEET {
                anyhow::bail!("spreadsheet_id must be set to a valid Google Sheets ID");
            }
            if !Path::new(&self.credentials_path).is_file() {
                anyhow::bail!(
                    "Credentials file not found: {}",
                    self.credentials_path
                );
            }
        }
        if self.sheet_name.trim().is_empty() {
            anyhow::bail!("sheet_name cannot be empty");
        }
        if self.state_path.trim().is_empty() {
            anyhow::bail!("state_path cannot be empty");
        }

        if self.triggers.is_empty() {
            anyhow::bail!("at least one trigger emoji must be configured");
        }
        let mut seen = HashSet::new();
        for rule in &self.triggers {
            let emoji = emoji_name(&rule.emoji);
            if emoji.is_empty() {
                anyhow::bail!("trigger emoji names cannot be empty");
            }
            if rule.category.trim().is_empty() {
                anyhow::bail!("trigger :{}: has an empty category", emoji);
            }
            if !seen.insert(emoji.to_string()) {
                anyhow::bail!("trigger :{}: is configured more than once", emoji);
            }
        }

        if !self.once && self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be > 0 unless running with --once");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be > 0");
        }

        info!(
            "Configuration validation passed: channel {}, {} trigger emojis",
            self.channel_id,
            self.triggers.len()
        );
        Ok(())
    }
}

impl Default for Cfg {
    fn default() -> Self {
        Self {
            channel_id: PLACEHOLDER_CHANNEL.to_string(),
            history_limit: 100,
            spreadsheet_id: PLACEHOLDER_SPREADSHEET.to_string(),
            sheet_name: "Sheet1".to_string(),
            credentials_path: "credentials.json".to_string(),
            state_path: "slack_monitor_state.json".to_string(),
            poll_interval_secs: 300,
            request_timeout_secs: 30,
            slack_bot_token: SlackToken::default(),
            triggers: Vec::new(),
            output_csv: OutputCsvConfig::default(),
            once: false,
            dry_run: false,
        }
    }
}

impl Default for OutputCsvConfig {
    fn default() -> Self {
        Self {
            path: "reaction_log.csv".to_string(),
            ensure: true,
        }
    }
}
