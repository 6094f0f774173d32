use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::enrich::EnrichedMessage;
use crate::filter::TriggerMatch;

/// Google Sheets rejects cells longer than this.
pub const MAX_CELL_CHARS: usize = 50_000;

pub const HEADERS: [&str; 10] = [
    "Timestamp",
    "Category",
    "User",
    "Channel",
    "Message",
    "Parent Message",
    "Thread Replies",
    "Link",
    "Trigger Emojis",
    "Thread",
];

/// Column letter of the last header, for A1 ranges.
pub const LAST_COLUMN: char = 'J';

static ANGLE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^<>\s][^<>]*)>").expect("valid regex"));

/// One forwarded message, in sheet column order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SheetRow {
    pub timestamp: String,
    pub category: String,
    pub user: String,
    pub channel: String,
    pub message: String,
    pub parent_message: String,
    pub thread_replies: String,
    pub link: String,
    pub trigger_emojis: String,
    pub thread: String,
}

impl SheetRow {
    pub fn headers() -> Vec<String> {
        HEADERS.iter().map(|h| h.to_string()).collect()
    }

    pub fn to_cells(&self) -> Vec<String> {
        [
            &self.timestamp,
            &self.category,
            &self.user,
            &self.channel,
            &self.message,
            &self.parent_message,
            &self.thread_replies,
            &self.link,
            &self.trigger_emojis,
            &self.thread,
        ]
        .into_iter()
        .map(|cell| truncate_cell(cell))
        .collect()
    }
}

pub fn build_row(matched: &TriggerMatch, enriched: &EnrichedMessage) -> SheetRow {
    SheetRow {
        timestamp: format_timestamp(&enriched.message.ts),
        category: matched.category.clone(),
        user: enriched.author.clone(),
        channel: enriched.channel_name.clone(),
        message: enriched.text.clone(),
        parent_message: enriched.parent_text.clone(),
        thread_replies: enriched.thread_replies.join("\n"),
        link: enriched.permalink.clone(),
        trigger_emojis: matched.all_emojis.join(", "),
        thread: enriched.message.thread_position().label().to_string(),
    }
}

/// Render a Slack `ts` ("1700000000.000100") as a UTC timestamp. Values that
/// do not parse are returned unchanged.
pub fn format_timestamp(ts: &str) -> String {
    if ts.is_empty() {
        return "Unknown".to_string();
    }

    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let parsed = secs.parse::<i64>().ok().zip(parse_micros(frac));
    match parsed.and_then(|(secs, micros)| Utc.timestamp_opt(secs, micros * 1_000).single()) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => ts.to_string(),
    }
}

fn parse_micros(frac: &str) -> Option<u32> {
    if frac.is_empty() || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let padded: String = frac.chars().chain(std::iter::repeat('0')).take(6).collect();
    padded.parse().ok()
}

/// User ids referenced by `<@U…>` mentions, in order of appearance.
pub fn mention_ids(text: &str) -> Vec<String> {
    let mut ids = Vec::new();
    for cap in ANGLE_TOKEN.captures_iter(text) {
        if let Some(rest) = cap[1].strip_prefix('@') {
            let id = rest.split('|').next().unwrap_or(rest).to_string();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

/// Convert Slack mrkdwn control sequences to plain text.
///
/// `names` maps user ids to display names for `<@U…>` mentions; unknown ids
/// fall back to the inline label, then the raw id.
pub fn normalize_text(text: &str, names: &HashMap<String, String>) -> String {
    let replaced = ANGLE_TOKEN.replace_all(text, |cap: &regex::Captures| {
        let inner = &cap[1];
        let (target, label) = match inner.split_once('|') {
            Some((target, label)) => (target, Some(label)),
            None => (inner, None),
        };

        if let Some(id) = target.strip_prefix('@') {
            let name = names
                .get(id)
                .map(String::as_str)
                .or(label)
                .unwrap_or(id);
            format!("@{}", name)
        } else if let Some(id) = target.strip_prefix('#') {
            format!("#{}", label.unwrap_or(id))
        } else if let Some(special) = target.strip_prefix('!') {
            match label {
                Some(label) => label.to_string(),
                None => format!("@{}", special),
            }
        } else {
            let url = target.strip_prefix("mailto:").unwrap_or(target);
            match label {
                Some(label) if label != url => format!("{} ({})", label, url),
                _ => url.to_string(),
            }
        }
    });

    replaced
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

pub fn truncate_cell(value: &str) -> String {
    match value.char_indices().nth(MAX_CELL_CHARS) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}
