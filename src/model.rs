use serde::{Deserialize, Serialize};
use std::fmt;

/// Checkpoint key of a message: `<channel_id>:<ts>`.
///
/// Slack message timestamps are only unique within a channel, so the channel
/// id is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageKey(String);

impl MessageKey {
    pub fn new(channel_id: &str, ts: &str) -> Self {
        Self(format!("{}:{}", channel_id, ts))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A channel message as fetched for one run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObservedMessage {
    pub channel_id: String,
    pub ts: String,
    /// Absent for bot and integration posts.
    pub user: Option<String>,
    pub text: String,
    pub thread_ts: Option<String>,
    /// Reaction emoji names, in the order the platform reports them.
    pub reactions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPosition {
    Standalone,
    Root,
    Reply,
}

impl ThreadPosition {
    /// Value of the thread indicator column.
    pub fn label(self) -> &'static str {
        match self {
            ThreadPosition::Standalone => "",
            ThreadPosition::Root => "root",
            ThreadPosition::Reply => "reply",
        }
    }
}

impl ObservedMessage {
    pub fn key(&self) -> MessageKey {
        MessageKey::new(&self.channel_id, &self.ts)
    }

    pub fn thread_position(&self) -> ThreadPosition {
        match self.thread_ts.as_deref() {
            None => ThreadPosition::Standalone,
            Some(thread_ts) if thread_ts == self.ts => ThreadPosition::Root,
            Some(_) => ThreadPosition::Reply,
        }
    }
}
