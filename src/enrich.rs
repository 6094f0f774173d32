use std::collections::HashMap;
use tracing::{debug, warn};

use crate::model::{ObservedMessage, ThreadPosition};
use crate::slack::ChatSource;
use crate::transform::{mention_ids, normalize_text};

/// A matched message with the context needed for its sheet row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnrichedMessage {
    pub message: ObservedMessage,
    pub author: String,
    pub channel_name: String,
    /// Message text with mrkdwn sequences resolved.
    pub text: String,
    pub parent_text: String,
    pub thread_replies: Vec<String>,
    pub permalink: String,
}

/// Resolves thread context, author, channel and permalink for matched
/// messages. Lookups are cached for the lifetime of the enricher (one run).
///
/// A failing lookup never fails the message: the affected field falls back
/// to a placeholder (raw id or empty string).
pub struct Enricher<'a, C: ChatSource + ?Sized> {
    chat: &'a C,
    user_names: HashMap<String, String>,
    channel_names: HashMap<String, String>,
}

impl<'a, C: ChatSource + ?Sized> Enricher<'a, C> {
    pub fn new(chat: &'a C) -> Self {
        Self {
            chat,
            user_names: HashMap::new(),
            channel_names: HashMap::new(),
        }
    }

    pub async fn enrich(&mut self, message: ObservedMessage) -> EnrichedMessage {
        let author = match message.user.as_deref() {
            Some(user_id) => self.user_name(user_id).await,
            None => String::new(),
        };
        let channel_name = self.channel_name(&message.channel_id).await;
        let permalink = self.permalink(&message).await;
        let (parent_raw, replies_raw) = self.thread_context(&message).await;

        let mut names = HashMap::new();
        let texts = std::iter::once(&message.text)
            .chain(parent_raw.iter())
            .chain(replies_raw.iter());
        for text in texts {
            for id in mention_ids(text) {
                if !names.contains_key(&id) {
                    let name = self.user_name(&id).await;
                    names.insert(id, name);
                }
            }
        }

        EnrichedMessage {
            author,
            channel_name,
            text: normalize_text(&message.text, &names),
            parent_text: parent_raw
                .map(|t| normalize_text(&t, &names))
                .unwrap_or_default(),
            thread_replies: replies_raw
                .iter()
                .map(|t| normalize_text(t, &names))
                .collect(),
            permalink,
            message,
        }
    }

    async fn user_name(&mut self, user_id: &str) -> String {
        if let Some(name) = self.user_names.get(user_id) {
            return name.clone();
        }
        // fallbacks are cached too, so a failing lookup is tried once per run
        let name = match self.chat.user_display_name(user_id).await {
            Ok(name) => name,
            Err(e) => {
                warn!(user_id, error = %e, "user lookup failed, using raw id");
                user_id.to_string()
            }
        };
        self.user_names.insert(user_id.to_string(), name.clone());
        name
    }

    async fn channel_name(&mut self, channel_id: &str) -> String {
        if let Some(name) = self.channel_names.get(channel_id) {
            return name.clone();
        }
        let name = match self.chat.channel_name(channel_id).await {
            Ok(name) => name,
            Err(e) => {
                warn!(channel_id, error = %e, "channel lookup failed, using raw id");
                channel_id.to_string()
            }
        };
        self.channel_names.insert(channel_id.to_string(), name.clone());
        name
    }

    async fn permalink(&self, message: &ObservedMessage) -> String {
        match self.chat.permalink(&message.channel_id, &message.ts).await {
            Ok(link) => link,
            Err(e) => {
                warn!(ts = %message.ts, error = %e, "permalink lookup failed");
                String::new()
            }
        }
    }

    /// Parent text (unless the message is the root) and the other replies.
    async fn thread_context(&self, message: &ObservedMessage) -> (Option<String>, Vec<String>) {
        let Some(thread_ts) = message.thread_ts.as_deref() else {
            return (None, Vec::new());
        };

        let thread = match self.chat.thread_replies(&message.channel_id, thread_ts).await {
            Ok(thread) => thread,
            Err(e) => {
                warn!(ts = %message.ts, error = %e, "thread fetch failed");
                return (None, Vec::new());
            }
        };
        debug!(ts = %message.ts, replies = thread.len(), "fetched thread");

        let mut iter = thread.into_iter();
        let parent = match (iter.next(), message.thread_position()) {
            (Some(root), ThreadPosition::Reply) => Some(root.text),
            _ => None,
        };
        let replies = iter
            .filter(|m| m.ts != message.ts)
            .map(|m| m.text)
            .collect();
        (parent, replies)
    }
}
