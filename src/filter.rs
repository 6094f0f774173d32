use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::ObservedMessage;

/// Maps one trigger emoji to the category label written to the sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub emoji: String,
    pub category: String,
}

impl TriggerRule {
    pub fn new(emoji: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            emoji: emoji_name(&emoji.into()).to_string(),
            category: category.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerMatch {
    pub emoji: String,
    pub category: String,
    /// Every whitelisted emoji on the message, in whitelist order.
    pub all_emojis: Vec<String>,
}

/// Ordered emoji whitelist.
///
/// Emoji names compare case-sensitively. When a message carries several
/// whitelisted emojis, the rule declared first wins.
#[derive(Debug, Clone, Default)]
pub struct TriggerFilter {
    rules: Vec<TriggerRule>,
}

impl TriggerFilter {
    pub fn new(rules: Vec<TriggerRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| TriggerRule::new(rule.emoji, rule.category))
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[TriggerRule] {
        &self.rules
    }

    pub fn match_message(&self, message: &ObservedMessage) -> Option<TriggerMatch> {
        let present: Vec<&TriggerRule> = self
            .rules
            .iter()
            .filter(|rule| message.reactions.iter().any(|r| r == &rule.emoji))
            .collect();

        let first = present.first()?;
        debug!(ts = %message.ts, emoji = %first.emoji, category = %first.category, "trigger matched");
        Some(TriggerMatch {
            emoji: first.emoji.clone(),
            category: first.category.clone(),
            all_emojis: present.iter().map(|rule| rule.emoji.clone()).collect(),
        })
    }
}

/// Canonical emoji name: `:form:`, `:form` and `form` all name `form`.
pub fn emoji_name(name: &str) -> &str {
    name.trim().trim_matches(':')
}
