//! Slack Web API client: channel history, threads, users and permalinks.
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::ObservedMessage;

const SLACK_API_BASE: &str = "https://slack.com/api/";

#[derive(Debug, Error)]
pub enum SlackError {
    #[error("request to Slack failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Slack API error in {method}: {error}")]
    Api { method: &'static str, error: String },
    #[error("rate limited by Slack in {method} (retry after {retry_after:?}s)")]
    RateLimited {
        method: &'static str,
        retry_after: Option<u64>,
    },
    #[error("unexpected Slack response in {method}: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
    pub user: String,
    pub team: String,
}

/// Read side of the chat platform used by the monitor.
#[async_trait]
pub trait ChatSource: Send + Sync {
    async fn auth_check(&self) -> Result<AuthIdentity, SlackError>;

    /// Most recent messages of a channel, newest first.
    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: u32,
    ) -> Result<Vec<ObservedMessage>, SlackError>;

    /// All messages of a thread, root first.
    async fn thread_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<ObservedMessage>, SlackError>;

    async fn user_display_name(&self, user_id: &str) -> Result<String, SlackError>;

    async fn channel_name(&self, channel_id: &str) -> Result<String, SlackError>;

    async fn permalink(&self, channel_id: &str, ts: &str) -> Result<String, SlackError>;
}

#[derive(Clone)]
pub struct SlackClient {
    http: Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for SlackClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SlackClient {
    pub fn new(token: String, timeout: Duration) -> Result<Self, SlackError> {
        Self::with_base_url(token, timeout, SLACK_API_BASE.to_string())
    }

    pub fn with_base_url(
        token: String,
        timeout: Duration,
        base_url: String,
    ) -> Result<Self, SlackError> {
        let http = Client::builder()
            .user_agent("reaction_logger/0.1")
            .timeout(timeout)
            .build()?;
        let base_url = if base_url.ends_with('/') {
            base_url
        } else {
            format!("{}/", base_url)
        };
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn build_request(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Request, SlackError> {
        Ok(self
            .http
            .get(format!("{}{}", self.base_url, method))
            .bearer_auth(&self.token)
            .query(query)
            .build()?)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        query: &[(&str, &str)],
    ) -> Result<T, SlackError> {
        let request = self.build_request(method, query)?;
        debug!(method, "slack api request");
        let res = self.http.execute(request).await?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = res
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            warn!(method, ?retry_after, "rate limited by Slack");
            return Err(SlackError::RateLimited {
                method,
                retry_after,
            });
        }

        let body: Value = res.error_for_status()?.json().await?;
        decode_envelope(method, body)
    }
}

/// Slack reports failures as `200 {"ok": false, "error": "..."}`.
fn decode_envelope<T: DeserializeOwned>(method: &'static str, body: Value) -> Result<T, SlackError> {
    if !body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        let error = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error")
            .to_string();
        warn!(method, %error, "slack api returned an error");
        return Err(SlackError::Api { method, error });
    }
    serde_json::from_value(body).map_err(|source| SlackError::Decode { method, source })
}

#[async_trait]
impl ChatSource for SlackClient {
    async fn auth_check(&self) -> Result<AuthIdentity, SlackError> {
        let res: AuthTestResponse = self.call("auth.test", &[]).await?;
        Ok(AuthIdentity {
            user: res.user.unwrap_or_else(|| "Unknown".into()),
            team: res.team.unwrap_or_else(|| "Unknown".into()),
        })
    }

    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: u32,
    ) -> Result<Vec<ObservedMessage>, SlackError> {
        let limit = limit.to_string();
        let res: MessagesResponse = self
            .call(
                "conversations.history",
                &[("channel", channel_id), ("limit", limit.as_str())],
            )
            .await?;
        Ok(res.into_observed(channel_id))
    }

    async fn thread_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<ObservedMessage>, SlackError> {
        let res: MessagesResponse = self
            .call(
                "conversations.replies",
                &[("channel", channel_id), ("ts", thread_ts)],
            )
            .await?;
        Ok(res.into_observed(channel_id))
    }

    async fn user_display_name(&self, user_id: &str) -> Result<String, SlackError> {
        let res: UserInfoResponse = self.call("users.info", &[("user", user_id)]).await?;
        Ok(res.user.display_name(user_id))
    }

    async fn channel_name(&self, channel_id: &str) -> Result<String, SlackError> {
        let res: ChannelInfoResponse = self
            .call("conversations.info", &[("channel", channel_id)])
            .await?;
        Ok(match res.channel.name.filter(|n| !n.is_empty()) {
            Some(name) => format!("#{}", name),
            None => channel_id.to_string(),
        })
    }

    async fn permalink(&self, channel_id: &str, ts: &str) -> Result<String, SlackError> {
        let res: PermalinkResponse = self
            .call(
                "chat.getPermalink",
                &[("channel", channel_id), ("message_ts", ts)],
            )
            .await?;
        Ok(res.permalink)
    }
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    user: Option<String>,
    team: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<SlackMessage>,
}

impl MessagesResponse {
    fn into_observed(self, channel_id: &str) -> Vec<ObservedMessage> {
        self.messages
            .into_iter()
            .map(|m| m.into_observed(channel_id))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct SlackMessage {
    #[serde(default)]
    ts: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    reactions: Vec<SlackReaction>,
}

#[derive(Debug, Deserialize)]
struct SlackReaction {
    name: String,
}

impl SlackMessage {
    fn into_observed(self, channel_id: &str) -> ObservedMessage {
        ObservedMessage {
            channel_id: channel_id.to_string(),
            ts: self.ts,
            user: self.user,
            text: self.text,
            thread_ts: self.thread_ts,
            reactions: self.reactions.into_iter().map(|r| r.name).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    user: SlackUser,
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: Option<SlackProfile>,
}

#[derive(Debug, Deserialize)]
struct SlackProfile {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
}

impl SlackUser {
    /// display name, then real name, then handle, then the id itself
    fn display_name(self, user_id: &str) -> String {
        let (display, profile_real) = match self.profile {
            Some(p) => (p.display_name, p.real_name),
            None => (None, None),
        };
        [display, profile_real, self.real_name, self.name]
            .into_iter()
            .flatten()
            .find(|n| !n.trim().is_empty())
            .unwrap_or_else(|| user_id.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ChannelInfoResponse {
    channel: SlackChannel,
}

#[derive(Debug, Deserialize)]
struct SlackChannel {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PermalinkResponse {
    #[serde(default)]
    permalink: String,
}
