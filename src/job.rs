use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cfg::Cfg;
use crate::enrich::Enricher;
use crate::filter::TriggerFilter;
use crate::slack::{ChatSource, SlackError};
use crate::state::{StateError, StateManager};
use crate::transform::build_row;
use crate::writer::{RowSink, RowWriter};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to fetch messages from {channel_id}: {source}")]
    Fetch {
        channel_id: String,
        #[source]
        source: SlackError,
    },
    #[error("failed to persist checkpoint: {0}")]
    Persist(#[from] StateError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub matched: usize,
    pub already_seen: usize,
    pub appended: usize,
    pub failed: usize,
}

/// Drives fetch → filter → dedup → enrich → append for one channel.
pub struct Monitor<C, S> {
    chat: C,
    sink: S,
    filter: TriggerFilter,
    channel_id: String,
    history_limit: u32,
}

impl<C: ChatSource, S: RowSink> Monitor<C, S> {
    pub fn new(chat: C, sink: S, filter: TriggerFilter, channel_id: String, history_limit: u32) -> Self {
        Self {
            chat,
            sink,
            filter,
            channel_id,
            history_limit,
        }
    }

    pub fn from_cfg(cfg: &Cfg, chat: C, sink: S) -> Self {
        Self::new(
            chat,
            sink,
            TriggerFilter::new(cfg.triggers.clone()),
            cfg.channel_id.clone(),
            cfg.history_limit,
        )
    }

    /// One cycle: process the current batch, then persist the checkpoint
    /// whether or not the batch succeeded.
    pub async fn run_cycle(&self, state: &mut StateManager) -> Result<RunSummary, CycleError> {
        let outcome = self.process_batch(state).await;
        if let Err(e) = state.persist() {
            if let Err(batch_err) = &outcome {
                warn!("Batch also failed: {}", batch_err);
            }
            return Err(e.into());
        }
        outcome
    }

    /// Process the fetched candidates without persisting. Failures of single
    /// messages are logged and counted, never returned.
    pub async fn process_batch(&self, state: &mut StateManager) -> Result<RunSummary, CycleError> {
        info!("Checking for new triggered messages in {}", self.channel_id);

        let mut messages = self
            .chat
            .recent_messages(&self.channel_id, self.history_limit)
            .await
            .map_err(|source| CycleError::Fetch {
                channel_id: self.channel_id.clone(),
                source,
            })?;
        // oldest first, so rows land in posting order
        messages.sort_by_key(|m| ts_sort_key(&m.ts));

        let mut summary = RunSummary {
            fetched: messages.len(),
            ..Default::default()
        };
        let mut enricher = Enricher::new(&self.chat);
        let mut writer = RowWriter::new(&self.sink);

        for message in messages {
            let Some(matched) = self.filter.match_message(&message) else {
                continue;
            };
            summary.matched += 1;

            let key = message.key();
            if state.has_seen(&key) {
                debug!(%key, "already forwarded, skipping");
                summary.already_seen += 1;
                continue;
            }

            info!(%key, category = %matched.category, "Found new triggered message");
            let enriched = enricher.enrich(message).await;
            let row = build_row(&matched, &enriched);

            match writer.write(&row).await {
                Ok(()) => {
                    state.mark_seen(key);
                    summary.appended += 1;
                }
                Err(e) => {
                    warn!(%key, "Failed to forward message: {:#}", e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Cycle complete: {} fetched, {} matched, {} already seen, {} appended, {} failed",
            summary.fetched, summary.matched, summary.already_seen, summary.appended, summary.failed
        );
        Ok(summary)
    }

    /// Repeat cycles every `interval` until Ctrl-C.
    pub async fn run_until_stopped(&self, state: &mut StateManager, interval: Duration) -> Result<()> {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };
        self.run_until(state, interval, ctrl_c).await
    }

    /// Repeat cycles every `interval` until `shutdown` completes.
    ///
    /// Fetch failures are logged and retried on the next cycle; a checkpoint
    /// failure stops the loop. A shutdown that arrives mid-cycle lets the
    /// cycle finish and persist before returning.
    pub async fn run_until<F>(&self, state: &mut StateManager, interval: Duration, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut stopping = false;

        loop {
            let outcome = {
                let cycle = self.run_cycle(state);
                tokio::pin!(cycle);
                let mut finished = None;
                tokio::select! {
                    outcome = &mut cycle => finished = Some(outcome),
                    _ = &mut shutdown => {
                        info!("Interrupted, finishing the current cycle");
                        stopping = true;
                    }
                }
                match finished {
                    Some(outcome) => outcome,
                    None => cycle.await,
                }
            };

            match outcome {
                Ok(_) => {}
                Err(e @ CycleError::Fetch { .. }) => warn!("Cycle failed: {}", e),
                Err(e) => return Err(e.into()),
            }
            if stopping {
                info!("Stopped");
                return Ok(());
            }

            debug!("Sleeping {:?} until next cycle", interval);
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Interrupted, stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

/// Slack `ts` values are `<seconds>.<micros>`. The fraction is compared as
/// decimal digits, so its width does not matter.
fn ts_sort_key(ts: &str) -> (u64, String) {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, ""));
    (secs.parse().unwrap_or(0), frac.trim_end_matches('0').to_string())
}

/// Verify everything a cycle depends on before any write: Slack auth, read
/// access to the channel, then the row destination.
pub async fn check_connections<C, S>(chat: &C, channel_id: &str, sink: &S) -> Result<()>
where
    C: ChatSource + ?Sized,
    S: RowSink + ?Sized,
{
    info!("Testing connections...");

    let identity = chat
        .auth_check()
        .await
        .map_err(|e| anyhow::anyhow!("Slack connection failed: {}", e))?;
    info!("Slack connected as: {} in {}", identity.user, identity.team);

    let channel = chat
        .channel_name(channel_id)
        .await
        .map_err(|e| anyhow::anyhow!("Cannot access channel {}: {}", channel_id, e))?;
    info!("Watching channel {} ({})", channel, channel_id);

    let destination = sink
        .verify()
        .await
        .with_context(|| format!("Cannot use {}", sink.describe()))?;
    info!("Writing rows to {}", destination);
    Ok(())
}
