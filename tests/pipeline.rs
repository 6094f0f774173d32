use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};

use reaction_logger::filter::{TriggerFilter, TriggerRule};
use reaction_logger::job::{check_connections, CycleError, Monitor};
use reaction_logger::model::{MessageKey, ObservedMessage};
use reaction_logger::slack::{AuthIdentity, ChatSource, SlackError};
use reaction_logger::state::StateManager;
use reaction_logger::transform::SheetRow;
use reaction_logger::writer::RowSink;

const CHANNEL: &str = "C1";

fn api_error(method: &'static str) -> SlackError {
    SlackError::Api {
        method,
        error: "internal_error".into(),
    }
}

#[derive(Clone, Default)]
struct FakeChat {
    messages: Arc<Mutex<Vec<ObservedMessage>>>,
    fail_history: Arc<Mutex<bool>>,
    failing_users: Arc<Mutex<HashSet<String>>>,
    fail_permalinks: Arc<Mutex<bool>>,
    fail_threads: Arc<Mutex<bool>>,
    unknown_channel: Arc<Mutex<bool>>,
    history_calls: Arc<Mutex<usize>>,
    /// Simulated latency of `conversations.history`.
    history_delay: Arc<Mutex<Option<Duration>>>,
}

impl FakeChat {
    fn with_messages(messages: Vec<ObservedMessage>) -> Self {
        let chat = Self::default();
        *chat.messages.lock().unwrap() = messages;
        chat
    }

    fn history_calls(&self) -> usize {
        *self.history_calls.lock().unwrap()
    }
}

#[async_trait]
impl ChatSource for FakeChat {
    async fn auth_check(&self) -> Result<AuthIdentity, SlackError> {
        Ok(AuthIdentity {
            user: "bot".into(),
            team: "team".into(),
        })
    }

    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: u32,
    ) -> Result<Vec<ObservedMessage>, SlackError> {
        *self.history_calls.lock().unwrap() += 1;
        let delay = *self.history_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_history.lock().unwrap() {
            return Err(api_error("conversations.history"));
        }
        let messages = self.messages.lock().unwrap();
        Ok(messages
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn thread_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<ObservedMessage>, SlackError> {
        if *self.fail_threads.lock().unwrap() {
            return Err(api_error("conversations.replies"));
        }
        Ok(vec![
            ObservedMessage {
                channel_id: channel_id.into(),
                ts: thread_ts.into(),
                text: "thread root".into(),
                ..Default::default()
            },
            ObservedMessage {
                channel_id: channel_id.into(),
                ts: "1700000900.000000".into(),
                text: "a reply".into(),
                ..Default::default()
            },
        ])
    }

    async fn user_display_name(&self, user_id: &str) -> Result<String, SlackError> {
        if self.failing_users.lock().unwrap().contains(user_id) {
            return Err(api_error("users.info"));
        }
        Ok(format!("Name of {}", user_id))
    }

    async fn channel_name(&self, _channel_id: &str) -> Result<String, SlackError> {
        if *self.unknown_channel.lock().unwrap() {
            return Err(SlackError::Api {
                method: "conversations.info",
                error: "channel_not_found".into(),
            });
        }
        Ok("#approvals".into())
    }

    async fn permalink(&self, channel_id: &str, ts: &str) -> Result<String, SlackError> {
        if *self.fail_permalinks.lock().unwrap() {
            return Err(api_error("chat.getPermalink"));
        }
        Ok(format!("https://example.slack.com/archives/{}/p{}", channel_id, ts.replace('.', "")))
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    rows: Arc<Mutex<Vec<Vec<String>>>>,
    /// Appends of rows whose message text is listed here fail.
    failing_texts: Arc<Mutex<HashSet<String>>>,
    /// The destination tab does not exist.
    missing_tab: Arc<Mutex<bool>>,
}

impl RecordingSink {
    fn rows(&self) -> Vec<Vec<String>> {
        self.rows.lock().unwrap().clone()
    }

    fn data_rows(&self) -> Vec<Vec<String>> {
        self.rows()
            .into_iter()
            .filter(|row| row != &SheetRow::headers())
            .collect()
    }
}

#[async_trait]
impl RowSink for RecordingSink {
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.rows.lock().unwrap().is_empty())
    }

    async fn append_rows(&self, rows: Vec<Vec<String>>) -> Result<()> {
        let failing = self.failing_texts.lock().unwrap();
        if rows.iter().any(|row| row.get(4).is_some_and(|text| failing.contains(text))) {
            return Err(anyhow!("sheets api unavailable"));
        }
        self.rows.lock().unwrap().extend(rows);
        Ok(())
    }

    async fn verify(&self) -> Result<String> {
        if *self.missing_tab.lock().unwrap() {
            return Err(anyhow!("no tab named 'Sheet1'"));
        }
        Ok(self.describe())
    }

    fn describe(&self) -> String {
        "recording sink".into()
    }
}

fn message(ts: &str, user: &str, text: &str, reactions: &[&str]) -> ObservedMessage {
    ObservedMessage {
        channel_id: CHANNEL.into(),
        ts: ts.into(),
        user: Some(user.into()),
        text: text.into(),
        thread_ts: None,
        reactions: reactions.iter().map(|r| r.to_string()).collect(),
    }
}

struct Harness {
    _dir: TempDir,
    state_path: PathBuf,
    chat: FakeChat,
    sink: RecordingSink,
    monitor: Monitor<FakeChat, RecordingSink>,
}

fn harness(rules: Vec<TriggerRule>, messages: Vec<ObservedMessage>) -> Harness {
    let dir = tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let chat = FakeChat::with_messages(messages);
    let sink = RecordingSink::default();
    let monitor = Monitor::new(
        chat.clone(),
        sink.clone(),
        TriggerFilter::new(rules),
        CHANNEL.into(),
        100,
    );
    Harness {
        _dir: dir,
        state_path,
        chat,
        sink,
        monitor,
    }
}

fn approved() -> Vec<TriggerRule> {
    vec![TriggerRule::new("✅", "Approved")]
}

#[tokio::test]
async fn messages_without_trigger_emoji_are_ignored() {
    let h = harness(
        approved(),
        vec![
            message("1700000001.000100", "U1", "no reactions", &[]),
            message("1700000002.000100", "U1", "other reactions", &["🔥", "eyes"]),
        ],
    );
    let mut state = StateManager::load(&h.state_path);

    let summary = h.monitor.run_cycle(&mut state).await.unwrap();

    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.matched, 0);
    assert!(h.sink.rows().is_empty(), "not even a header row");
    assert!(state.is_empty());
    assert!(StateManager::load(&h.state_path).is_empty());
}

#[tokio::test]
async fn matched_message_is_appended_once_across_runs() {
    let h = harness(
        approved(),
        vec![message("1700000000.000100", "U1", "ship it", &["✅", "🔥"])],
    );

    let mut state = StateManager::load(&h.state_path);
    let first = h.monitor.run_cycle(&mut state).await.unwrap();
    assert_eq!(first.appended, 1);

    let rows = h.sink.data_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][1], "Approved");
    assert_eq!(rows[0][2], "Name of U1");
    assert_eq!(rows[0][8], "✅");

    // a fresh process reading the checkpoint
    let mut state = StateManager::load(&h.state_path);
    let second = h.monitor.run_cycle(&mut state).await.unwrap();
    assert_eq!(second.appended, 0);
    assert_eq!(second.already_seen, 1);
    assert_eq!(h.sink.data_rows().len(), 1);
}

#[tokio::test]
async fn empty_checkpoint_gets_header_row_and_one_entry() {
    let h = harness(
        approved(),
        vec![message("1700000000.000100", "U1", "ship it", &["✅"])],
    );
    std::fs::write(&h.state_path, "").unwrap();

    let mut state = StateManager::load(&h.state_path);
    h.monitor.run_cycle(&mut state).await.unwrap();

    let rows = h.sink.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], SheetRow::headers());
    assert_eq!(rows[1][4], "ship it");
    assert_eq!(rows[1][7], "https://example.slack.com/archives/C1/p1700000000000100");

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&h.state_path).unwrap()).unwrap();
    let entries = raw["processed_messages"].as_object().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries.contains_key("C1:1700000000.000100"));
}

#[tokio::test]
async fn append_without_persist_is_retried_by_next_run() {
    let h = harness(
        approved(),
        vec![message("1700000000.000100", "U1", "ship it", &["✅"])],
    );

    // rows written, then the process dies before persisting
    let mut state = StateManager::load(&h.state_path);
    h.monitor.process_batch(&mut state).await.unwrap();
    drop(state);
    assert_eq!(h.sink.data_rows().len(), 1);

    let mut state = StateManager::load(&h.state_path);
    let summary = h.monitor.run_cycle(&mut state).await.unwrap();
    assert_eq!(summary.appended, 1);
    assert_eq!(h.sink.data_rows().len(), 2, "duplicate accepted after a crash");

    let mut state = StateManager::load(&h.state_path);
    let summary = h.monitor.run_cycle(&mut state).await.unwrap();
    assert_eq!(summary.appended, 0);
    assert_eq!(h.sink.data_rows().len(), 2);
}

#[tokio::test]
async fn failed_author_lookup_still_writes_row() {
    let h = harness(
        approved(),
        vec![message("1700000000.000200", "U2", "m2", &["✅"])],
    );
    h.chat.failing_users.lock().unwrap().insert("U2".into());

    let mut state = StateManager::load(&h.state_path);
    let summary = h.monitor.run_cycle(&mut state).await.unwrap();

    assert_eq!(summary.appended, 1);
    let rows = h.sink.data_rows();
    assert_eq!(rows[0][2], "U2");
    assert!(state.has_seen(&MessageKey::new(CHANNEL, "1700000000.000200")));
}

#[tokio::test]
async fn failed_permalink_and_thread_fetch_degrade_to_empty_fields() {
    let mut threaded = message("1700000500.000000", "U1", "in a thread", &["✅"]);
    threaded.thread_ts = Some("1700000400.000000".into());
    let h = harness(approved(), vec![threaded.clone()]);
    *h.chat.fail_permalinks.lock().unwrap() = true;
    *h.chat.fail_threads.lock().unwrap() = true;

    let mut state = StateManager::load(&h.state_path);
    h.monitor.run_cycle(&mut state).await.unwrap();

    let rows = h.sink.data_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][5], "", "parent message");
    assert_eq!(rows[0][6], "", "thread replies");
    assert_eq!(rows[0][7], "", "link");
    assert_eq!(rows[0][9], "reply");
    assert!(state.has_seen(&threaded.key()));
}

#[tokio::test]
async fn thread_context_is_written() {
    let mut threaded = message("1700000500.000000", "U1", "in a thread", &["✅"]);
    threaded.thread_ts = Some("1700000400.000000".into());
    let h = harness(approved(), vec![threaded]);

    let mut state = StateManager::load(&h.state_path);
    h.monitor.run_cycle(&mut state).await.unwrap();

    let rows = h.sink.data_rows();
    assert_eq!(rows[0][3], "#approvals");
    assert_eq!(rows[0][5], "thread root");
    assert_eq!(rows[0][6], "a reply");
}

#[tokio::test]
async fn failed_append_skips_message_and_continues() {
    let h = harness(
        approved(),
        vec![
            message("1700000002.000000", "U1", "second", &["✅"]),
            message("1700000001.000000", "U1", "first", &["✅"]),
        ],
    );
    h.sink.failing_texts.lock().unwrap().insert("first".into());

    let mut state = StateManager::load(&h.state_path);
    let summary = h.monitor.run_cycle(&mut state).await.unwrap();
    assert_eq!(summary.appended, 1);
    assert_eq!(summary.failed, 1);
    assert!(!state.has_seen(&MessageKey::new(CHANNEL, "1700000001.000000")));
    assert!(state.has_seen(&MessageKey::new(CHANNEL, "1700000002.000000")));

    h.sink.failing_texts.lock().unwrap().clear();
    let mut state = StateManager::load(&h.state_path);
    let summary = h.monitor.run_cycle(&mut state).await.unwrap();
    assert_eq!(summary.appended, 1);
    assert_eq!(summary.already_seen, 1);

    let texts: Vec<String> = h.sink.data_rows().into_iter().map(|r| r[4].clone()).collect();
    assert_eq!(texts, vec!["second".to_string(), "first".to_string()]);
}

#[tokio::test]
async fn rows_are_written_oldest_first() {
    let h = harness(
        approved(),
        vec![
            message("1700000003.000000", "U1", "third", &["✅"]),
            message("1700000001.000000", "U1", "first", &["✅"]),
            message("1700000002.000000", "U1", "second", &["✅"]),
        ],
    );

    let mut state = StateManager::load(&h.state_path);
    h.monitor.run_cycle(&mut state).await.unwrap();

    let texts: Vec<String> = h.sink.data_rows().into_iter().map(|r| r[4].clone()).collect();
    assert_eq!(texts, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn first_declared_rule_picks_the_category() {
    let h = harness(
        vec![
            TriggerRule::new("form", "Form"),
            TriggerRule::new("docgen", "Docgen"),
        ],
        vec![message("1700000000.000000", "U1", "both", &["docgen", "form"])],
    );

    let mut state = StateManager::load(&h.state_path);
    h.monitor.run_cycle(&mut state).await.unwrap();

    let rows = h.sink.data_rows();
    assert_eq!(rows[0][1], "Form");
    assert_eq!(rows[0][8], "form, docgen");
}

#[tokio::test]
async fn fetch_failure_is_reported_and_checkpoint_still_written() {
    let h = harness(approved(), vec![]);
    *h.chat.fail_history.lock().unwrap() = true;

    let mut state = StateManager::load(&h.state_path);
    let err = h.monitor.run_cycle(&mut state).await.unwrap_err();

    assert!(matches!(err, CycleError::Fetch { .. }));
    assert!(h.state_path.exists());
    assert!(h.sink.rows().is_empty());
}

#[tokio::test]
async fn connection_check_passes_without_writing() {
    let h = harness(approved(), vec![message("1700000000.000100", "U1", "ship it", &["✅"])]);

    check_connections(&h.chat, CHANNEL, &h.sink).await.unwrap();

    assert!(h.sink.rows().is_empty());
    assert_eq!(h.chat.history_calls(), 0);
}

#[tokio::test]
async fn unknown_channel_fails_the_connection_check() {
    let h = harness(approved(), vec![]);
    *h.chat.unknown_channel.lock().unwrap() = true;

    let err = check_connections(&h.chat, CHANNEL, &h.sink).await.unwrap_err();

    assert!(format!("{:#}", err).contains("channel_not_found"));
    assert!(h.sink.rows().is_empty());
}

#[tokio::test]
async fn missing_tab_fails_the_connection_check() {
    let h = harness(approved(), vec![]);
    *h.sink.missing_tab.lock().unwrap() = true;

    let err = check_connections(&h.chat, CHANNEL, &h.sink).await.unwrap_err();

    assert!(format!("{:#}", err).contains("no tab named 'Sheet1'"));
    assert!(h.sink.rows().is_empty());
}

#[tokio::test(start_paused = true)]
async fn loop_polls_every_interval_until_shutdown() {
    let h = harness(approved(), vec![message("1700000000.000100", "U1", "ship it", &["✅"])]);
    let mut state = StateManager::load(&h.state_path);

    // cycles at t=0, 60 and 120; shutdown at 150 during the third sleep
    let shutdown = tokio::time::sleep(Duration::from_secs(150));
    h.monitor
        .run_until(&mut state, Duration::from_secs(60), shutdown)
        .await
        .unwrap();

    assert_eq!(h.chat.history_calls(), 3);
    assert_eq!(h.sink.data_rows().len(), 1);
    assert!(StateManager::load(&h.state_path).has_seen(&MessageKey::new(CHANNEL, "1700000000.000100")));
}

#[tokio::test(start_paused = true)]
async fn loop_survives_fetch_failures() {
    let h = harness(approved(), vec![]);
    *h.chat.fail_history.lock().unwrap() = true;
    let mut state = StateManager::load(&h.state_path);

    let shutdown = tokio::time::sleep(Duration::from_secs(150));
    h.monitor
        .run_until(&mut state, Duration::from_secs(60), shutdown)
        .await
        .unwrap();

    assert_eq!(h.chat.history_calls(), 3);
    assert!(h.state_path.exists());
}

#[tokio::test(start_paused = true)]
async fn shutdown_mid_cycle_finishes_and_persists_the_cycle() {
    let h = harness(approved(), vec![message("1700000000.000100", "U1", "ship it", &["✅"])]);
    *h.chat.history_delay.lock().unwrap() = Some(Duration::from_secs(10));
    let mut state = StateManager::load(&h.state_path);
    let started = tokio::time::Instant::now();

    let shutdown = tokio::time::sleep(Duration::from_secs(1));
    h.monitor
        .run_until(&mut state, Duration::from_secs(300), shutdown)
        .await
        .unwrap();

    assert_eq!(h.chat.history_calls(), 1);
    assert_eq!(h.sink.data_rows().len(), 1);
    assert!(StateManager::load(&h.state_path).has_seen(&MessageKey::new(CHANNEL, "1700000000.000100")));
    // returned right after the interrupted cycle, without sleeping
    assert!(started.elapsed() < Duration::from_secs(300));
}
