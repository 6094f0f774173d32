use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::MessageKey;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to write state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct StateFile {
    #[serde(default)]
    processed_messages: ProcessedMessages,
    #[serde(default)]
    last_check_time: Option<DateTime<Utc>>,
}

/// Older checkpoints stored a bare list of keys.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProcessedMessages {
    Map(BTreeMap<MessageKey, DateTime<Utc>>),
    Legacy(Vec<MessageKey>),
}

impl Default for ProcessedMessages {
    fn default() -> Self {
        ProcessedMessages::Map(BTreeMap::new())
    }
}

#[derive(Serialize)]
struct StateSnapshot<'a> {
    processed_messages: &'a BTreeMap<MessageKey, DateTime<Utc>>,
    last_check_time: DateTime<Utc>,
}

/// Processed Record: the set of messages already forwarded to the sheet,
/// each with the time it was forwarded.
///
/// Owned by a single run and written back in full by [`StateManager::persist`].
#[derive(Debug)]
pub struct StateManager {
    path: PathBuf,
    processed: BTreeMap<MessageKey, DateTime<Utc>>,
    last_check_time: Option<DateTime<Utc>>,
}

impl StateManager {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            processed: BTreeMap::new(),
            last_check_time: None,
        }
    }

    /// Load the checkpoint. A missing, unreadable or malformed file yields an
    /// empty state; malformed content is copied aside first.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        if !path.exists() {
            info!("State file not found, starting fresh: {}", path.display());
            return Self::empty(path);
        }

        debug!("Loading state from: {}", path.display());
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Could not read state file {}: {}; starting fresh", path.display(), e);
                return Self::empty(path);
            }
        };

        let file: StateFile = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                warn!("Failed to parse state file {}: {}; starting fresh", path.display(), e);
                backup_corrupt(&path);
                return Self::empty(path);
            }
        };

        let processed = match file.processed_messages {
            ProcessedMessages::Map(map) => map,
            ProcessedMessages::Legacy(keys) => {
                let now = Utc::now();
                keys.into_iter().map(|key| (key, now)).collect()
            }
        };

        info!("Loaded state: {} processed messages", processed.len());
        Self {
            path,
            processed,
            last_check_time: file.last_check_time,
        }
    }

    pub fn has_seen(&self, key: &MessageKey) -> bool {
        self.processed.contains_key(key)
    }

    /// Record a forwarded message. Returns false if it was already recorded,
    /// in which case the original timestamp is kept.
    pub fn mark_seen(&mut self, key: MessageKey) -> bool {
        if self.processed.contains_key(&key) {
            return false;
        }
        self.processed.insert(key, Utc::now());
        true
    }

    /// Overwrite the checkpoint file with the full record.
    pub fn persist(&mut self) -> Result<(), StateError> {
        debug!("Saving state to: {}", self.path.display());
        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let now = Utc::now();
        let json = serde_json::to_string_pretty(&StateSnapshot {
            processed_messages: &self.processed,
            last_check_time: now,
        })?;

        let tmp = tmp_path(&self.path);
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        self.last_check_time = Some(now);

        info!("Saved state: {} processed messages", self.processed.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_check_time(&self) -> Option<DateTime<Utc>> {
        self.last_check_time
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn backup_corrupt(path: &Path) {
    let mut name = path.as_os_str().to_owned();
    name.push(".corrupt");
    let backup_path = PathBuf::from(name);

    match fs::copy(path, &backup_path) {
        Ok(_) => warn!("Kept unreadable state as: {}", backup_path.display()),
        Err(e) => warn!("Could not back up state file {}: {}", path.display(), e),
    }
}
