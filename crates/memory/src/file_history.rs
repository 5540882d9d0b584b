//! File-backed chat history: one JSON document per user.
//!
//! Layout: `<dir>/<percent-encoded user_id>.json` holding
//! `{user_id, preferences, chat_history: [{role, content, timestamp}]}`.
//!
//! All users are loaded at startup. Writes for one user go through that
//! user's queue and are applied by a single worker task, so they land in
//! call order without blocking the caller. Different users never contend.
//! A worker that stays idle for `idle_timeout` retires and drops its queue;
//! the next write starts a fresh one.

use agentwire_core::error::HistoryError;
use agentwire_core::history::{HistoryEntry, HistorySink};
use agentwire_core::message::{Message, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::preferences::{PreferenceLearner, Preferences};

/// How long a user's worker waits for more writes before retiring.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// One user's stored document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub chat_history: Vec<HistoryEntry>,
}

impl UserRecord {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }
}

enum Command {
    Append(HistoryEntry),
    UpdatePreferences(Preferences, oneshot::Sender<Result<(), HistoryError>>),
    Delete(oneshot::Sender<Result<bool, HistoryError>>),
    Flush(oneshot::Sender<()>),
}

/// The live queue of one user.
struct Worker {
    id: u64,
    tx: mpsc::UnboundedSender<Command>,
}

struct Shared {
    dir: PathBuf,
    max_messages: usize,
    learner: PreferenceLearner,
    records: RwLock<HashMap<String, UserRecord>>,
    /// Every enqueue and every retirement happens under this lock.
    queues: Mutex<HashMap<String, Worker>>,
    next_worker: AtomicU64,
}

impl Shared {
    fn lock_queues(&self) -> MutexGuard<'_, HashMap<String, Worker>> {
        match self.queues.lock() {
            Ok(queues) => queues,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Persistent per-user history with preference learning.
pub struct FileHistory {
    shared: Arc<Shared>,
    idle_timeout: Duration,
}

impl FileHistory {
    /// Open the store at `dir`, creating it if needed and loading every
    /// user document found there. Unreadable documents are skipped.
    pub fn open(dir: impl Into<PathBuf>, max_messages: usize) -> Result<Self, HistoryError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            HistoryError::Storage(format!("Failed to create history directory {}: {e}", dir.display()))
        })?;

        let records = load_all(&dir)?;
        info!(dir = %dir.display(), users = records.len(), "File history loaded");

        Ok(Self {
            shared: Arc::new(Shared {
                dir,
                max_messages: max_messages.max(1),
                learner: PreferenceLearner::new(),
                records: RwLock::new(records),
                queues: Mutex::new(HashMap::new()),
                next_worker: AtomicU64::new(0),
            }),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        })
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Number of users with a running write worker.
    pub fn active_workers(&self) -> usize {
        self.shared.lock_queues().len()
    }

    /// The most recent `limit` entries for a user, oldest first.
    pub fn history(&self, user_id: &str, limit: usize) -> Vec<HistoryEntry> {
        self.read(user_id, |record| {
            let skip = record.chat_history.len().saturating_sub(limit);
            record.chat_history[skip..].to_vec()
        })
        .unwrap_or_default()
    }

    pub fn preferences(&self, user_id: &str) -> Preferences {
        self.read(user_id, |record| record.preferences.clone())
            .unwrap_or_default()
    }

    /// All known user ids, sorted.
    pub fn user_ids(&self) -> Vec<String> {
        let records = match self.shared.records.read() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut ids: Vec<String> = records.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Merge `preferences` into the user's stored preferences.
    pub async fn update_preferences(
        &self,
        user_id: &str,
        preferences: Preferences,
    ) -> Result<(), HistoryError> {
        let (tx, rx) = oneshot::channel();
        self.send(user_id, Command::UpdatePreferences(preferences, tx));
        rx.await
            .map_err(|_| HistoryError::Storage("history worker stopped".into()))?
    }

    /// Remove a user's document. Returns whether the user existed.
    pub async fn delete_user(&self, user_id: &str) -> Result<bool, HistoryError> {
        let (tx, rx) = oneshot::channel();
        self.send(user_id, Command::Delete(tx));
        rx.await
            .map_err(|_| HistoryError::Storage("history worker stopped".into()))?
    }

    fn read<T>(&self, user_id: &str, f: impl FnOnce(&UserRecord) -> T) -> Option<T> {
        let records = match self.shared.records.read() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.get(user_id).map(f)
    }

    /// Enqueue a command on the user's queue, starting its worker if none runs.
    fn send(&self, user_id: &str, command: Command) {
        let mut queues = self.shared.lock_queues();
        let command = match queues.get(user_id) {
            Some(worker) => match worker.tx.send(command) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => returned,
            },
            None => command,
        };

        let id = self.shared.next_worker.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(
            Arc::clone(&self.shared),
            user_id.to_string(),
            id,
            rx,
            self.idle_timeout,
        ));
        let _ = tx.send(command);
        queues.insert(user_id.to_string(), Worker { id, tx });
    }
}

impl Drop for FileHistory {
    /// Close every queue; workers apply what is already queued, then stop.
    fn drop(&mut self) {
        self.shared.lock_queues().clear();
    }
}

#[async_trait]
impl HistorySink for FileHistory {
    fn append(&self, user_id: &str, message: &Message) {
        self.send(user_id, Command::Append(HistoryEntry::from_message(message)));
    }

    async fn flush(&self, user_id: &str) {
        let pending = {
            let queues = self.shared.lock_queues();
            queues.get(user_id).and_then(|worker| {
                let (done_tx, done_rx) = oneshot::channel();
                worker.tx.send(Command::Flush(done_tx)).ok().map(|()| done_rx)
            })
        };
        if let Some(done) = pending {
            let _ = done.await;
        }
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    user_id: String,
    worker_id: u64,
    mut rx: mpsc::UnboundedReceiver<Command>,
    idle_timeout: Duration,
) {
    debug!(user_id = %user_id, "History worker started");
    loop {
        let next = tokio::time::timeout(idle_timeout, rx.recv()).await;
        let command = match next {
            Ok(Some(command)) => command,
            Ok(None) => break,
            Err(_) if retire(&shared, &user_id, worker_id, &rx) => break,
            Err(_) => continue,
        };
        match command {
            Command::Append(entry) => {
                if let Err(e) = apply_append(&shared, &user_id, entry).await {
                    warn!(user_id = %user_id, error = %e, "Failed to record history");
                }
            }
            Command::UpdatePreferences(preferences, reply) => {
                let result = apply_preferences(&shared, &user_id, preferences).await;
                let _ = reply.send(result);
            }
            Command::Delete(reply) => {
                let _ = reply.send(apply_delete(&shared, &user_id).await);
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(user_id = %user_id, "History worker stopped");
}

/// Unregister an idle worker. Fails if a command slipped in before the lock.
fn retire(
    shared: &Shared,
    user_id: &str,
    worker_id: u64,
    rx: &mpsc::UnboundedReceiver<Command>,
) -> bool {
    let mut queues = shared.lock_queues();
    if !rx.is_empty() {
        return false;
    }
    if queues.get(user_id).is_some_and(|worker| worker.id == worker_id) {
        queues.remove(user_id);
    }
    true
}

async fn apply_append(shared: &Shared, user_id: &str, entry: HistoryEntry) -> Result<(), HistoryError> {
    let learned = if entry.role == Role::User {
        shared.learner.learn(&entry.content)
    } else {
        Preferences::new()
    };

    let snapshot = mutate(shared, user_id, |record| {
        if !learned.is_empty() {
            debug!(user_id = %user_id, keys = ?learned.keys().collect::<Vec<_>>(), "Learned preferences");
            record.preferences.extend(learned);
        }
        record.chat_history.push(entry);
        let excess = record.chat_history.len().saturating_sub(shared.max_messages);
        if excess > 0 {
            record.chat_history.drain(..excess);
        }
    });
    persist(&shared.dir, &snapshot).await
}

async fn apply_preferences(
    shared: &Shared,
    user_id: &str,
    preferences: Preferences,
) -> Result<(), HistoryError> {
    let snapshot = mutate(shared, user_id, |record| record.preferences.extend(preferences));
    persist(&shared.dir, &snapshot).await
}

async fn apply_delete(shared: &Shared, user_id: &str) -> Result<bool, HistoryError> {
    let existed = {
        let mut records = match shared.records.write() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.remove(user_id).is_some()
    };
    match tokio::fs::remove_file(record_path(&shared.dir, user_id)).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(existed),
        Err(e) => Err(HistoryError::Storage(format!("Failed to delete history: {e}"))),
    }
}

/// Apply `f` to the user's record (created on demand) and return a copy to persist.
fn mutate(shared: &Shared, user_id: &str, f: impl FnOnce(&mut UserRecord)) -> UserRecord {
    let mut records = match shared.records.write() {
        Ok(records) => records,
        Err(poisoned) => poisoned.into_inner(),
    };
    let record = records
        .entry(user_id.to_string())
        .or_insert_with(|| UserRecord::new(user_id));
    f(record);
    record.clone()
}

async fn persist(dir: &Path, record: &UserRecord) -> Result<(), HistoryError> {
    let json = serde_json::to_vec_pretty(record)
        .map_err(|e| HistoryError::Serialization(e.to_string()))?;
    let path = record_path(dir, &record.user_id);
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| HistoryError::Storage(format!("Failed to write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|e| HistoryError::Storage(format!("Failed to replace {}: {e}", path.display())))
}

/// File name for a user id. Percent-encoding keeps distinct ids on distinct
/// files and leaves no path separators.
fn record_path(dir: &Path, user_id: &str) -> PathBuf {
    dir.join(format!("{}.json", urlencoding::encode(user_id)))
}

fn load_all(dir: &Path) -> Result<HashMap<String, UserRecord>, HistoryError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| HistoryError::Storage(format!("Failed to list {}: {e}", dir.display())))?;

    let mut records = HashMap::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<UserRecord>(&text).map_err(|e| e.to_string()));
        match parsed {
            Ok(record) => {
                records.insert(record.user_id.clone(), record);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable history file"),
        }
    }
    Ok(records)
}
