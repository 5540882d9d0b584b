//! In-memory history, useful for tests and ephemeral sessions.

use agentwire_core::history::{HistoryEntry, HistorySink};
use agentwire_core::message::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Keeps every appended entry in process memory, capped per user.
pub struct InMemoryHistory {
    max_messages: usize,
    entries: Mutex<HashMap<String, Vec<HistoryEntry>>>,
}

impl InMemoryHistory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Everything recorded for `user_id`, oldest first.
    pub fn entries(&self, user_id: &str) -> Vec<HistoryEntry> {
        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(user_id).cloned().unwrap_or_default()
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl HistorySink for InMemoryHistory {
    fn append(&self, user_id: &str, message: &Message) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let log = entries.entry(user_id.to_string()).or_default();
        log.push(HistoryEntry::from_message(message));
        let excess = log.len().saturating_sub(self.max_messages);
        log.drain(..excess);
    }
}
