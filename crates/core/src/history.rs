//! Per-user chat history, consumed by the agent as a write-only sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Message, Role};

/// One stored history line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_message(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Where the agent records conversation turns.
///
/// `append` is fire-and-forget: implementations queue the write, log their
/// own failures, and never block or fail the caller. Writes for one user
/// must be applied in call order.
#[async_trait]
pub trait HistorySink: Send + Sync {
    fn append(&self, user_id: &str, message: &Message);

    /// Wait until every write queued for `user_id` has been applied.
    async fn flush(&self, _user_id: &str) {}
}
