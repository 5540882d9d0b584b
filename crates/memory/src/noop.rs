//! History sink that records nothing.

use agentwire_core::history::HistorySink;
use agentwire_core::message::Message;
use async_trait::async_trait;

pub struct NoopHistory;

#[async_trait]
impl HistorySink for NoopHistory {
    fn append(&self, _user_id: &str, _message: &Message) {}
}
