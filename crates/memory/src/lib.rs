//! Chat history sinks for agentwire.

pub mod file_history;
pub mod in_memory;
pub mod noop;
pub mod preferences;

pub use file_history::{FileHistory, UserRecord};
pub use in_memory::InMemoryHistory;
pub use noop::NoopHistory;
pub use preferences::{PreferenceLearner, Preferences};
