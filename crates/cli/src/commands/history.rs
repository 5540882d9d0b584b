//! `agentwire history` — stored chat history and learned preferences.

use agentwire_config::AppConfig;
use agentwire_core::history::HistoryEntry;
use agentwire_memory::FileHistory;

pub fn run(user: &str, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let dir = config.history.dir();
    let store = FileHistory::open(&dir, config.history.max_messages)?;

    println!("📜 History for {user}");
    println!("   Store: {}", dir.display());
    println!();

    let preferences = store.preferences(user);
    if preferences.is_empty() {
        println!("   Preferences: (none learned)");
    } else {
        println!("   Preferences:");
        for (key, value) in &preferences {
            println!("     {key} = {value}");
        }
    }
    println!();

    let entries = store.history(user, limit);
    if entries.is_empty() {
        println!("   No messages stored.");
        return Ok(());
    }
    for entry in &entries {
        println!("   {}", format_entry(entry));
    }

    Ok(())
}

fn format_entry(entry: &HistoryEntry) -> String {
    let content = entry.content.replace('\n', " ");
    format!(
        "[{}] {:<9} {content}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.role.as_str()
    )
}
