//! Folds streamed tool-call fragments into completed [`ToolCallRequest`]s.

use agentwire_core::provider::ToolCallFragment;
use agentwire_core::tool::ToolCallRequest;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Key used for fragments whose call id has not arrived yet.
const PLACEHOLDER_ID: &str = "";

#[derive(Debug)]
struct PartialCall {
    index: u32,
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Arena of partial calls addressed by `(index, id-or-placeholder)`.
///
/// Most upstreams send the call id only on the first fragment of a call;
/// an id-less fragment therefore continues the latest entry for its index.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    entries: Vec<PartialCall>,
    keys: HashMap<(u32, String), usize>,
    latest_for_index: HashMap<u32, usize>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Fold one fragment. Names are replaced when present; argument text
    /// is appended in arrival order.
    pub fn push(&mut self, fragment: ToolCallFragment) {
        let slot = self.slot_for(fragment.index, fragment.id);
        let entry = &mut self.entries[slot];

        if let Some(name) = fragment.name {
            entry.name = name;
        }
        if let Some(arguments) = fragment.arguments {
            entry.arguments.push_str(&arguments);
        }
        self.latest_for_index.insert(fragment.index, slot);
    }

    fn slot_for(&mut self, index: u32, id: Option<String>) -> usize {
        match id {
            Some(id) => {
                if let Some(&slot) = self.keys.get(&(index, id.clone())) {
                    return slot;
                }
                // An entry opened by id-less fragments adopts the id once it shows up.
                if let Some(&slot) = self.keys.get(&(index, PLACEHOLDER_ID.to_string())) {
                    if self.latest_for_index.get(&index) == Some(&slot) {
                        self.keys.remove(&(index, PLACEHOLDER_ID.to_string()));
                        self.keys.insert((index, id.clone()), slot);
                        self.entries[slot].id = Some(id);
                        return slot;
                    }
                }
                self.open(index, Some(id))
            }
            None => match self.latest_for_index.get(&index) {
                Some(&slot) => slot,
                None => self.open(index, None),
            },
        }
    }

    fn open(&mut self, index: u32, id: Option<String>) -> usize {
        let slot = self.entries.len();
        let key_id = id.clone().unwrap_or_else(|| PLACEHOLDER_ID.to_string());
        self.entries.push(PartialCall {
            index,
            id,
            name: String::new(),
            arguments: String::new(),
        });
        self.keys.insert((index, key_id), slot);
        slot
    }

    /// Project the arena into requests ordered by `index` (stable for ties).
    ///
    /// Entries that never received a name cannot be dispatched and are
    /// dropped; entries that never received an id get a generated one.
    pub fn finish(self) -> Vec<ToolCallRequest> {
        let mut entries = self.entries;
        entries.sort_by_key(|e| e.index);

        entries
            .into_iter()
            .filter_map(|entry| {
                if entry.name.is_empty() {
                    warn!(index = entry.index, "Dropping tool call without a name");
                    return None;
                }
                let id = entry
                    .id
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                debug!(id = %id, name = %entry.name, index = entry.index, "Tool call assembled");
                Some(ToolCallRequest {
                    id,
                    index: entry.index,
                    name: entry.name,
                    arguments: entry.arguments,
                })
            })
            .collect()
    }
}
