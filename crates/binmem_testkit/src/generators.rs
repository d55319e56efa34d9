//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random entries and operation
//! sequences, plus a reference model to check a store against.

use binmem_codec::{BinEntry, Channel, EntryId, EntryType, Metadata, Timestamp};
use binmem_core::{BinMemory, NewEntry};
use proptest::prelude::*;

/// Strategy for generating entry ids.
pub fn entry_id_strategy() -> impl Strategy<Value = EntryId> {
    prop::array::uniform16(any::<u8>()).prop_map(EntryId::from_bytes)
}

/// Strategy for generating channels.
pub fn channel_strategy() -> impl Strategy<Value = Channel> {
    prop_oneof![
        Just(Channel::InputOutput),
        Just(Channel::ErrorLog),
        Just(Channel::Other),
    ]
}

/// Strategy for generating entry paths.
///
/// Mostly draws from a small pool so filters have something to match.
pub fn path_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => prop::sample::select(vec!["users", "orders", "errors", "Users"]).prop_map(String::from),
        1 => prop::string::string_regex("[a-z]{1,8}(/[a-z]{1,8})?").expect("Invalid regex"),
    ]
}

/// Strategy for generating keys and values, including non-ASCII text.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("\\PC{0,48}").expect("Invalid regex")
}

/// Strategy for generating metadata maps.
pub fn metadata_strategy() -> impl Strategy<Value = Metadata> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
        text_strategy(),
        0..4,
    )
}

/// Strategy for generating complete entries, as found in a log.
pub fn bin_entry_strategy() -> impl Strategy<Value = BinEntry> {
    (
        entry_id_strategy(),
        any::<u8>(),
        channel_strategy(),
        any::<u64>(),
        path_strategy(),
        text_strategy(),
        text_strategy(),
        metadata_strategy(),
    )
        .prop_map(
            |(id, entry_type, channel, ticks, path, key, value, metadata)| BinEntry {
                id,
                entry_type: EntryType::from_byte(entry_type),
                channel,
                timestamp: Timestamp::from_ticks(ticks),
                path,
                key,
                value,
                metadata,
            },
        )
}

/// Strategy for generating entries to add to a store.
pub fn new_entry_strategy() -> impl Strategy<Value = NewEntry> {
    (
        path_strategy(),
        text_strategy(),
        text_strategy(),
        channel_strategy(),
        metadata_strategy(),
    )
        .prop_map(|(path, key, value, channel, metadata)| {
            NewEntry::new(path, key, value)
                .channel(channel)
                .metadata(metadata)
        })
}

/// A store operation for model-based tests.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    /// Add an entry
    Add {
        /// Entry path
        path: String,
        /// Entry key
        key: String,
        /// Entry value
        value: String,
        /// Entry channel
        channel: Channel,
    },
    /// Remove a previously added entry, picked by index
    Remove {
        /// Index into the added entries, taken modulo their count
        pick: usize,
    },
    /// Read a previously added entry by id
    Get {
        /// Index into the added entries, taken modulo their count
        pick: usize,
    },
    /// Compact the log
    Compact,
}

/// Strategy for generating store operations.
pub fn operation_strategy() -> impl Strategy<Value = StoreOperation> {
    prop_oneof![
        4 => (path_strategy(), text_strategy(), text_strategy(), channel_strategy())
            .prop_map(|(path, key, value, channel)| StoreOperation::Add { path, key, value, channel }),
        2 => any::<usize>().prop_map(|pick| StoreOperation::Remove { pick }),
        2 => any::<usize>().prop_map(|pick| StoreOperation::Get { pick }),
        1 => Just(StoreOperation::Compact),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<StoreOperation>> {
    prop::collection::vec(operation_strategy(), min_ops..max_ops)
}

#[derive(Debug, Clone)]
struct ModelEntry {
    id: EntryId,
    path: String,
    key: String,
    value: String,
    channel: Channel,
    removed: bool,
}

/// Reference model of a store: every added entry in insertion order.
#[derive(Debug, Clone, Default)]
pub struct StoreModel {
    entries: Vec<ModelEntry>,
}

impl StoreModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `op` to both the store and the model.
    ///
    /// Returns an error describing the first divergence.
    pub fn apply(&mut self, store: &BinMemory, op: &StoreOperation) -> Result<(), String> {
        match op {
            StoreOperation::Add {
                path,
                key,
                value,
                channel,
            } => {
                let id = store
                    .add_entry(path.as_str(), key.as_str(), value.as_str(), None, Some(*channel))
                    .map_err(|e| format!("add failed: {e}"))?;
                self.entries.push(ModelEntry {
                    id,
                    path: path.clone(),
                    key: key.clone(),
                    value: value.clone(),
                    channel: *channel,
                    removed: false,
                });
            }
            StoreOperation::Remove { pick } => {
                let (id, expected) = match self.pick(*pick) {
                    Some(entry) => {
                        let was_live = !entry.removed;
                        entry.removed = true;
                        (entry.id, was_live)
                    }
                    None => (EntryId::new(), false),
                };
                let removed = store
                    .remove_entry(&id)
                    .map_err(|e| format!("remove failed: {e}"))?;
                if removed != expected {
                    return Err(format!("remove({id}) returned {removed}, expected {expected}"));
                }
            }
            StoreOperation::Get { pick } => {
                let Some(entry) = self.pick(*pick).cloned() else {
                    return Ok(());
                };
                let found = store
                    .get_entry_by_id(&entry.id)
                    .map_err(|e| format!("get failed: {e}"))?;
                match (found, entry.removed) {
                    (None, true) => {}
                    (Some(found), false) if found.value == entry.value => {}
                    (found, removed) => {
                        return Err(format!(
                            "get({}) returned {:?} but removed = {}",
                            entry.id, found, removed
                        ))
                    }
                }
            }
            StoreOperation::Compact => {
                store.compact().map_err(|e| format!("compact failed: {e}"))?;
                self.entries.retain(|e| !e.removed);
            }
        }
        Ok(())
    }

    /// Checks that the store's live entries match the model, in order.
    pub fn check(&self, store: &BinMemory) -> Result<(), String> {
        let actual: Vec<_> = store
            .get_entries(None, None)
            .map_err(|e| format!("get_entries failed: {e}"))?
            .into_iter()
            .map(|e| (e.id, e.path, e.key, e.value, e.channel))
            .collect();
        let expected: Vec<_> = self
            .entries
            .iter()
            .filter(|e| !e.removed)
            .map(|e| (e.id, e.path.clone(), e.key.clone(), e.value.clone(), e.channel))
            .collect();

        if actual == expected {
            Ok(())
        } else {
            Err(format!(
                "store has {} live entries, model has {}",
                actual.len(),
                expected.len()
            ))
        }
    }

    /// Number of live entries in the model.
    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.removed).count()
    }

    fn pick(&mut self, pick: usize) -> Option<&mut ModelEntry> {
        if self.entries.is_empty() {
            None
        } else {
            let index = pick % self.entries.len();
            self.entries.get_mut(index)
        }
    }
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
