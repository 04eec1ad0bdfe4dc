//! Transactional upsert of catalog items
//!
//! The tracker is the only writer of items and audit entries. For one incoming
//! item it looks up the stored version, runs change detection and writes the item
//! together with its audit entries in one storage transaction. The storage mutex
//! is held from lookup to commit so that two upserts never interleave.

use crate::changes::detect::{detect, fingerprint};
use crate::changes::notify::{ChangeEvent, ChangeNotifier, LogNotifier};
use crate::model::{ChangeDescriptor, ItemRecord, ParsedItem};
use crate::storage::{Storage, StorageError};
use chrono::Utc;
use std::sync::{Arc, Mutex};

/// Storage handle shared between the tracker and readers
pub type SharedStorage = Arc<Mutex<dyn Storage + Send>>;

/// Result of one upsert
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// First sighting; the item and its `new_item` entry were written
    Inserted { item_id: i64 },
    /// The item existed; `changes` lists the entries written (may be empty)
    Updated {
        item_id: i64,
        changes: Vec<ChangeDescriptor>,
    },
    /// Another writer stored the same URL first
    Duplicate,
    /// Nothing was written
    Error {
        message: String,
        changes_detected: usize,
    },
}

impl UpsertOutcome {
    /// Changes found for this item, committed or not
    pub fn changes_detected(&self) -> usize {
        match self {
            Self::Inserted { .. } => 1,
            Self::Updated { changes, .. } => changes.len(),
            Self::Duplicate => 0,
            Self::Error {
                changes_detected, ..
            } => *changes_detected,
        }
    }

    /// Audit entries that were committed
    pub fn changes_logged(&self) -> usize {
        match self {
            Self::Inserted { .. } => 1,
            Self::Updated { changes, .. } => changes.len(),
            Self::Duplicate | Self::Error { .. } => 0,
        }
    }
}

enum Committed {
    Inserted {
        record: ItemRecord,
        change: ChangeDescriptor,
    },
    Updated {
        record: ItemRecord,
        changes: Vec<ChangeDescriptor>,
    },
    Unchanged {
        record: ItemRecord,
    },
}

struct Failure {
    error: StorageError,
    changes_detected: usize,
}

impl From<StorageError> for Failure {
    fn from(error: StorageError) -> Self {
        Self {
            error,
            changes_detected: 0,
        }
    }
}

/// Change-detecting writer for catalog items
pub struct ChangeTracker {
    storage: SharedStorage,
    notifier: Arc<dyn ChangeNotifier>,
}

impl ChangeTracker {
    /// Creates a tracker that logs committed changes
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            storage,
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Replaces the post-commit notifier
    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// The underlying storage, for read-only use
    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Inserts or updates one item and records its changes
    ///
    /// # Arguments
    ///
    /// * `item` - A validated parsed item
    ///
    /// # Returns
    ///
    /// The outcome. Errors are reported as `UpsertOutcome::Error`, never raised.
    pub fn upsert(&self, item: &ParsedItem) -> UpsertOutcome {
        match self.write(item) {
            Ok(committed) => {
                self.announce(&committed);
                match committed {
                    Committed::Inserted { record, .. } => {
                        tracing::debug!("Inserted '{}' ({})", record.name(), record.source_url());
                        UpsertOutcome::Inserted { item_id: record.id }
                    }
                    Committed::Updated { record, changes } => {
                        tracing::debug!(
                            "Updated '{}' with {} change(s)",
                            record.name(),
                            changes.len()
                        );
                        UpsertOutcome::Updated {
                            item_id: record.id,
                            changes,
                        }
                    }
                    Committed::Unchanged { record } => UpsertOutcome::Updated {
                        item_id: record.id,
                        changes: Vec::new(),
                    },
                }
            }
            Err(Failure {
                error: StorageError::DuplicateUrl(url),
                ..
            }) => {
                tracing::info!("Item {} was stored by another writer, skipping", url);
                UpsertOutcome::Duplicate
            }
            Err(Failure {
                error,
                changes_detected,
            }) => {
                tracing::error!(
                    "Failed to persist '{}' ({}): {}",
                    item.name,
                    item.source_url,
                    error
                );
                UpsertOutcome::Error {
                    message: error.to_string(),
                    changes_detected,
                }
            }
        }
    }

    fn write(&self, item: &ParsedItem) -> Result<Committed, Failure> {
        let hash = fingerprint(item);
        let now = Utc::now();

        let mut storage = self
            .storage
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;

        let Some(existing) = storage.find_item_by_url(&item.source_url)? else {
            let change = ChangeDescriptor::new_item(&item.name, now);
            let record = storage
                .insert_new_item(item, &hash, &change, now)
                .map_err(|error| Failure {
                    error,
                    changes_detected: 1,
                })?;
            return Ok(Committed::Inserted { record, change });
        };

        let changes = if existing.content_hash == hash {
            Vec::new()
        } else {
            detect(&existing.item, item, now)
        };

        if changes.is_empty() {
            let record = storage.touch_item(existing.id, item, &hash, now)?;
            return Ok(Committed::Unchanged { record });
        }

        let record = storage
            .apply_item_changes(existing.id, item, &hash, &changes, now)
            .map_err(|error| Failure {
                error,
                changes_detected: changes.len(),
            })?;

        Ok(Committed::Updated { record, changes })
    }

    fn announce(&self, committed: &Committed) {
        let event = match committed {
            Committed::Inserted { record, change } => ChangeEvent::NewItem { record, change },
            Committed::Updated { record, changes } => ChangeEvent::Updated { record, changes },
            Committed::Unchanged { .. } => return,
        };

        if let Err(e) = self.notifier.notify(&event) {
            tracing::warn!(
                "Change notification failed for {}: {}",
                event.record().source_url(),
                e
            );
        }
    }
}
