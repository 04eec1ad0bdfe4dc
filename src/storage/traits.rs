//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::model::{ChangeDescriptor, ChangeLogEntry, ChangeType, ItemRecord, ParsedItem, TrackedField};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Duplicate source URL: {0}")]
    DuplicateUrl(String),

    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Filters for reading the audit log
///
/// Results are always newest first; entries sharing a timestamp come back in
/// reverse insertion order.
#[derive(Debug, Clone, Default)]
pub struct ChangeQuery {
    pub item_id: Option<i64>,
    pub change_type: Option<ChangeType>,
    pub field: Option<TrackedField>,
    /// Inclusive lower bound
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Trait for storage backend implementations
///
/// Every write method is a single transaction: either the item row and all of its
/// audit entries are committed, or nothing is.
pub trait Storage {
    // ===== Item Reads =====

    /// Gets an item by its source URL
    fn find_item_by_url(&self, url: &str) -> StorageResult<Option<ItemRecord>>;

    /// Gets an item by ID
    fn get_item(&self, item_id: i64) -> StorageResult<ItemRecord>;

    /// Gets total item count
    fn count_items(&self) -> StorageResult<u64>;

    // ===== Transactional Writes =====

    /// Inserts a new item together with its `new_item` audit entry
    ///
    /// Returns `StorageError::DuplicateUrl` if another writer already stored the URL.
    fn insert_new_item(
        &mut self,
        item: &ParsedItem,
        content_hash: &str,
        change: &ChangeDescriptor,
        at: DateTime<Utc>,
    ) -> StorageResult<ItemRecord>;

    /// Overwrites an item's fields and appends its `update` audit entries
    fn apply_item_changes(
        &mut self,
        item_id: i64,
        item: &ParsedItem,
        content_hash: &str,
        changes: &[ChangeDescriptor],
        at: DateTime<Utc>,
    ) -> StorageResult<ItemRecord>;

    /// Refreshes non-audited fields and the last-updated timestamp
    fn touch_item(
        &mut self,
        item_id: i64,
        item: &ParsedItem,
        content_hash: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<ItemRecord>;

    // ===== Audit Reads =====

    /// Gets audit entries matching the query
    fn query_changes(&self, query: &ChangeQuery) -> StorageResult<Vec<ChangeLogEntry>>;

    /// Counts audit entries matching the query (ignores limit and offset)
    fn count_changes(&self, query: &ChangeQuery) -> StorageResult<u64>;

    /// Gets the full history of one item, newest first
    fn item_history(&self, item_id: i64) -> StorageResult<Vec<ChangeLogEntry>> {
        self.query_changes(&ChangeQuery {
            item_id: Some(item_id),
            ..ChangeQuery::default()
        })
    }
}
