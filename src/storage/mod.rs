//! Storage module for the catalog mirror
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Item persistence keyed by source URL
//! - The append-only change log and its audit queries

mod schema;
mod sqlite;
mod traits;

pub use schema::initialize_schema;
pub use sqlite::SqliteStorage;
pub use traits::{ChangeQuery, Storage, StorageError, StorageResult};

use crate::ShelfError;

use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(ShelfError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, ShelfError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    SqliteStorage::new(path)
}
