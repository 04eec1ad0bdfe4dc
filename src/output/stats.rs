//! Statistics generation from the catalog database
//!
//! This module provides functionality for extracting and displaying
//! catalog and change-log statistics from the storage layer.

use crate::model::{ChangeType, TrackedField};
use crate::storage::{ChangeQuery, Storage};
use crate::ShelfError;
use serde::Serialize;

/// Catalog statistics summary
#[derive(Debug, Clone, Serialize)]
pub struct CatalogStatistics {
    /// Number of mirrored items
    pub total_items: u64,

    /// Number of audit entries
    pub total_changes: u64,

    pub new_items: u64,
    pub updates: u64,

    /// Update count per tracked field, in field order; zero counts omitted
    pub changes_by_field: Vec<(TrackedField, u64)>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(CatalogStatistics)` - Successfully loaded statistics
/// * `Err(ShelfError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<CatalogStatistics, ShelfError> {
    let total_items = storage.count_items()?;
    let total_changes = storage.count_changes(&ChangeQuery::default())?;

    let count_type = |change_type| {
        storage.count_changes(&ChangeQuery {
            change_type: Some(change_type),
            ..ChangeQuery::default()
        })
    };
    let new_items = count_type(ChangeType::NewItem)?;
    let updates = count_type(ChangeType::Update)?;

    let mut changes_by_field = Vec::new();
    for field in TrackedField::ALL {
        let count = storage.count_changes(&ChangeQuery {
            field: Some(field),
            ..ChangeQuery::default()
        })?;
        if count > 0 {
            changes_by_field.push((field, count));
        }
    }

    Ok(CatalogStatistics {
        total_items,
        total_changes,
        new_items,
        updates,
        changes_by_field,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CatalogStatistics) {
    println!("=== Catalog Statistics ===\n");

    println!("Overview:");
    println!("  Items mirrored: {}", stats.total_items);
    println!("  Audit entries: {}", stats.total_changes);
    println!("    new items: {}", stats.new_items);
    println!("    updates: {}", stats.updates);
    println!();

    if !stats.changes_by_field.is_empty() {
        println!("Updates by Field:");
        let mut counts = stats.changes_by_field.clone();
        counts.sort_by(|a, b| b.1.cmp(&a.1));

        for (field, count) in counts {
            let percentage = if stats.updates > 0 {
                (count as f64 / stats.updates as f64) * 100.0
            } else {
                0.0
            };
            println!("  {}: {} ({:.1}%)", field, count, percentage);
        }
        println!();
    }
}
