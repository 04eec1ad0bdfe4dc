//! Field-level change detection

use crate::model::{ChangeDescriptor, ParsedItem, TrackedField};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Computes the content fingerprint of an item
///
/// SHA-256 over the tracked `name=value` pairs sorted by field name, one per line.
/// Untracked fields do not contribute.
pub fn fingerprint(item: &ParsedItem) -> String {
    let mut pairs: Vec<(&'static str, String)> = TrackedField::ALL
        .iter()
        .map(|field| (field.as_str(), field.value_of(item).to_db_string()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (name, value) in pairs {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }

    hex::encode(hasher.finalize())
}

/// Compares the tracked fields of two versions of an item
///
/// # Arguments
///
/// * `existing` - The stored version
/// * `incoming` - The freshly parsed version
/// * `at` - Timestamp stamped on every descriptor
///
/// # Returns
///
/// One `update` descriptor per tracked field whose value differs, in
/// `TrackedField::ALL` order, carrying the stored name. Empty if nothing
/// tracked changed.
pub fn detect(
    existing: &ParsedItem,
    incoming: &ParsedItem,
    at: DateTime<Utc>,
) -> Vec<ChangeDescriptor> {
    TrackedField::ALL
        .iter()
        .filter_map(|field| {
            ChangeDescriptor::update(
                &existing.name,
                *field,
                field.value_of(existing),
                field.value_of(incoming),
                at,
            )
        })
        .collect()
}
