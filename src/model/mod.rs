//! Domain records for the catalog mirror
//!
//! # Components
//!
//! - `ParsedItem`: the fields extracted from one item page
//! - `ItemRecord`: a persisted item with identity, fingerprint and timestamps
//! - `ChangeDescriptor` / `ChangeLogEntry`: proposed and persisted audit entries
//! - `TrackedField` / `FieldValue`: the audited attribute set and its typed values

mod change;
mod item;

pub use change::{ChangeDescriptor, ChangeLogEntry, ChangeType, FieldValue, TrackedField};
pub use item::{CrawlStatus, ItemRecord, ParsedItem, RecordError};
