//! Change detection and transactional persistence
//!
//! This module contains:
//! - The content fingerprint and field-level diff
//! - `ChangeTracker`, the single writer of items and audit entries
//! - Post-commit notifiers

pub mod detect;
mod notify;
mod persistence;

pub use detect::{detect, fingerprint};
pub use notify::{ChangeEvent, ChangeNotifier, LogNotifier, NotifyError};
pub use persistence::{ChangeTracker, SharedStorage, UpsertOutcome};
