//! Post-commit change notifications
//!
//! Notifiers run after the storage transaction has committed. A notifier error is
//! logged by the caller and never touches the stored data.

use crate::model::{ChangeDescriptor, ItemRecord};
use thiserror::Error;

/// Errors a notifier may report
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// A committed change worth announcing
#[derive(Debug, Clone, Copy)]
pub enum ChangeEvent<'a> {
    NewItem {
        record: &'a ItemRecord,
        change: &'a ChangeDescriptor,
    },
    Updated {
        record: &'a ItemRecord,
        changes: &'a [ChangeDescriptor],
    },
}

impl ChangeEvent<'_> {
    pub fn record(&self) -> &ItemRecord {
        match self {
            Self::NewItem { record, .. } | Self::Updated { record, .. } => record,
        }
    }
}

/// Receiver of committed changes
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self, event: &ChangeEvent<'_>) -> Result<(), NotifyError>;
}

/// Writes each event to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl ChangeNotifier for LogNotifier {
    fn notify(&self, event: &ChangeEvent<'_>) -> Result<(), NotifyError> {
        match event {
            ChangeEvent::NewItem { record, change } => {
                tracing::info!("{} ({})", change.description, record.source_url());
            }
            ChangeEvent::Updated { record, changes } => {
                for change in changes.iter() {
                    tracing::info!("'{}': {}", record.name(), change.description);
                }
            }
        }
        Ok(())
    }
}
