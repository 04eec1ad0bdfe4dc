//! Cluster-wide crawl lock
//!
//! A named lease in the shared key-value store. Acquisition never blocks: a
//! caller that finds the lock held skips its cycle. A holder that dies simply
//! lets the lease run out.

use crate::kv::{KvResult, KvStore};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Proof of holding a lock; required to release it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    resource: String,
    owner: String,
}

impl LockToken {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

/// Mutual exclusion over named resources
#[derive(Clone)]
pub struct CrawlLock {
    store: Arc<dyn KvStore>,
}

impl CrawlLock {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn key(resource: &str) -> String {
        format!("lock:{}", resource)
    }

    /// Attempts to take the lock without waiting
    ///
    /// # Arguments
    ///
    /// * `resource` - Name of the guarded resource
    /// * `ttl` - How long the lock survives without a release
    ///
    /// # Returns
    ///
    /// * `Ok(Some(token))` - The caller now holds the lock
    /// * `Ok(None)` - Someone else holds an unexpired lock
    /// * `Err(KvError)` - The store could not be reached
    pub async fn try_acquire(&self, resource: &str, ttl: Duration) -> KvResult<Option<LockToken>> {
        let owner = Uuid::new_v4().to_string();

        if self
            .store
            .acquire_lease(&Self::key(resource), &owner, ttl)
            .await?
        {
            tracing::debug!("Acquired lock '{}' (owner {})", resource, owner);
            Ok(Some(LockToken {
                resource: resource.to_string(),
                owner,
            }))
        } else {
            Ok(None)
        }
    }

    /// Releases a lock previously returned by `try_acquire`
    ///
    /// Returns `false` if the lock had already expired or passed to another owner;
    /// in that case nothing is deleted.
    pub async fn release(&self, token: LockToken) -> KvResult<bool> {
        let released = self
            .store
            .release_lease(&Self::key(&token.resource), &token.owner)
            .await?;

        if released {
            tracing::debug!("Released lock '{}'", token.resource);
        } else {
            tracing::warn!(
                "Lock '{}' was no longer held by {} at release",
                token.resource,
                token.owner
            );
        }

        Ok(released)
    }
}
