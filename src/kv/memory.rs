//! In-process key-value backend

use super::{duration_ms, now_ms, KvError, KvResult, KvStore, WindowCount};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug)]
struct Lease {
    owner: String,
    expires_at_ms: i64,
}

#[derive(Debug)]
struct Counter {
    count: u64,
    window_ends_at_ms: i64,
}

#[derive(Debug, Default)]
struct Entries {
    leases: HashMap<String, Lease>,
    counters: HashMap<String, Counter>,
}

/// Mutex-guarded maps; every primitive runs under one lock acquisition
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<Entries>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn acquire_lease(&self, key: &str, owner: &str, ttl: Duration) -> KvResult<bool> {
        let mut entries = self.entries.lock().map_err(|_| KvError::LockPoisoned)?;
        let now = now_ms();

        if let Some(lease) = entries.leases.get(key) {
            if lease.expires_at_ms > now {
                return Ok(false);
            }
        }

        entries.leases.insert(
            key.to_string(),
            Lease {
                owner: owner.to_string(),
                expires_at_ms: now.saturating_add(duration_ms(ttl)),
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, key: &str, owner: &str) -> KvResult<bool> {
        let mut entries = self.entries.lock().map_err(|_| KvError::LockPoisoned)?;
        let now = now_ms();

        match entries.leases.get(key) {
            Some(lease) if lease.owner == owner && lease.expires_at_ms > now => {
                entries.leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_within_limit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> KvResult<WindowCount> {
        let mut entries = self.entries.lock().map_err(|_| KvError::LockPoisoned)?;
        let now = now_ms();

        // Finished windows hold no state worth keeping
        entries.counters.retain(|_, c| c.window_ends_at_ms > now);

        let counter = entries
            .counters
            .entry(key.to_string())
            .or_insert(Counter {
                count: 0,
                window_ends_at_ms: now,
            });

        if counter.window_ends_at_ms <= now {
            counter.count = 0;
            counter.window_ends_at_ms = now.saturating_add(duration_ms(window));
        }

        let admitted = counter.count < limit;
        if admitted {
            counter.count += 1;
        }

        Ok(WindowCount {
            admitted,
            count: counter.count,
            window_ends_at_ms: counter.window_ends_at_ms,
        })
    }
}
