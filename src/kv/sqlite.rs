//! SQLite key-value backend
//!
//! Several processes may open the same file. Each primitive is a single
//! conditional statement (or one IMMEDIATE transaction), so SQLite's write lock
//! serializes competing callers across processes.

use super::{duration_ms, now_ms, KvError, KvResult, KvStore, WindowCount};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const KV_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv_leases (
    key TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    expires_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS kv_counters (
    key TEXT PRIMARY KEY,
    count INTEGER NOT NULL,
    window_ends_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_kv_counters_window ON kv_counters(window_ends_at_ms);
"#;

/// Key-value store in a shared SQLite file
#[derive(Clone)]
pub struct SqliteKvStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKvStore {
    /// Opens (or creates) the store at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite file shared by all coordinating processes
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteKvStore)` - Store ready for use
    /// * `Err(KvError)` - Failed to open the file or create the tables
    pub fn open(path: &Path) -> KvResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(KV_SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens a private in-memory store
    pub fn in_memory() -> KvResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(KV_SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `op` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, op: F) -> KvResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> KvResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| KvError::LockPoisoned)?;
            op(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn acquire_lease(&self, key: &str, owner: &str, ttl: Duration) -> KvResult<bool> {
        let key = key.to_string();
        let owner = owner.to_string();
        let ttl_ms = duration_ms(ttl);

        self.with_conn(move |conn| {
            let now = now_ms();
            let changed = conn.execute(
                "INSERT INTO kv_leases (key, owner, expires_at_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE
                 SET owner = excluded.owner, expires_at_ms = excluded.expires_at_ms
                 WHERE kv_leases.expires_at_ms <= ?4",
                params![key, owner, now.saturating_add(ttl_ms), now],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn release_lease(&self, key: &str, owner: &str) -> KvResult<bool> {
        let key = key.to_string();
        let owner = owner.to_string();

        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM kv_leases WHERE key = ?1 AND owner = ?2 AND expires_at_ms > ?3",
                params![key, owner, now_ms()],
            )?;
            Ok(deleted == 1)
        })
        .await
    }

    async fn increment_within_limit(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> KvResult<WindowCount> {
        let key = key.to_string();
        let window_ms = duration_ms(window);
        let limit_sql = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_conn(move |conn| {
            let now = now_ms();
            let fresh_end = now.saturating_add(window_ms);

            if limit == 0 {
                return Ok(WindowCount {
                    admitted: false,
                    count: 0,
                    window_ends_at_ms: fresh_end,
                });
            }

            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            tx.execute(
                "DELETE FROM kv_counters WHERE window_ends_at_ms <= ?1",
                params![now],
            )?;

            let admitted: Option<(i64, i64)> = tx
                .query_row(
                    "INSERT INTO kv_counters (key, count, window_ends_at_ms) VALUES (?1, 1, ?2)
                     ON CONFLICT(key) DO UPDATE SET
                         count = CASE WHEN kv_counters.window_ends_at_ms <= ?3
                                      THEN 1 ELSE kv_counters.count + 1 END,
                         window_ends_at_ms = CASE WHEN kv_counters.window_ends_at_ms <= ?3
                                      THEN excluded.window_ends_at_ms
                                      ELSE kv_counters.window_ends_at_ms END
                     WHERE kv_counters.window_ends_at_ms <= ?3 OR kv_counters.count < ?4
                     RETURNING count, window_ends_at_ms",
                    params![key, fresh_end, now, limit_sql],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let result = match admitted {
                Some((count, window_ends_at_ms)) => WindowCount {
                    admitted: true,
                    count: count.max(0) as u64,
                    window_ends_at_ms,
                },
                None => {
                    let (count, window_ends_at_ms): (i64, i64) = tx.query_row(
                        "SELECT count, window_ends_at_ms FROM kv_counters WHERE key = ?1",
                        params![key],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )?;
                    WindowCount {
                        admitted: false,
                        count: count.max(0) as u64,
                        window_ends_at_ms,
                    }
                }
            };

            tx.commit()?;
            Ok(result)
        })
        .await
    }
}
