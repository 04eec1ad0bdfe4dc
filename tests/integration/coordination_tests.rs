//! Integration tests for the crawl lock and the rate limiter
//!
//! Both run against the in-process store and against two SQLite handles on one
//! file, which stand in for two processes sharing the coordination store.

use async_trait::async_trait;
use shelfwatch::kv::{KvError, KvResult, KvStore, MemoryKvStore, SqliteKvStore, WindowCount};
use shelfwatch::{CrawlLock, RateLimiter};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

const HOUR: Duration = Duration::from_secs(3600);

/// Two handles on the same SQLite file
fn shared_sqlite_stores(dir: &TempDir) -> (Arc<dyn KvStore>, Arc<dyn KvStore>) {
    let path = dir.path().join("coordination.db");
    let first = SqliteKvStore::open(&path).expect("Failed to open first handle");
    let second = SqliteKvStore::open(&path).expect("Failed to open second handle");
    (Arc::new(first), Arc::new(second))
}

fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Store that is always unreachable
struct UnreachableStore;

#[async_trait]
impl KvStore for UnreachableStore {
    async fn acquire_lease(&self, _key: &str, _owner: &str, _ttl: Duration) -> KvResult<bool> {
        Err(KvError::Unavailable("connection refused".to_string()))
    }

    async fn release_lease(&self, _key: &str, _owner: &str) -> KvResult<bool> {
        Err(KvError::Unavailable("connection refused".to_string()))
    }

    async fn increment_within_limit(
        &self,
        _key: &str,
        _limit: u64,
        _window: Duration,
    ) -> KvResult<WindowCount> {
        Err(KvError::Unavailable("connection refused".to_string()))
    }
}

/// Races `contenders` acquisitions, alternating between the given locks
async fn race_for_lock(locks: &[CrawlLock], contenders: usize) -> usize {
    let mut handles = Vec::new();
    for i in 0..contenders {
        let lock = locks[i % locks.len()].clone();
        handles.push(tokio::spawn(async move {
            lock.try_acquire("crawl:catalog", HOUR).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_some() {
            winners += 1;
        }
    }
    winners
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_concurrent_acquire_wins_in_memory() {
    let lock = CrawlLock::new(Arc::new(MemoryKvStore::new()));

    assert_eq!(race_for_lock(&[lock], 16).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_concurrent_acquire_wins_across_handles() {
    let dir = TempDir::new().unwrap();
    let (first, second) = shared_sqlite_stores(&dir);
    let locks = [CrawlLock::new(first), CrawlLock::new(second)];

    assert_eq!(race_for_lock(&locks, 8).await, 1);
}

#[tokio::test]
async fn test_release_by_other_handle_requires_token() {
    let dir = TempDir::new().unwrap();
    let (first, second) = shared_sqlite_stores(&dir);
    let lock_a = CrawlLock::new(first);
    let lock_b = CrawlLock::new(second);

    let token = lock_a
        .try_acquire("crawl:catalog", HOUR)
        .await
        .unwrap()
        .expect("Lock should be free");
    assert!(lock_b
        .try_acquire("crawl:catalog", HOUR)
        .await
        .unwrap()
        .is_none());

    // Any process holding the token may release
    assert!(lock_b.release(token).await.unwrap());
    assert!(lock_b
        .try_acquire("crawl:catalog", HOUR)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_expired_lock_can_be_taken_over() {
    let lock = CrawlLock::new(Arc::new(MemoryKvStore::new()));

    let stale = lock
        .try_acquire("crawl:catalog", Duration::from_millis(30))
        .await
        .unwrap()
        .expect("Lock should be free");

    tokio::time::sleep(Duration::from_millis(80)).await;

    let fresh = lock
        .try_acquire("crawl:catalog", HOUR)
        .await
        .unwrap()
        .expect("Expired lock should be acquirable");

    // The old holder cannot release the new holder's lock
    assert!(!lock.release(stale).await.unwrap());
    assert!(lock
        .try_acquire("crawl:catalog", HOUR)
        .await
        .unwrap()
        .is_none());
    assert!(lock.release(fresh).await.unwrap());
}

#[tokio::test]
async fn test_lock_store_errors_are_reported() {
    let lock = CrawlLock::new(Arc::new(UnreachableStore));

    let result = lock.try_acquire("crawl:catalog", HOUR).await;
    assert!(matches!(result, Err(KvError::Unavailable(_))));
}

#[tokio::test]
async fn test_rate_limit_counts_down_then_rejects() {
    let limiter = RateLimiter::new(Arc::new(MemoryKvStore::new()), 100, HOUR);
    let before = epoch_secs();

    for i in 0..100u64 {
        let decision = limiter.check_and_increment("api-key-1").await;
        assert!(decision.allowed, "request {} should be allowed", i + 1);
        assert_eq!(decision.remaining, 99 - i);
        assert_eq!(decision.status_code(), 200);
        assert!(decision.retry_after_secs.is_none());
    }

    let rejected = limiter.check_and_increment("api-key-1").await;
    assert!(!rejected.allowed);
    assert_eq!(rejected.status_code(), 429);
    assert_eq!(rejected.remaining, 0);
    assert!(rejected.reset_at > before);
    let retry_after = rejected.retry_after_secs.expect("Retry-After on rejection");
    assert!((1..=3600).contains(&retry_after));

    let headers = rejected.headers();
    assert!(headers.contains(&("X-RateLimit-Limit", "100".to_string())));
    assert!(headers.contains(&("X-RateLimit-Remaining", "0".to_string())));
    assert!(headers.iter().any(|(name, _)| *name == "Retry-After"));

    // Other callers have their own window
    let other = limiter.check_and_increment("api-key-2").await;
    assert!(other.allowed);
    assert_eq!(other.remaining, 99);
}

async fn admitted_under_contention(limiter: RateLimiter, requests: usize) -> usize {
    let mut handles = Vec::new();
    for _ in 0..requests {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter.check_and_increment("burst").await.allowed
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    admitted
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_never_exceed_limit_in_memory() {
    let limiter = RateLimiter::new(Arc::new(MemoryKvStore::new()), 5, HOUR);

    assert_eq!(admitted_under_contention(limiter, 40).await, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_never_exceed_limit_across_handles() {
    let dir = TempDir::new().unwrap();
    let (first, second) = shared_sqlite_stores(&dir);
    let limiter_a = RateLimiter::new(first, 5, HOUR);
    let limiter_b = RateLimiter::new(second, 5, HOUR);

    let (a, b) = tokio::join!(
        admitted_under_contention(limiter_a, 10),
        admitted_under_contention(limiter_b, 10)
    );
    assert_eq!(a + b, 5);
}

#[tokio::test]
async fn test_window_resets_after_expiry() {
    let limiter = RateLimiter::new(Arc::new(MemoryKvStore::new()), 2, Duration::from_millis(100));

    assert!(limiter.check_and_increment("caller").await.allowed);
    assert!(limiter.check_and_increment("caller").await.allowed);
    assert!(!limiter.check_and_increment("caller").await.allowed);

    tokio::time::sleep(Duration::from_millis(150)).await;

    let decision = limiter.check_and_increment("caller").await;
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 1);
}

#[tokio::test]
async fn test_rate_limiter_fails_open() {
    let limiter = RateLimiter::new(Arc::new(UnreachableStore), 100, HOUR);

    for _ in 0..3 {
        let decision = limiter.check_and_increment("caller").await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 100);
        assert!(decision.retry_after_secs.is_none());
    }
}
