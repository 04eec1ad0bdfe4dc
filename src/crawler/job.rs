//! Crawl runs guarded by the cluster-wide lock
//!
//! Both the manual trigger and the periodic schedule go through
//! `run_locked_crawl`, so at most one crawl is active across all processes.

use crate::config::{CrawlConfig, ScheduleConfig};
use crate::crawler::coordinator::{Coordinator, CrawlSummary};
use crate::kv::KvResult;
use crate::lock::CrawlLock;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Extra lease time beyond the crawl budget, covering shutdown of aborted work
pub const LOCK_GRACE: Duration = Duration::from_secs(30);

/// Result of one locked crawl attempt
#[derive(Debug, Clone, PartialEq)]
pub enum CrawlRun {
    Completed(CrawlSummary),
    /// Another crawl held the lock; nothing was done
    Skipped,
}

/// Runs one crawl if the crawl lock is free
///
/// # Arguments
///
/// * `lock` - The crawl lock
/// * `coordinator` - Coordinator that performs the crawl
/// * `start_page` - First catalog page
/// * `end_page` - Last catalog page, or `None` to discover it
///
/// # Returns
///
/// * `Ok(CrawlRun::Completed)` - The crawl ran; the lock has been released
/// * `Ok(CrawlRun::Skipped)` - The lock was held elsewhere
/// * `Err(KvError)` - The lock store failed; no crawl was started
pub async fn run_locked_crawl(
    lock: &CrawlLock,
    coordinator: &Coordinator,
    start_page: u32,
    end_page: Option<u32>,
) -> KvResult<CrawlRun> {
    let config: &CrawlConfig = coordinator.config();

    let Some(token) = lock
        .try_acquire(&config.lock_name, config.max_crawl_duration() + LOCK_GRACE)
        .await?
    else {
        tracing::info!(
            "Crawl lock '{}' is held by another run, skipping this cycle",
            config.lock_name
        );
        return Ok(CrawlRun::Skipped);
    };

    let summary = coordinator.crawl(start_page, end_page).await;

    if let Err(e) = lock.release(token).await {
        tracing::warn!(
            "Failed to release crawl lock '{}', it will expire on its own: {}",
            config.lock_name,
            e
        );
    }

    Ok(CrawlRun::Completed(summary))
}

/// Runs locked crawls forever at a fixed interval
///
/// Cycles that find the lock held are skipped; lock store errors are logged and
/// the loop waits for the next tick.
pub async fn run_schedule(
    lock: &CrawlLock,
    coordinator: &Coordinator,
    schedule: &ScheduleConfig,
) {
    let mut interval = tokio::time::interval(schedule.interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    if !schedule.run_on_start {
        // The first tick completes immediately
        interval.tick().await;
    }

    let start_page = coordinator.config().start_page;
    let end_page = coordinator.config().end_page;

    loop {
        interval.tick().await;
        tracing::info!("Scheduled crawl cycle starting");

        match run_locked_crawl(lock, coordinator, start_page, end_page).await {
            Ok(CrawlRun::Completed(summary)) => {
                tracing::info!(
                    "Scheduled crawl done: {} scraped, {} changes logged",
                    summary.scraped,
                    summary.changes_logged
                );
            }
            Ok(CrawlRun::Skipped) => {}
            Err(e) => tracing::error!("Crawl lock unavailable, cycle skipped: {}", e),
        }
    }
}
