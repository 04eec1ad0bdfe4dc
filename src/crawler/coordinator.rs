//! Crawler coordinator - main crawl orchestration logic
//!
//! A crawl walks the catalog pages in ascending order, one at a time, collecting
//! item URLs. Item pages are then fetched in fixed-size batches under a bounded
//! worker pool, and each parsed item goes through the change tracker. Failures of
//! single pages or items are counted in the summary and never abort the run.

use crate::changes::{ChangeTracker, UpsertOutcome};
use crate::config::{Config, CrawlConfig};
use crate::crawler::fetcher::{FetchFailure, Fetcher};
use crate::crawler::parser::{BookstoreParser, CatalogParser};
use crate::ShelfError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout_at;

/// Counts for one crawl run
///
/// `scraped` items each land in exactly one of `inserted`, `updated`,
/// `unchanged`, `duplicates` or `errors`. `failed` counts items that never
/// reached persistence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlSummary {
    pub catalog_pages: u32,
    pub catalog_pages_failed: u32,
    pub items_discovered: usize,
    pub scraped: usize,
    pub inserted: usize,
    /// Existing items with at least one tracked change
    pub updated: usize,
    pub unchanged: usize,
    pub duplicates: usize,
    /// Fetch, parse or validation failures
    pub failed: usize,
    /// Persistence failures
    pub errors: usize,
    pub changes_detected: usize,
    pub changes_logged: usize,
    /// The run stopped early at the maximum crawl duration
    pub timed_out: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CrawlSummary {
    fn start() -> Self {
        let now = Utc::now();
        Self {
            catalog_pages: 0,
            catalog_pages_failed: 0,
            items_discovered: 0,
            scraped: 0,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            duplicates: 0,
            failed: 0,
            errors: 0,
            changes_detected: 0,
            changes_logged: 0,
            timed_out: false,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }

    fn finish(&mut self, elapsed: Duration) {
        self.finished_at = Utc::now();
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    fn record(&mut self, result: &ItemResult) {
        let outcome = match result {
            ItemResult::Unavailable => {
                self.failed += 1;
                return;
            }
            ItemResult::Persisted(outcome) => outcome,
        };

        self.scraped += 1;
        self.changes_detected += outcome.changes_detected();
        self.changes_logged += outcome.changes_logged();

        match outcome {
            UpsertOutcome::Inserted { .. } => self.inserted += 1,
            UpsertOutcome::Updated { changes, .. } if changes.is_empty() => self.unchanged += 1,
            UpsertOutcome::Updated { .. } => self.updated += 1,
            UpsertOutcome::Duplicate => self.duplicates += 1,
            UpsertOutcome::Error { .. } => self.errors += 1,
        }
    }
}

/// What happened to one discovered item URL
enum ItemResult {
    /// Fetch, parse or validation failed
    Unavailable,
    Persisted(UpsertOutcome),
}

/// Main crawler coordinator structure
pub struct Coordinator {
    config: CrawlConfig,
    fetcher: Arc<Fetcher>,
    parser: Arc<dyn CatalogParser>,
    tracker: Arc<ChangeTracker>,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The full configuration
    /// * `tracker` - Writer for parsed items
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(ShelfError)` - The HTTP client could not be built
    pub fn new(config: &Config, tracker: Arc<ChangeTracker>) -> Result<Self, ShelfError> {
        let fetcher = Fetcher::new(&config.fetch)?;
        Ok(Self::with_fetcher(config.crawl.clone(), fetcher, tracker))
    }

    /// Creates a coordinator around an existing fetcher
    ///
    /// A zero `concurrency` or `batch_size` is raised to one.
    pub fn with_fetcher(
        mut config: CrawlConfig,
        fetcher: Fetcher,
        tracker: Arc<ChangeTracker>,
    ) -> Self {
        if config.concurrency == 0 || config.batch_size == 0 {
            tracing::warn!(
                "concurrency ({}) and batch_size ({}) must be at least 1, raising to 1",
                config.concurrency,
                config.batch_size
            );
            config.concurrency = config.concurrency.max(1);
            config.batch_size = config.batch_size.max(1);
        }

        Self {
            config,
            fetcher: Arc::new(fetcher),
            parser: Arc::new(BookstoreParser),
            tracker,
        }
    }

    /// Replaces the default bookstore parser
    pub fn with_parser(mut self, parser: Arc<dyn CatalogParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Crawls catalog pages `start_page..=end_page` and persists every item found
    ///
    /// # Arguments
    ///
    /// * `start_page` - First catalog page (1-based)
    /// * `end_page` - Last catalog page; discovered from page one when `None`
    ///
    /// # Returns
    ///
    /// The run summary. Individual failures are counted, not returned.
    pub async fn crawl(&self, start_page: u32, end_page: Option<u32>) -> CrawlSummary {
        let started = Instant::now();
        let deadline = started + self.config.max_crawl_duration();
        let mut summary = CrawlSummary::start();

        let (end_page, mut first_page) = match end_page {
            Some(end) => (end, None),
            None => match timeout_at(deadline.into(), self.discover_end_page()).await {
                Ok(discovered) => discovered,
                Err(_) => {
                    tracing::warn!("Maximum crawl duration reached during page discovery");
                    summary.timed_out = true;
                    (start_page.saturating_sub(1), None)
                }
            },
        };

        tracing::info!("Crawling catalog pages {} to {}", start_page, end_page);

        // Catalog pages, strictly in order
        let mut seen = HashSet::new();
        let mut item_urls = Vec::new();

        for page in start_page..=end_page {
            if summary.timed_out {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!("Maximum crawl duration reached at catalog page {}", page);
                summary.timed_out = true;
                break;
            }

            let page_url = match self.config.page_url(page) {
                Ok(url) => url.to_string(),
                Err(e) => {
                    tracing::warn!("Cannot build URL for catalog page {}: {}", page, e);
                    summary.catalog_pages_failed += 1;
                    continue;
                }
            };

            let body = match first_page.take() {
                Some(body) if page == 1 => Ok(body),
                _ => match timeout_at(deadline.into(), self.fetcher.fetch(&page_url)).await {
                    Ok(fetched) => fetched,
                    Err(_) => {
                        tracing::warn!(
                            "Maximum crawl duration reached while fetching catalog page {}",
                            page
                        );
                        summary.timed_out = true;
                        break;
                    }
                },
            };

            match body {
                Ok(html) => {
                    summary.catalog_pages += 1;
                    let found = self.parser.parse_item_list(&html, &page_url);
                    tracing::debug!("Catalog page {}: {} items", page, found.len());
                    for url in found {
                        if seen.insert(url.clone()) {
                            item_urls.push(url);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to fetch catalog page {}: {}", page, e);
                    summary.catalog_pages_failed += 1;
                }
            }
        }

        summary.items_discovered = item_urls.len();
        tracing::info!(
            "Discovered {} items on {} catalog pages",
            item_urls.len(),
            summary.catalog_pages
        );

        // Item pages, batched under the worker pool
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let batch_count = item_urls.len().div_ceil(self.config.batch_size);

        for (index, batch) in item_urls.chunks(self.config.batch_size).enumerate() {
            if !summary.timed_out && Instant::now() >= deadline {
                tracing::warn!(
                    "Maximum crawl duration reached, {} batches not started",
                    batch_count - index
                );
                summary.timed_out = true;
            }
            if summary.timed_out {
                break;
            }

            let mut tasks = JoinSet::new();
            for url in batch {
                let semaphore = Arc::clone(&semaphore);
                let fetcher = Arc::clone(&self.fetcher);
                let parser = Arc::clone(&self.parser);
                let tracker = Arc::clone(&self.tracker);
                let url = url.clone();

                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    process_item(&fetcher, parser.as_ref(), tracker, url).await
                });
            }

            let drained = timeout_at(deadline.into(), async {
                while let Some(joined) = tasks.join_next().await {
                    match joined {
                        Ok(result) => summary.record(&result),
                        Err(e) => {
                            tracing::error!("Item task failed: {}", e);
                            summary.failed += 1;
                        }
                    }
                }
            })
            .await;

            if drained.is_err() {
                let unfinished = tasks.len();
                tracing::warn!(
                    "Maximum crawl duration reached, aborting {} unfinished items",
                    unfinished
                );
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                summary.failed += unfinished;
                summary.timed_out = true;
            }

            tracing::info!(
                "Batch {}/{} done: {} scraped, {} failed, {} changes logged",
                index + 1,
                batch_count,
                summary.scraped,
                summary.failed,
                summary.changes_logged
            );
        }

        summary.finish(started.elapsed());
        tracing::info!(
            "Crawl finished in {:.1}s: {} inserted, {} updated, {} unchanged, {} duplicates, {} failed, {} errors",
            summary.duration().as_secs_f64(),
            summary.inserted,
            summary.updated,
            summary.unchanged,
            summary.duplicates,
            summary.failed,
            summary.errors
        );

        summary
    }

    /// Reads the page count from catalog page one
    ///
    /// Returns the last page and, when it was fetched, page one's body.
    async fn discover_end_page(&self) -> (u32, Option<String>) {
        let fallback = self.config.default_total_pages;

        let page_url = match self.config.page_url(1) {
            Ok(url) => url.to_string(),
            Err(e) => {
                tracing::warn!("Cannot build URL for catalog page 1: {}", e);
                return (fallback, None);
            }
        };

        match self.fetcher.fetch(&page_url).await {
            Ok(html) => match self.parser.parse_pagination(&html, &page_url).total_pages {
                Some(total) if total >= 1 => (total, Some(html)),
                _ => {
                    tracing::warn!(
                        "No page count on {}, assuming {} pages",
                        page_url,
                        fallback
                    );
                    (fallback, Some(html))
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Page discovery failed ({}), assuming {} pages",
                    e,
                    fallback
                );
                (fallback, None)
            }
        }
    }
}

/// Fetches, parses, validates and persists one item
async fn process_item(
    fetcher: &Fetcher,
    parser: &dyn CatalogParser,
    tracker: Arc<ChangeTracker>,
    url: String,
) -> ItemResult {
    let html = match fetcher.fetch(&url).await {
        Ok(html) => html,
        Err(e) => {
            log_fetch_failure(&e);
            return ItemResult::Unavailable;
        }
    };

    let Some(item) = parser.parse_item(&html, &url) else {
        tracing::warn!("Could not parse item page {}", url);
        return ItemResult::Unavailable;
    };

    if let Err(e) = item.validate() {
        tracing::warn!("Rejected item: {}", e);
        return ItemResult::Unavailable;
    }

    match tokio::task::spawn_blocking(move || tracker.upsert(&item)).await {
        Ok(outcome) => ItemResult::Persisted(outcome),
        Err(e) => {
            tracing::error!("Persistence task for {} failed: {}", url, e);
            ItemResult::Persisted(UpsertOutcome::Error {
                message: e.to_string(),
                changes_detected: 0,
            })
        }
    }
}

fn log_fetch_failure(failure: &FetchFailure) {
    match failure {
        FetchFailure::Terminal { .. } => tracing::warn!("Skipping item: {}", failure),
        FetchFailure::RetriesExhausted { .. } => tracing::warn!("Item failed: {}", failure),
    }
}
