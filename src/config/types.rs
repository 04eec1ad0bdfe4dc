use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Main configuration structure for Shelfwatch
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,
    pub crawl: CrawlConfig,
    pub storage: StorageConfig,
    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Outbound HTTP behavior
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first attempt
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the exponential backoff: waits are `unit * 2^attempt` (milliseconds)
    #[serde(rename = "backoff-unit-ms", default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,

    /// Pause after every request, whatever its outcome (milliseconds)
    #[serde(rename = "politeness-delay-ms", default = "default_politeness_delay_ms")]
    pub politeness_delay_ms: u64,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_unit_ms: default_backoff_unit_ms(),
            politeness_delay_ms: default_politeness_delay_ms(),
        }
    }
}

/// Catalog walk and worker pool settings
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Root of the catalog site
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Path of a catalog page relative to `base-url`; `{page}` is the page number
    #[serde(rename = "catalog-path", default = "default_catalog_path")]
    pub catalog_path: String,

    #[serde(rename = "start-page", default = "default_start_page")]
    pub start_page: u32,

    /// Last page to visit; discovered from page one when absent
    #[serde(rename = "end-page", default)]
    pub end_page: Option<u32>,

    /// Page count assumed when discovery fails
    #[serde(rename = "default-total-pages", default = "default_total_pages")]
    pub default_total_pages: u32,

    /// Maximum number of item fetches in flight
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Items per progress batch
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    /// Upper bound on a crawl run; also the crawl lock TTL (seconds)
    #[serde(
        rename = "max-crawl-duration-secs",
        default = "default_max_crawl_duration_secs"
    )]
    pub max_crawl_duration_secs: u64,

    #[serde(rename = "lock-name", default = "default_lock_name")]
    pub lock_name: String,
}

impl CrawlConfig {
    pub fn max_crawl_duration(&self) -> Duration {
        Duration::from_secs(self.max_crawl_duration_secs)
    }

    /// Builds the absolute URL of a catalog page
    pub fn page_url(&self, page: u32) -> Result<Url, url::ParseError> {
        let mut base = self.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let path = self.catalog_path.replace("{page}", &page.to_string());
        Url::parse(&base)?.join(&path)
    }
}

/// Database locations
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database holding items and the change log
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Path to the SQLite file shared for locks and rate counters
    #[serde(rename = "kv-path")]
    pub kv_path: String,
}

/// Read API rate limiting
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per caller per window
    #[serde(default = "default_rate_limit_requests")]
    pub requests: u64,

    #[serde(rename = "window-secs", default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_rate_limit_requests(),
            window_secs: default_rate_limit_window_secs(),
        }
    }
}

/// Periodic crawl cadence
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(rename = "interval-secs", default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Run a crawl immediately instead of waiting one interval
    #[serde(rename = "run-on-start", default)]
    pub run_on_start: bool,
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            run_on_start: false,
        }
    }
}

fn default_user_agent() -> String {
    format!("shelfwatch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_politeness_delay_ms() -> u64 {
    500
}

fn default_catalog_path() -> String {
    "catalogue/page-{page}.html".to_string()
}

fn default_start_page() -> u32 {
    1
}

fn default_total_pages() -> u32 {
    50
}

fn default_concurrency() -> usize {
    10
}

fn default_batch_size() -> usize {
    50
}

fn default_max_crawl_duration_secs() -> u64 {
    1800
}

fn default_lock_name() -> String {
    "crawl:catalog".to_string()
}

fn default_rate_limit_requests() -> u64 {
    100
}

fn default_rate_limit_window_secs() -> u64 {
    3600
}

fn default_interval_secs() -> u64 {
    86400
}
