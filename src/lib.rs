//! Shelfwatch: a change-tracked catalog mirror
//!
//! This crate crawls a paginated product catalog, keeps a mirror of every item in
//! SQLite and records an append-only audit log of every tracked field change. Crawl
//! runs are serialized cluster-wide through a lease in a shared key-value store, and
//! the same store backs a fixed-window request rate limiter for the read API.

pub mod changes;
pub mod config;
pub mod crawler;
pub mod kv;
pub mod lock;
pub mod model;
pub mod output;
pub mod rate_limit;
pub mod storage;

use thiserror::Error;

/// Main error type for Shelfwatch operations
#[derive(Debug, Error)]
pub enum ShelfError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Key-value store error: {0}")]
    Kv(#[from] kv::KvError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid date: {0}")]
    InvalidDate(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Shelfwatch operations
pub type Result<T> = std::result::Result<T, ShelfError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use changes::{ChangeTracker, UpsertOutcome};
pub use config::Config;
pub use crawler::{Coordinator, CrawlSummary};
pub use lock::{CrawlLock, LockToken};
pub use model::{ChangeDescriptor, ChangeType, ItemRecord, ParsedItem, TrackedField};
pub use rate_limit::{RateLimitDecision, RateLimiter};
