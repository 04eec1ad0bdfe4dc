//! Configuration module for Shelfwatch
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use shelfwatch::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("shelfwatch.toml")).unwrap();
//! println!("Item workers: {}", config.crawl.concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlConfig, FetchConfig, RateLimitConfig, ScheduleConfig, StorageConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
