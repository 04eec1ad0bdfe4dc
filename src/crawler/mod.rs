//! Crawler module for catalog fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with retry logic
//! - HTML parsing of catalog and item pages
//! - Overall crawl coordination
//! - Lock-guarded crawl runs and the periodic schedule

mod coordinator;
mod fetcher;
mod job;
mod parser;

pub use coordinator::{Coordinator, CrawlSummary};
pub use fetcher::{backoff_schedule, build_http_client, FetchFailure, Fetcher};
pub use job::{run_locked_crawl, run_schedule, CrawlRun};
pub use parser::{
    parse_availability, parse_price, parse_rating, BookstoreParser, CatalogParser, Pagination,
};
