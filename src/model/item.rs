//! Item records for the catalog mirror
//!
//! A `ParsedItem` is what the parser hands over; an `ItemRecord` is the stored row.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Reasons a parsed item cannot be persisted
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("Item at {0} has an empty name")]
    EmptyName(String),

    #[error("Rating {rating} out of range 1-5 for {url}")]
    RatingOutOfRange { url: String, rating: u8 },

    #[error("Negative {field} ({value}) for {url}")]
    NegativePrice {
        url: String,
        field: &'static str,
        value: f64,
    },
}

/// Fields extracted from one item page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedItem {
    /// Absolute source URL (the item identity)
    pub source_url: String,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub price_excl_tax: f64,
    pub price_incl_tax: f64,
    /// Availability text, e.g. "In stock"
    pub availability: String,
    pub num_reviews: u32,
    /// Star rating, 1 to 5
    pub rating: u8,
    pub image_url: String,
}

impl ParsedItem {
    /// Checks the record invariants that the database also enforces
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.name.trim().is_empty() {
            return Err(RecordError::EmptyName(self.source_url.clone()));
        }

        if !(1..=5).contains(&self.rating) {
            return Err(RecordError::RatingOutOfRange {
                url: self.source_url.clone(),
                rating: self.rating,
            });
        }

        for (field, value) in [
            ("price_excl_tax", self.price_excl_tax),
            ("price_incl_tax", self.price_incl_tax),
        ] {
            if value < 0.0 || value.is_nan() {
                return Err(RecordError::NegativePrice {
                    url: self.source_url.clone(),
                    field,
                    value,
                });
            }
        }

        Ok(())
    }
}

/// Crawl status marker stored with each item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Success,
    Pending,
    Error,
}

impl CrawlStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Pending => "pending",
            Self::Error => "error",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "pending" => Some(Self::Pending),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A persisted catalog item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemRecord {
    pub id: i64,
    #[serde(flatten)]
    pub item: ParsedItem,
    /// Fingerprint over the tracked fields
    pub content_hash: String,
    /// First time the item was seen
    pub crawled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub crawl_status: CrawlStatus,
}

impl ItemRecord {
    pub fn source_url(&self) -> &str {
        &self.item.source_url
    }

    pub fn name(&self) -> &str {
        &self.item.name
    }
}
