//! Audit log entries and the tracked attribute set
//!
//! Only the attributes enumerated in `TrackedField` are audited. Name, description
//! and image churn from the source never produce an entry.

use crate::model::ParsedItem;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Classification of an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// The item was seen for the first time
    NewItem,
    /// A tracked attribute of an existing item changed
    Update,
}

impl ChangeType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::NewItem => "new_item",
            Self::Update => "update",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "new_item" => Some(Self::NewItem),
            "update" => Some(Self::Update),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// The audited attributes of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedField {
    PriceExclTax,
    PriceInclTax,
    Availability,
    NumReviews,
    Rating,
    Category,
}

impl TrackedField {
    /// Every tracked field, in comparison order
    pub const ALL: [TrackedField; 6] = [
        TrackedField::PriceExclTax,
        TrackedField::PriceInclTax,
        TrackedField::Availability,
        TrackedField::NumReviews,
        TrackedField::Rating,
        TrackedField::Category,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceExclTax => "price_excl_tax",
            Self::PriceInclTax => "price_incl_tax",
            Self::Availability => "availability",
            Self::NumReviews => "num_reviews",
            Self::Rating => "rating",
            Self::Category => "category",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.as_str() == s)
    }

    /// Reads this field from an item
    pub fn value_of(&self, item: &ParsedItem) -> FieldValue {
        match self {
            Self::PriceExclTax => FieldValue::Price(item.price_excl_tax),
            Self::PriceInclTax => FieldValue::Price(item.price_incl_tax),
            Self::Availability => FieldValue::Text(item.availability.clone()),
            Self::NumReviews => FieldValue::Count(item.num_reviews),
            Self::Rating => FieldValue::Rating(item.rating),
            Self::Category => FieldValue::Text(item.category.clone()),
        }
    }

    /// Decodes a stored value for this field
    pub fn decode(&self, raw: &str) -> Option<FieldValue> {
        match self {
            Self::PriceExclTax | Self::PriceInclTax => raw.parse().ok().map(FieldValue::Price),
            Self::NumReviews => raw.parse().ok().map(FieldValue::Count),
            Self::Rating => raw.parse().ok().map(FieldValue::Rating),
            Self::Availability | Self::Category => Some(FieldValue::Text(raw.to_string())),
        }
    }

    /// Human-readable description of a change to this field
    pub fn describe(&self, old: &FieldValue, new: &FieldValue) -> String {
        use FieldValue::{Count, Price, Rating};

        match (self, old, new) {
            (Self::PriceInclTax, Price(old), Price(new)) => {
                let direction = if new > old { "increased" } else { "decreased" };
                format!(
                    "Price {} by £{:.2} (from £{:.2} to £{:.2})",
                    direction,
                    (new - old).abs(),
                    old,
                    new
                )
            }
            (Self::PriceExclTax, Price(old), Price(new)) => {
                let direction = if new > old { "increased" } else { "decreased" };
                format!(
                    "Price (excl. tax) {} by £{:.2}",
                    direction,
                    (new - old).abs()
                )
            }
            (Self::NumReviews, Count(old), Count(new)) => {
                let diff = i64::from(*new) - i64::from(*old);
                if diff > 0 {
                    format!("Number of reviews increased by {} (now {})", diff, new)
                } else {
                    format!(
                        "Number of reviews decreased by {} (now {})",
                        diff.abs(),
                        new
                    )
                }
            }
            (Self::Rating, Rating(old), Rating(new)) => {
                if new > old {
                    format!("Rating improved from {} to {} stars", old, new)
                } else {
                    format!("Rating decreased from {} to {} stars", old, new)
                }
            }
            (Self::Availability, old, new) => {
                format!("Availability changed from '{}' to '{}'", old, new)
            }
            (Self::Category, old, new) => {
                format!("Category changed from '{}' to '{}'", old, new)
            }
            (field, old, new) => format!("{} changed from '{}' to '{}'", field, old, new),
        }
    }
}

impl fmt::Display for TrackedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed value of a tracked field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Price(f64),
    Count(u32),
    Rating(u8),
    Text(String),
}

impl FieldValue {
    /// Canonical text form used for storage and fingerprints
    pub fn to_db_string(&self) -> String {
        match self {
            Self::Price(v) => v.to_string(),
            Self::Count(v) => v.to_string(),
            Self::Rating(v) => v.to_string(),
            Self::Text(v) => v.clone(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Price(v) => write!(f, "{:.2}", v),
            Self::Count(v) => write!(f, "{}", v),
            Self::Rating(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// One audit entry, before it is written
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeDescriptor {
    /// Item name at the time of the change
    pub item_name: String,
    pub change_type: ChangeType,
    /// Changed field; `None` for new items
    pub field: Option<TrackedField>,
    pub old_value: Option<FieldValue>,
    pub new_value: Option<FieldValue>,
    pub description: String,
    pub changed_at: DateTime<Utc>,
}

impl ChangeDescriptor {
    /// Entry recording the first sighting of an item
    pub fn new_item(item_name: &str, changed_at: DateTime<Utc>) -> Self {
        Self {
            item_name: item_name.to_string(),
            change_type: ChangeType::NewItem,
            field: None,
            old_value: None,
            new_value: None,
            description: format!("New item added: {}", item_name),
            changed_at,
        }
    }

    /// Entry recording a field change; `None` when the values are equal
    pub fn update(
        item_name: &str,
        field: TrackedField,
        old_value: FieldValue,
        new_value: FieldValue,
        changed_at: DateTime<Utc>,
    ) -> Option<Self> {
        if old_value == new_value {
            return None;
        }

        Some(Self {
            item_name: item_name.to_string(),
            change_type: ChangeType::Update,
            field: Some(field),
            description: field.describe(&old_value, &new_value),
            old_value: Some(old_value),
            new_value: Some(new_value),
            changed_at,
        })
    }
}

/// A persisted audit entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeLogEntry {
    pub id: i64,
    pub item_id: i64,
    pub source_url: String,
    #[serde(flatten)]
    pub change: ChangeDescriptor,
}
