//! Daily change reports
//!
//! A report covers every audit entry whose timestamp falls on one UTC day.

use crate::model::{ChangeLogEntry, ChangeType};
use crate::storage::{ChangeQuery, Storage};
use crate::ShelfError;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

const CSV_HEADER: [&str; 7] = [
    "Timestamp",
    "Book Name",
    "Change Type",
    "Field Changed",
    "Old Value",
    "New Value",
    "Description",
];

fn or_not_available<T: ToString>(value: Option<&T>) -> String {
    value.map_or_else(|| "N/A".to_string(), ToString::to_string)
}

/// Audit entries of one day with their totals
#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub total_changes: usize,
    pub new_items: usize,
    pub updates: usize,
    /// Update count per tracked field
    pub by_field: BTreeMap<String, usize>,
    /// Newest first
    pub changes: Vec<ChangeLogEntry>,
}

impl DailyReport {
    fn from_entries(date: NaiveDate, changes: Vec<ChangeLogEntry>) -> Self {
        let mut by_field = BTreeMap::new();
        let mut new_items = 0;
        let mut updates = 0;

        for entry in &changes {
            match entry.change.change_type {
                ChangeType::NewItem => new_items += 1,
                ChangeType::Update => updates += 1,
            }
            if let Some(field) = entry.change.field {
                *by_field.entry(field.as_str().to_string()).or_insert(0) += 1;
            }
        }

        Self {
            date,
            total_changes: changes.len(),
            new_items,
            updates,
            by_field,
            changes,
        }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String, ShelfError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// One CSV row per audit entry, newest first
    ///
    /// Missing field or values are written as `N/A`. A day without entries
    /// yields a single `Date,Message` row instead of the entry header.
    pub fn to_csv(&self) -> Result<String, ShelfError> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        if self.changes.is_empty() {
            writer.write_record(["Date", "Message"])?;
            writer.write_record([
                self.date.format("%Y-%m-%d").to_string(),
                "No changes detected".to_string(),
            ])?;
        } else {
            writer.write_record(CSV_HEADER)?;
            for entry in &self.changes {
                let change = &entry.change;
                writer.write_record([
                    change.changed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    change.item_name.clone(),
                    change.change_type.to_string(),
                    or_not_available(change.field.as_ref()),
                    or_not_available(change.old_value.as_ref()),
                    or_not_available(change.new_value.as_ref()),
                    change.description.clone(),
                ])?;
            }
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| ShelfError::Io(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Builds the report for `date` (UTC)
///
/// # Arguments
///
/// * `storage` - Storage to read the change log from
/// * `date` - The day to report on
///
/// # Returns
///
/// * `Ok(DailyReport)` - Entries in `[date 00:00, date+1 00:00)`
/// * `Err(ShelfError)` - Query failed or the date is out of range
pub fn build_daily_report(storage: &dyn Storage, date: NaiveDate) -> Result<DailyReport, ShelfError> {
    let start = date
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| ShelfError::InvalidDate(date.to_string()))?;

    let changes = storage.query_changes(&ChangeQuery {
        since: Some(start),
        until: Some(start + Duration::days(1)),
        ..ChangeQuery::default()
    })?;

    Ok(DailyReport::from_entries(date, changes))
}
