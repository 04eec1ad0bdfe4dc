//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::model::{
    ChangeDescriptor, ChangeLogEntry, ChangeType, CrawlStatus, ItemRecord, ParsedItem,
    TrackedField,
};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ChangeQuery, Storage, StorageError, StorageResult};
use crate::ShelfError;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;

const ITEM_COLUMNS: &str = "id, source_url, name, description, category, price_excl_tax,
     price_incl_tax, availability, num_reviews, rating, image_url, content_hash,
     crawled_at, updated_at, crawl_status";

const CHANGE_COLUMNS: &str = "id, item_id, source_url, item_name, change_type, field_changed,
     old_value, new_value, description, changed_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(ShelfError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, ShelfError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        // Other processes may hold the write lock briefly
        conn.busy_timeout(Duration::from_secs(5))?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, ShelfError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

/// Formats a timestamp so that text order matches time order
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(StorageError::CorruptRow {
            table: "change_log",
            message,
        }),
    )
}

fn item_from_row(row: &Row) -> rusqlite::Result<ItemRecord> {
    let status: String = row.get(14)?;
    Ok(ItemRecord {
        id: row.get(0)?,
        item: ParsedItem {
            source_url: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            category: row.get(4)?,
            price_excl_tax: row.get(5)?,
            price_incl_tax: row.get(6)?,
            availability: row.get(7)?,
            num_reviews: row.get(8)?,
            rating: row.get(9)?,
            image_url: row.get(10)?,
        },
        content_hash: row.get(11)?,
        crawled_at: parse_timestamp(12, &row.get::<_, String>(12)?)?,
        updated_at: parse_timestamp(13, &row.get::<_, String>(13)?)?,
        crawl_status: CrawlStatus::from_db_string(&status).unwrap_or(CrawlStatus::Success),
    })
}

fn change_from_row(row: &Row) -> rusqlite::Result<ChangeLogEntry> {
    let change_type_raw: String = row.get(4)?;
    let change_type = ChangeType::from_db_string(&change_type_raw)
        .ok_or_else(|| conversion_error(4, format!("unknown change type '{}'", change_type_raw)))?;

    let field = match row.get::<_, Option<String>>(5)? {
        Some(raw) => Some(
            TrackedField::from_db_string(&raw)
                .ok_or_else(|| conversion_error(5, format!("unknown field '{}'", raw)))?,
        ),
        None => None,
    };

    let decode = |idx: usize, raw: Option<String>| -> rusqlite::Result<_> {
        match (field, raw) {
            (Some(field), Some(raw)) => field
                .decode(&raw)
                .map(Some)
                .ok_or_else(|| conversion_error(idx, format!("bad {} value '{}'", field, raw))),
            _ => Ok(None),
        }
    };

    let old_value = decode(6, row.get(6)?)?;
    let new_value = decode(7, row.get(7)?)?;

    Ok(ChangeLogEntry {
        id: row.get(0)?,
        item_id: row.get(1)?,
        source_url: row.get(2)?,
        change: ChangeDescriptor {
            item_name: row.get(3)?,
            change_type,
            field,
            old_value,
            new_value,
            description: row.get(8)?,
            changed_at: parse_timestamp(9, &row.get::<_, String>(9)?)?,
        },
    })
}

/// Maps a unique-constraint failure on `items.source_url` to `DuplicateUrl`
fn map_insert_error(err: rusqlite::Error, url: &str) -> StorageError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        let on_source_url = message
            .as_deref()
            .map_or(true, |m| m.contains("source_url"));
        if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE && on_source_url {
            return StorageError::DuplicateUrl(url.to_string());
        }
    }
    StorageError::Sqlite(err)
}

fn insert_change(
    conn: &Connection,
    item_id: i64,
    source_url: &str,
    change: &ChangeDescriptor,
) -> StorageResult<()> {
    conn.execute(
        "INSERT INTO change_log (item_id, item_name, source_url, change_type, field_changed,
         old_value, new_value, description, changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            item_id,
            change.item_name,
            source_url,
            change.change_type.to_db_string(),
            change.field.map(|f| f.as_str()),
            change.old_value.as_ref().map(|v| v.to_db_string()),
            change.new_value.as_ref().map(|v| v.to_db_string()),
            change.description,
            format_timestamp(change.changed_at),
        ],
    )?;
    Ok(())
}

/// Builds the WHERE clause and its positional values for an audit query
fn change_filter(query: &ChangeQuery) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(item_id) = query.item_id {
        clauses.push("item_id = ?");
        values.push(Value::Integer(item_id));
    }
    if let Some(change_type) = query.change_type {
        clauses.push("change_type = ?");
        values.push(Value::Text(change_type.to_db_string().to_string()));
    }
    if let Some(field) = query.field {
        clauses.push("field_changed = ?");
        values.push(Value::Text(field.as_str().to_string()));
    }
    if let Some(since) = query.since {
        clauses.push("changed_at >= ?");
        values.push(Value::Text(format_timestamp(since)));
    }
    if let Some(until) = query.until {
        clauses.push("changed_at < ?");
        values.push(Value::Text(format_timestamp(until)));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    (where_sql, values)
}

impl Storage for SqliteStorage {
    // ===== Item Reads =====

    fn find_item_by_url(&self, url: &str) -> StorageResult<Option<ItemRecord>> {
        let item = self
            .conn
            .query_row(
                &format!("SELECT {} FROM items WHERE source_url = ?1", ITEM_COLUMNS),
                params![url],
                item_from_row,
            )
            .optional()?;

        Ok(item)
    }

    fn get_item(&self, item_id: i64) -> StorageResult<ItemRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS),
                params![item_id],
                item_from_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::ItemNotFound(format!("Item ID {}", item_id)))
    }

    fn count_items(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Transactional Writes =====

    fn insert_new_item(
        &mut self,
        item: &ParsedItem,
        content_hash: &str,
        change: &ChangeDescriptor,
        at: DateTime<Utc>,
    ) -> StorageResult<ItemRecord> {
        let stamp = format_timestamp(at);
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO items (source_url, name, description, category, price_excl_tax,
             price_incl_tax, availability, num_reviews, rating, image_url, content_hash,
             crawled_at, updated_at, crawl_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12, ?13)",
            params![
                item.source_url,
                item.name,
                item.description,
                item.category,
                item.price_excl_tax,
                item.price_incl_tax,
                item.availability,
                item.num_reviews,
                item.rating,
                item.image_url,
                content_hash,
                stamp,
                CrawlStatus::Success.to_db_string(),
            ],
        )
        .map_err(|e| map_insert_error(e, &item.source_url))?;

        let item_id = tx.last_insert_rowid();
        insert_change(&tx, item_id, &item.source_url, change)?;
        tx.commit()?;

        self.get_item(item_id)
    }

    fn apply_item_changes(
        &mut self,
        item_id: i64,
        item: &ParsedItem,
        content_hash: &str,
        changes: &[ChangeDescriptor],
        at: DateTime<Utc>,
    ) -> StorageResult<ItemRecord> {
        let tx = self.conn.transaction()?;

        let updated = tx.execute(
            "UPDATE items SET name = ?1, description = ?2, category = ?3, price_excl_tax = ?4,
             price_incl_tax = ?5, availability = ?6, num_reviews = ?7, rating = ?8,
             image_url = ?9, content_hash = ?10, updated_at = ?11, crawl_status = ?12
             WHERE id = ?13",
            params![
                item.name,
                item.description,
                item.category,
                item.price_excl_tax,
                item.price_incl_tax,
                item.availability,
                item.num_reviews,
                item.rating,
                item.image_url,
                content_hash,
                format_timestamp(at),
                CrawlStatus::Success.to_db_string(),
                item_id,
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::ItemNotFound(format!("Item ID {}", item_id)));
        }

        for change in changes {
            insert_change(&tx, item_id, &item.source_url, change)?;
        }
        tx.commit()?;

        self.get_item(item_id)
    }

    fn touch_item(
        &mut self,
        item_id: i64,
        item: &ParsedItem,
        content_hash: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<ItemRecord> {
        let updated = self.conn.execute(
            "UPDATE items SET name = ?1, description = ?2, image_url = ?3, content_hash = ?4,
             updated_at = ?5, crawl_status = ?6
             WHERE id = ?7",
            params![
                item.name,
                item.description,
                item.image_url,
                content_hash,
                format_timestamp(at),
                CrawlStatus::Success.to_db_string(),
                item_id,
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::ItemNotFound(format!("Item ID {}", item_id)));
        }

        self.get_item(item_id)
    }

    // ===== Audit Reads =====

    fn query_changes(&self, query: &ChangeQuery) -> StorageResult<Vec<ChangeLogEntry>> {
        let (where_sql, mut values) = change_filter(query);
        values.push(Value::Integer(query.limit.map_or(-1, i64::from)));
        values.push(Value::Integer(query.offset.map_or(0, i64::from)));

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM change_log {} ORDER BY changed_at DESC, id DESC LIMIT ? OFFSET ?",
            CHANGE_COLUMNS, where_sql
        ))?;

        let changes = stmt
            .query_map(params_from_iter(values), change_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(changes)
    }

    fn count_changes(&self, query: &ChangeQuery) -> StorageResult<u64> {
        let (where_sql, values) = change_filter(query);
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM change_log {}", where_sql),
            params_from_iter(values),
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
