//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the catalog mirror.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Mirrored catalog items, one row per source URL
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_url TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    description TEXT,
    category TEXT NOT NULL,
    price_excl_tax REAL NOT NULL CHECK (price_excl_tax >= 0),
    price_incl_tax REAL NOT NULL CHECK (price_incl_tax >= 0),
    availability TEXT NOT NULL,
    num_reviews INTEGER NOT NULL DEFAULT 0 CHECK (num_reviews >= 0),
    rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
    image_url TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    crawled_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    crawl_status TEXT NOT NULL DEFAULT 'success'
);

CREATE INDEX IF NOT EXISTS idx_items_name ON items(name);
CREATE INDEX IF NOT EXISTS idx_items_category ON items(category);
CREATE INDEX IF NOT EXISTS idx_items_rating ON items(rating);
CREATE INDEX IF NOT EXISTS idx_items_price ON items(price_incl_tax);

-- Append-only audit trail
CREATE TABLE IF NOT EXISTS change_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL REFERENCES items(id),
    item_name TEXT NOT NULL,
    source_url TEXT NOT NULL,
    change_type TEXT NOT NULL CHECK (change_type IN ('new_item', 'update')),
    field_changed TEXT,
    old_value TEXT,
    new_value TEXT,
    description TEXT NOT NULL,
    changed_at TEXT NOT NULL,
    CHECK (
        (change_type = 'new_item'
            AND field_changed IS NULL
            AND old_value IS NULL
            AND new_value IS NULL)
        OR (change_type = 'update'
            AND field_changed IS NOT NULL
            AND field_changed <> ''
            AND old_value IS NOT NULL
            AND new_value IS NOT NULL
            AND old_value <> new_value)
    )
);

CREATE INDEX IF NOT EXISTS idx_change_log_item ON change_log(item_id);
CREATE INDEX IF NOT EXISTS idx_change_log_changed_at ON change_log(changed_at DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_change_log_type ON change_log(change_type);
CREATE INDEX IF NOT EXISTS idx_change_log_field ON change_log(field_changed);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
