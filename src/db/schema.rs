use crate::models::SUMMARY_SENTINEL;

use super::identifier::quote_identifier;

/// Maps feed titles to the table holding their entries.
pub const REGISTRY_TABLE: &str = "feed_tables";

pub const SCHEMA: &str = r#"
-- feed title -> table name, fixed once assigned
CREATE TABLE IF NOT EXISTS feed_tables (
    feed_title TEXT PRIMARY KEY,
    table_name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Name of the `published_at` index that comes with a feed table. It lives in
/// the same namespace as table names, so table naming has to avoid it too.
pub fn published_index_name(table: &str) -> String {
    format!("{table}__published_at_idx")
}

/// DDL for one feed table. `table` must already be sanitized.
pub fn feed_table_schema(table: &str) -> String {
    let quoted = quote_identifier(table);
    let index = quote_identifier(&published_index_name(table));
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {quoted} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_unique_id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    summary TEXT NOT NULL DEFAULT '{SUMMARY_SENTINEL}',
    article_text TEXT NOT NULL DEFAULT '',
    published_at TEXT NOT NULL,
    written INTEGER NOT NULL DEFAULT 0,
    -- teaser shipped with the feed item; summarized when the page yields no text
    feed_summary TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS {index} ON {quoted}(published_at DESC);
"#
    )
}
