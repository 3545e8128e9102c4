use std::fmt;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use crate::config::PublishPolicy;
use crate::error::{AppError, Result};
use crate::models::{format_published, parse_published, Entry, RawEntry, SUMMARY_SENTINEL};

use super::identifier::{quote_identifier, sanitize_identifier};
use super::pool::{ConnectionPool, PooledConnection};
use super::schema::{feed_table_schema, published_index_name, SCHEMA};

const ENTRY_COLUMNS: &str =
    "id, feed_unique_id, title, url, summary, article_text, published_at, written, feed_summary";

/// A feed table known to exist. Only the repository hands these out, so
/// holding one means the table was created before anything is inserted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedTable {
    name: String,
}

impl FeedTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn quoted(&self) -> String {
        quote_identifier(&self.name)
    }
}

impl fmt::Display for FeedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The table already holds this `feed_unique_id`.
    Duplicate,
    /// Dropped for the named missing field.
    Invalid(&'static str),
}

/// Store operations over one pooled handle. The handle goes back to the pool
/// when the repository is dropped.
pub struct Repository {
    conn: PooledConnection,
}

impl Repository {
    pub async fn acquire(pool: &ConnectionPool) -> Result<Self> {
        Ok(Self::from_connection(pool.acquire().await?))
    }

    pub async fn acquire_timeout(pool: &ConnectionPool, timeout: Duration) -> Result<Self> {
        Ok(Self::from_connection(pool.acquire_timeout(timeout).await?))
    }

    pub fn from_connection(conn: PooledConnection) -> Self {
        Self { conn }
    }

    pub async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Table operations

    /// Creates the table for `feed_title` if needed and returns it. A title
    /// keeps the table it was first given; a new title whose sanitized name
    /// is already taken gets a numeric suffix.
    pub async fn ensure_table(&self, feed_title: &str) -> Result<FeedTable> {
        let base = sanitize_identifier(feed_title)?;
        let title = feed_title.to_string();

        let name = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let existing: Option<String> = tx
                    .query_row(
                        "SELECT table_name FROM feed_tables WHERE feed_title = ?1",
                        params![title],
                        |row| row.get(0),
                    )
                    .optional()?;

                let name = match existing {
                    Some(name) => name,
                    None => {
                        let mut candidate = base.clone();
                        let mut suffix = 1;
                        loop {
                            let taken: i64 = tx.query_row(
                                r#"SELECT (SELECT COUNT(*) FROM feed_tables WHERE table_name = ?1 COLLATE NOCASE)
                                        + (SELECT COUNT(*) FROM sqlite_master
                                           WHERE name = ?1 COLLATE NOCASE OR name = ?2 COLLATE NOCASE)"#,
                                params![candidate, published_index_name(&candidate)],
                                |row| row.get(0),
                            )?;
                            if taken == 0 {
                                break;
                            }
                            suffix += 1;
                            candidate = format!("{base}_{suffix}");
                        }
                        tx.execute(
                            "INSERT INTO feed_tables (feed_title, table_name) VALUES (?1, ?2)",
                            params![title, candidate],
                        )?;
                        candidate
                    }
                };

                tx.execute_batch(&feed_table_schema(&name))?;
                tx.commit()?;
                Ok(name)
            })
            .await?;

        Ok(FeedTable { name })
    }

    /// Feed tables that are registered and present in the database.
    pub async fn list_tables(&self) -> Result<Vec<FeedTable>> {
        let names = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT f.table_name
                       FROM feed_tables f
                       JOIN sqlite_master m ON m.type = 'table' AND m.name = f.table_name
                       ORDER BY f.table_name"#,
                )?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(names)
            })
            .await?;
        Ok(names.into_iter().map(|name| FeedTable { name }).collect())
    }

    /// Drops a registered feed table. Returns false if no feed table has that
    /// name; unregistered tables are never touched.
    pub async fn drop_table(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        let dropped = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let registered: Option<String> = tx
                    .query_row(
                        "SELECT table_name FROM feed_tables WHERE table_name = ?1",
                        params![name],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(table) = registered else {
                    return Ok(false);
                };
                tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_identifier(&table)))?;
                tx.execute("DELETE FROM feed_tables WHERE table_name = ?1", params![table])?;
                tx.commit()?;
                Ok(true)
            })
            .await?;
        Ok(dropped)
    }

    /// Marks every row of every feed table unwritten. Returns the number of
    /// rows touched.
    pub async fn reset_written_flags(&self) -> Result<usize> {
        let tables = self.list_tables().await?;
        let changed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut changed = 0;
                for table in &tables {
                    changed += tx.execute(
                        &format!("UPDATE {} SET written = 0 WHERE written != 0", table.quoted()),
                        [],
                    )?;
                }
                tx.commit()?;
                Ok(changed)
            })
            .await?;
        Ok(changed)
    }

    // Entry operations

    /// Inserts a feed entry unless it is invalid or already stored.
    pub async fn insert_entry(&self, table: &FeedTable, entry: &RawEntry) -> Result<InsertOutcome> {
        let new_entry = match entry.validate() {
            Ok(valid) => valid,
            Err(AppError::InvalidEntry(field)) => {
                tracing::debug!(table = %table, missing = field, "skipping invalid entry");
                return Ok(InsertOutcome::Invalid(field));
            }
            Err(e) => return Err(e),
        };

        let sql = format!(
            r#"INSERT OR IGNORE INTO {} (feed_unique_id, title, url, summary, article_text, published_at, written, feed_summary)
               VALUES (?1, ?2, ?3, ?4, '', ?5, 0, ?6)"#,
            table.quoted()
        );
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    &sql,
                    params![
                        new_entry.feed_unique_id,
                        new_entry.title,
                        new_entry.url,
                        SUMMARY_SENTINEL,
                        format_published(&new_entry.published_at),
                        new_entry.feed_summary,
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;

        Ok(if inserted {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Duplicate
        })
    }

    /// Rows whose article text has not been fetched yet.
    pub async fn pending_article_text(&self, table: &FeedTable) -> Result<Vec<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM {} WHERE article_text = '' ORDER BY published_at DESC, id DESC",
            table.quoted()
        );
        self.query_entries(sql, Vec::new()).await
    }

    /// Rows still carrying the sentinel summary, newest first.
    pub async fn pending_summaries(&self, table: &FeedTable) -> Result<Vec<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM {} WHERE summary = ?1 ORDER BY published_at DESC, id DESC",
            table.quoted()
        );
        self.query_entries(sql, vec![SUMMARY_SENTINEL.to_string()])
            .await
    }

    /// Unwritten rows eligible for publication under `policy`, newest first.
    pub async fn unwritten_entries(
        &self,
        table: &FeedTable,
        policy: PublishPolicy,
    ) -> Result<Vec<Entry>> {
        let filter = match policy {
            PublishPolicy::PreferSummary => "summary != ?1",
            PublishPolicy::PreferFullText => "(summary != ?1 OR article_text != '')",
        };
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM {} WHERE written = 0 AND {filter} ORDER BY published_at DESC, id DESC",
            table.quoted()
        );
        self.query_entries(sql, vec![SUMMARY_SENTINEL.to_string()])
            .await
    }

    /// Every row of the table, newest first.
    pub async fn entries(&self, table: &FeedTable) -> Result<Vec<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM {} ORDER BY published_at DESC, id DESC",
            table.quoted()
        );
        self.query_entries(sql, Vec::new()).await
    }

    pub async fn row_count(&self, table: &FeedTable) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.quoted());
        let count = self
            .conn
            .call(move |conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))
            .await?;
        Ok(count)
    }

    /// Stores fetched article text. Rows that already have text are left
    /// alone; returns whether the row changed.
    pub async fn set_article_text(&self, table: &FeedTable, id: i64, text: String) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET article_text = ?1 WHERE id = ?2 AND article_text = ''",
            table.quoted()
        );
        self.update_row(sql, text, id).await
    }

    /// Replaces the sentinel summary. A row that already has a real summary
    /// is left alone; returns whether the row changed.
    pub async fn set_summary(&self, table: &FeedTable, id: i64, summary: String) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET summary = ?1 WHERE id = ?2 AND summary = '{SUMMARY_SENTINEL}'",
            table.quoted()
        );
        self.update_row(sql, summary, id).await
    }

    pub async fn mark_written(&self, table: &FeedTable, id: i64) -> Result<()> {
        let sql = format!("UPDATE {} SET written = 1 WHERE id = ?1", table.quoted());
        self.conn
            .call(move |conn| {
                conn.execute(&sql, params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn update_row(&self, sql: String, value: String, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .call(move |conn| Ok(conn.execute(&sql, params![value, id])?))
            .await?;
        Ok(changed > 0)
    }

    async fn query_entries(&self, sql: String, args: Vec<String>) -> Result<Vec<Entry>> {
        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let entries = stmt
                    .query_map(rusqlite::params_from_iter(args.iter()), entry_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }
}

fn entry_from_row(row: &Row) -> rusqlite::Result<Entry> {
    let published: String = row.get(6)?;
    let published_at = parse_published(&published).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            format!("unparseable published_at {published:?}").into(),
        )
    })?;
    Ok(Entry {
        id: row.get(0)?,
        feed_unique_id: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        summary: row.get(4)?,
        article_text: row.get(5)?,
        published_at,
        written: row.get::<_, i64>(7)? != 0,
        feed_summary: row.get(8)?,
    })
}
