use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{AppError, Result};

/// Placeholder stored in `summary` until enrichment produces a real one.
pub const SUMMARY_SENTINEL: &str = "NO SUMMARY";

/// Storage format for `published_at`. Fixed width UTC, so ordering the text
/// column orders by time.
pub const PUBLISHED_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A feed as listed in the feed-list document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSpec {
    pub title: String,
    pub url: String,
}

/// An entry as delivered by a feed source. Every field is optional because
/// real feeds omit things.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub link: Option<String>,
}

/// An entry that passed validation and is ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub feed_unique_id: String,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub feed_summary: String,
}

/// One stored row of a feed table.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: i64,
    pub feed_unique_id: String,
    pub title: String,
    pub url: String,
    pub summary: String,
    pub article_text: String,
    pub published_at: DateTime<Utc>,
    pub written: bool,
    /// The feed's own teaser for the item, kept as a summarization fallback.
    pub feed_summary: String,
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl RawEntry {
    /// Checks the fields every stored row needs: id, title, summary,
    /// published date and link.
    pub fn validate(&self) -> Result<NewEntry> {
        if !present(&self.id) {
            return Err(AppError::InvalidEntry("id"));
        }
        if !present(&self.title) {
            return Err(AppError::InvalidEntry("title"));
        }
        if !present(&self.summary) {
            return Err(AppError::InvalidEntry("summary"));
        }
        let Some(published_at) = self.published else {
            return Err(AppError::InvalidEntry("published"));
        };
        if !present(&self.link) {
            return Err(AppError::InvalidEntry("link"));
        }

        Ok(NewEntry {
            feed_unique_id: self.id.clone().unwrap_or_default(),
            title: self.title.clone().unwrap_or_default(),
            url: self.link.clone().unwrap_or_default(),
            published_at,
            feed_summary: self.summary.as_deref().unwrap_or_default().trim().to_string(),
        })
    }
}

impl Entry {
    pub fn has_summary(&self) -> bool {
        self.summary != SUMMARY_SENTINEL
    }

    pub fn has_article_text(&self) -> bool {
        !self.article_text.is_empty()
    }
}

pub fn format_published(dt: &DateTime<Utc>) -> String {
    dt.format(PUBLISHED_FORMAT).to_string()
}

pub fn parse_published(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, PUBLISHED_FORMAT) {
        return Some(naive.and_utc());
    }
    // Rows written by hand or by older tooling
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    DateTime::parse_from_rfc2822(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
