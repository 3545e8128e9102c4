//! Fakes and fixtures shared by the stage tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::db::{ConnectionPool, FeedTable, Repository};
use crate::error::{AppError, Result};
use crate::models::RawEntry;
use crate::traits::{ArticleSource, FeedSource, Summarize};

pub async fn test_pool(max_connections: usize) -> (tempfile::TempDir, ConnectionPool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = ConnectionPool::new(dir.path().join("feeds.db"), max_connections);
    Repository::acquire(&pool)
        .await
        .unwrap()
        .init_schema()
        .await
        .unwrap();
    (dir, pool)
}

/// A valid entry published on day `day` of May 2024.
pub fn entry(id: &str, day: u32) -> RawEntry {
    RawEntry {
        id: Some(id.to_string()),
        title: Some(format!("Entry {id}")),
        summary: Some("feed teaser".to_string()),
        published: Some(Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()),
        link: Some(format!("https://example.com/{id}")),
    }
}

pub async fn insert(pool: &ConnectionPool, feed_title: &str, rows: &[(&str, u32)]) -> FeedTable {
    let repo = Repository::acquire(pool).await.unwrap();
    let table = repo.ensure_table(feed_title).await.unwrap();
    for (id, day) in rows {
        repo.insert_entry(&table, &entry(id, *day)).await.unwrap();
    }
    table
}

/// Gives every row of `table` article text and a summary.
pub async fn summarize_all(pool: &ConnectionPool, table: &FeedTable) {
    let repo = Repository::acquire(pool).await.unwrap();
    for row in repo.entries(table).await.unwrap() {
        repo.set_article_text(table, row.id, format!("Text of {}", row.title))
            .await
            .unwrap();
        repo.set_summary(table, row.id, format!("Summary of {}", row.title))
            .await
            .unwrap();
    }
}

#[derive(Default)]
pub struct StaticFeeds {
    feeds: HashMap<String, Vec<RawEntry>>,
}

impl StaticFeeds {
    pub fn with(mut self, url: &str, entries: Vec<RawEntry>) -> Self {
        self.feeds.insert(url.to_string(), entries);
        self
    }
}

#[async_trait]
impl FeedSource for StaticFeeds {
    async fn fetch_entries(&self, url: &str) -> Result<Vec<RawEntry>> {
        self.feeds
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no feed at {url}").into())
    }
}

pub struct FixedArticles {
    text: Option<String>,
    pub calls: AtomicUsize,
}

impl FixedArticles {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Pages that load but yield no usable text.
    pub fn empty() -> Self {
        Self {
            text: Some(String::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            text: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ArticleSource for FixedArticles {
    async fn fetch_text(&self, url: &str) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.text {
            Some(text) if text.is_empty() => Ok(None),
            Some(text) => Ok(Some(text.clone())),
            None => Err(anyhow::anyhow!("connection refused: {url}").into()),
        }
    }
}

/// Answers from a script; once the script runs out the last answer repeats.
pub struct ScriptedSummarizer {
    script: Vec<std::result::Result<&'static str, &'static str>>,
    pub calls: AtomicUsize,
    pub titles: Mutex<Vec<String>>,
    pub texts: Mutex<Vec<String>>,
}

impl ScriptedSummarizer {
    pub fn new(script: Vec<std::result::Result<&'static str, &'static str>>) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            titles: Mutex::new(Vec::new()),
            texts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Summarize for ScriptedSummarizer {
    async fn summarize(&self, title: &str, article_text: &str) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().unwrap().push(article_text.to_string());
        {
            let mut titles = self.titles.lock().unwrap();
            if titles.last().map(String::as_str) != Some(title) {
                titles.push(title.to_string());
            }
        }
        let step = self.script[call.min(self.script.len() - 1)];
        step.map(str::to_string)
            .map_err(|e| AppError::SummaryApi(e.to_string()))
    }
}
