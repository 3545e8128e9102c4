//! Seams to the outside world. The pipeline only talks to feeds, article
//! pages, the summarizer and the mirror through these traits, so tests can
//! swap in fakes.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::RawEntry;

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetches and parses the feed at `url`.
    async fn fetch_entries(&self, url: &str) -> Result<Vec<RawEntry>>;
}

#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Extracts the readable text of the page at `url`. `Ok(None)` means the
    /// page was reachable but yielded no usable text.
    async fn fetch_text(&self, url: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait Summarize: Send + Sync {
    /// One summarization attempt. Retry policy lives in the enrichment stage.
    async fn summarize(&self, title: &str, article_text: &str) -> Result<String>;
}

#[async_trait]
pub trait Mirror: Send + Sync {
    /// Mirrors `local_dir` one-way to the remote side.
    async fn sync(&self, local_dir: &Path) -> Result<()>;
}
