//! Fills in article text and summaries.
//!
//! Both passes dispatch one task per pending row onto a bounded set of
//! workers. Each task checks a handle out of the pool, makes its external
//! call, writes its single row and lets the handle go, whatever the outcome.
//! A pass returns only after every task has finished.

use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::config::Config;
use crate::db::{ConnectionPool, FeedTable, Repository};
use crate::error::Result;
use crate::models::Entry;
use crate::traits::{ArticleSource, Summarize};

#[derive(Debug, Clone)]
pub struct EnrichSettings {
    pub workers: usize,
    pub summary_attempts: u32,
    pub min_summary_words: usize,
    pub acquire_timeout: Duration,
}

impl From<&Config> for EnrichSettings {
    fn from(config: &Config) -> Self {
        Self {
            workers: config.enrich.workers,
            summary_attempts: config.enrich.summary_attempts,
            min_summary_words: config.enrich.min_summary_words,
            acquire_timeout: Duration::from_secs(config.pool.acquire_timeout_secs),
        }
    }
}

impl EnrichSettings {
    /// Tasks in flight at once. Each holds a pooled handle across its external
    /// call, so running more tasks than the pool has handles only makes the
    /// extra ones time out.
    fn concurrency(&self, pool: &ConnectionPool) -> usize {
        self.workers.clamp(1, pool.max_connections().max(1))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnrichReport {
    pub text_fetched: usize,
    pub text_failed: usize,
    pub summarized: usize,
    pub summary_failed: usize,
    /// Summaries written from the feed teaser because the page gave no text.
    pub summarized_from_teaser: usize,
}

enum SummaryOutcome {
    Summarized { from_teaser: bool },
    Exhausted,
}

/// Runs the article-text pass, then the summary pass. Without a summarizer
/// the second pass is skipped.
pub async fn enrich(
    pool: &ConnectionPool,
    articles: &dyn ArticleSource,
    summarizer: Option<&dyn Summarize>,
    settings: &EnrichSettings,
) -> Result<EnrichReport> {
    let mut report = EnrichReport::default();

    let text_result = fill_article_text(pool, articles, settings, &mut report).await;

    let summary_result = match summarizer {
        Some(summarizer) => fill_summaries(pool, summarizer, settings, &mut report).await,
        None => {
            tracing::warn!("No summarizer configured; skipping summary pass");
            Ok(())
        }
    };

    tracing::info!(
        text_fetched = report.text_fetched,
        text_failed = report.text_failed,
        summarized = report.summarized,
        summary_failed = report.summary_failed,
        summarized_from_teaser = report.summarized_from_teaser,
        "enrichment finished"
    );

    text_result.and(summary_result).map(|_| report)
}

/// Fetches full text for every row that has none.
pub async fn fill_article_text(
    pool: &ConnectionPool,
    source: &dyn ArticleSource,
    settings: &EnrichSettings,
    report: &mut EnrichReport,
) -> Result<()> {
    let candidates = collect_candidates(pool, settings.acquire_timeout, Pending::ArticleText).await?;
    tracing::debug!("{} rows need article text", candidates.len());

    let outcomes: Vec<Result<bool>> = stream::iter(candidates)
        .map(|(table, entry)| fill_one_text(pool, source, settings.acquire_timeout, table, entry))
        .buffer_unordered(settings.concurrency(pool))
        .collect()
        .await;

    let mut first_error = None;
    for outcome in outcomes {
        match outcome {
            Ok(true) => report.text_fetched += 1,
            Ok(false) => report.text_failed += 1,
            Err(e) => {
                report.text_failed += 1;
                first_error.get_or_insert(e);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Summarizes every row still carrying the sentinel, newest first.
pub async fn fill_summaries(
    pool: &ConnectionPool,
    summarizer: &dyn Summarize,
    settings: &EnrichSettings,
    report: &mut EnrichReport,
) -> Result<()> {
    let mut candidates = collect_candidates(pool, settings.acquire_timeout, Pending::Summary).await?;
    // Newest first across all tables, so recent content goes out under a budget
    candidates.sort_by(|(_, a), (_, b)| b.published_at.cmp(&a.published_at));
    tracing::debug!("{} rows need a summary", candidates.len());

    let outcomes: Vec<Result<SummaryOutcome>> = stream::iter(candidates)
        .map(|(table, entry)| fill_one_summary(pool, summarizer, settings, table, entry))
        .buffer_unordered(settings.concurrency(pool))
        .collect()
        .await;

    let mut first_error = None;
    for outcome in outcomes {
        match outcome {
            Ok(SummaryOutcome::Summarized { from_teaser }) => {
                report.summarized += 1;
                if from_teaser {
                    report.summarized_from_teaser += 1;
                }
            }
            Ok(SummaryOutcome::Exhausted) => report.summary_failed += 1,
            Err(e) => {
                report.summary_failed += 1;
                first_error.get_or_insert(e);
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Calls the summarizer up to `max_attempts` times and keeps the first
/// response with more than `min_words` words.
pub async fn summarize_with_retry(
    summarizer: &dyn Summarize,
    title: &str,
    article_text: &str,
    max_attempts: u32,
    min_words: usize,
) -> Option<String> {
    for attempt in 1..=max_attempts {
        match summarizer.summarize(title, article_text).await {
            Ok(summary) => {
                let words = summary.split_whitespace().count();
                if words > min_words {
                    return Some(summary.trim().to_string());
                }
                tracing::debug!(attempt, words, "summary too short for {:?}", title);
            }
            Err(e) => {
                tracing::warn!(attempt, "Summarization of {:?} failed: {}", title, e);
            }
        }
    }
    None
}

#[derive(Clone, Copy)]
enum Pending {
    ArticleText,
    Summary,
}

async fn collect_candidates(
    pool: &ConnectionPool,
    timeout: Duration,
    pending: Pending,
) -> Result<Vec<(FeedTable, Entry)>> {
    let repo = Repository::acquire_timeout(pool, timeout).await?;
    let mut candidates = Vec::new();
    for table in repo.list_tables().await? {
        let rows = match pending {
            Pending::ArticleText => repo.pending_article_text(&table).await,
            Pending::Summary => repo.pending_summaries(&table).await,
        };
        candidates.extend(rows?.into_iter().map(|row| (table.clone(), row)));
    }
    Ok(candidates)
}

async fn fill_one_text(
    pool: &ConnectionPool,
    source: &dyn ArticleSource,
    timeout: Duration,
    table: FeedTable,
    entry: Entry,
) -> Result<bool> {
    let repo = Repository::acquire_timeout(pool, timeout).await?;

    match source.fetch_text(&entry.url).await {
        Ok(Some(text)) if !text.trim().is_empty() => {
            repo.set_article_text(&table, entry.id, text).await?;
            tracing::debug!("Fetched article text for {:?}", entry.title);
            Ok(true)
        }
        Ok(_) => {
            tracing::debug!("No article text at {}", entry.url);
            Ok(false)
        }
        Err(e) => {
            tracing::warn!("Failed to fetch article {}: {}", entry.url, e);
            Ok(false)
        }
    }
}

/// Text to summarize: the fetched article, or the feed teaser when the page
/// gave nothing, or the bare title as a last resort.
fn summary_source(entry: &Entry) -> (&str, bool) {
    if entry.has_article_text() {
        (&entry.article_text, false)
    } else if !entry.feed_summary.trim().is_empty() {
        (&entry.feed_summary, true)
    } else {
        (&entry.title, true)
    }
}

async fn fill_one_summary(
    pool: &ConnectionPool,
    summarizer: &dyn Summarize,
    settings: &EnrichSettings,
    table: FeedTable,
    entry: Entry,
) -> Result<SummaryOutcome> {
    let (source, from_teaser) = summary_source(&entry);

    let repo = Repository::acquire_timeout(pool, settings.acquire_timeout).await?;

    let summary = summarize_with_retry(
        summarizer,
        &entry.title,
        source,
        settings.summary_attempts,
        settings.min_summary_words,
    )
    .await;

    match summary {
        Some(summary) => {
            repo.set_summary(&table, entry.id, summary).await?;
            tracing::debug!(from_teaser, "Summarized {:?}", entry.title);
            Ok(SummaryOutcome::Summarized { from_teaser })
        }
        None => {
            tracing::warn!(
                "Giving up on summary for {:?} after {} attempts",
                entry.title,
                settings.summary_attempts
            );
            Ok(SummaryOutcome::Exhausted)
        }
    }
}
