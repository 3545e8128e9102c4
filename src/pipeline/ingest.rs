use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::db::{ConnectionPool, InsertOutcome, Repository};
use crate::error::{AppError, Result};
use crate::models::{FeedSpec, RawEntry};
use crate::traits::FeedSource;

/// Feeds fetched at once. Inserts stay sequential.
const FETCH_CONCURRENCY: usize = 5;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub feeds: usize,
    pub fetch_failures: usize,
    pub skipped_feeds: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub invalid: usize,
}

/// Fetches every feed and stores the entries not seen before. A feed that
/// cannot be fetched contributes nothing; store errors are reported after
/// every other feed has been processed.
pub async fn ingest(
    pool: &ConnectionPool,
    source: &dyn FeedSource,
    feeds: &[FeedSpec],
    acquire_timeout: Duration,
) -> Result<IngestReport> {
    let fetched: Vec<(&FeedSpec, Option<Vec<RawEntry>>)> = stream::iter(feeds)
        .map(|feed| async move {
            match source.fetch_entries(&feed.url).await {
                Ok(entries) => {
                    tracing::debug!("Fetched {} entries from {}", entries.len(), feed.title);
                    (feed, Some(entries))
                }
                Err(e) => {
                    tracing::warn!("Failed to fetch {} ({}): {}", feed.title, feed.url, e);
                    (feed, None)
                }
            }
        })
        .buffered(FETCH_CONCURRENCY)
        .collect()
        .await;

    let repo = Repository::acquire_timeout(pool, acquire_timeout).await?;
    let mut report = IngestReport::default();
    let mut first_error: Option<AppError> = None;

    for (feed, entries) in fetched {
        report.feeds += 1;
        let Some(entries) = entries else {
            report.fetch_failures += 1;
            continue;
        };

        match store_feed(&repo, feed, &entries, &mut report).await {
            Ok(()) => {}
            Err(e @ AppError::InvalidIdentifier(_)) => {
                tracing::warn!("Skipping feed {:?}: {}", feed.title, e);
                report.skipped_feeds += 1;
            }
            Err(e) => {
                tracing::error!("Failed to store entries for {}: {}", feed.title, e);
                first_error.get_or_insert(e);
            }
        }
    }

    tracing::info!(
        feeds = report.feeds,
        inserted = report.inserted,
        duplicates = report.duplicates,
        invalid = report.invalid,
        fetch_failures = report.fetch_failures,
        "ingest finished"
    );

    match first_error {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

async fn store_feed(
    repo: &Repository,
    feed: &FeedSpec,
    entries: &[RawEntry],
    report: &mut IngestReport,
) -> Result<()> {
    let table = repo.ensure_table(&feed.title).await?;
    for entry in entries {
        match repo.insert_entry(&table, entry).await? {
            InsertOutcome::Inserted => report.inserted += 1,
            InsertOutcome::Duplicate => report.duplicates += 1,
            InsertOutcome::Invalid(_) => report.invalid += 1,
        }
    }
    Ok(())
}
