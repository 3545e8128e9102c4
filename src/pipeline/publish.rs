use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::config::PublishPolicy;
use crate::db::{ConnectionPool, FeedTable, Repository};
use crate::error::Result;
use crate::models::Entry;

#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub output_dir: PathBuf,
    pub policy: PublishPolicy,
    pub workers: usize,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub tables: usize,
    pub written: usize,
    pub failed_tables: usize,
}

/// Path of the Markdown document for a feed table.
pub fn document_path(output_dir: &Path, table: &FeedTable) -> PathBuf {
    output_dir.join(format!("{}.md", table.name()))
}

/// Appends every eligible unwritten row to its feed's document. Tables are
/// independent: a failing table is reported once the others are done.
pub async fn publish(pool: &ConnectionPool, settings: &PublishSettings) -> Result<PublishReport> {
    tokio::fs::create_dir_all(&settings.output_dir).await?;

    let tables = Repository::acquire_timeout(pool, settings.acquire_timeout)
        .await?
        .list_tables()
        .await?;

    let outcomes: Vec<(FeedTable, Result<usize>)> = stream::iter(tables)
        .map(|table| async move {
            let result = publish_table(pool, settings, &table).await;
            (table, result)
        })
        .buffer_unordered(settings.workers.clamp(1, pool.max_connections().max(1)))
        .collect()
        .await;

    let mut report = PublishReport::default();
    let mut first_error = None;
    for (table, outcome) in outcomes {
        report.tables += 1;
        match outcome {
            Ok(written) => report.written += written,
            Err(e) => {
                tracing::error!("Failed to publish {}: {}", table, e);
                report.failed_tables += 1;
                first_error.get_or_insert(e);
            }
        }
    }

    tracing::info!(
        tables = report.tables,
        written = report.written,
        failed_tables = report.failed_tables,
        "publication finished"
    );

    first_error.map_or(Ok(report), Err)
}

/// Publishes one table, newest entry first. Each row is flagged written
/// right after its block is appended, before the next row starts, so an
/// interrupted run resumes where it stopped.
pub async fn publish_table(
    pool: &ConnectionPool,
    settings: &PublishSettings,
    table: &FeedTable,
) -> Result<usize> {
    let repo = Repository::acquire_timeout(pool, settings.acquire_timeout).await?;
    let entries = repo.unwritten_entries(table, settings.policy).await?;
    if entries.is_empty() {
        return Ok(0);
    }

    let path = document_path(&settings.output_dir, table);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;

    let mut written = 0;
    for entry in &entries {
        let Some(block) = render_entry(entry, settings.policy) else {
            continue;
        };
        file.write_all(block.as_bytes()).await?;
        file.flush().await?;
        repo.mark_written(table, entry.id).await?;
        written += 1;
    }

    tracing::debug!("Appended {} entries to {}", written, path.display());
    Ok(written)
}

/// Formats one entry as a Markdown block: date line, linked heading, body,
/// blank separator. Returns `None` when the policy has nothing to show.
pub fn render_entry(entry: &Entry, policy: PublishPolicy) -> Option<String> {
    let body = match policy {
        PublishPolicy::PreferSummary => entry.has_summary().then_some(&entry.summary),
        PublishPolicy::PreferFullText => {
            if entry.has_article_text() {
                Some(&entry.article_text)
            } else {
                entry.has_summary().then_some(&entry.summary)
            }
        }
    }?;

    Some(format!(
        "### {}\n\n## [{}]({})\n\n{}\n\n",
        entry.published_at.format("%B %d, %Y"),
        escape_link_text(&entry.title),
        link_destination(&entry.url),
        body.trim()
    ))
}

fn escape_link_text(text: &str) -> String {
    text.replace('[', "\\[").replace(']', "\\]")
}

/// URLs with spaces or parentheses go in angle brackets, which CommonMark
/// reads literally up to the closing `>`.
fn link_destination(url: &str) -> String {
    if url.contains(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '<' | '>')) {
        let escaped = url
            .replace('<', "%3C")
            .replace('>', "%3E")
            .replace('\n', "%0A")
            .replace('\r', "%0D");
        format!("<{escaped}>")
    } else {
        url.to_string()
    }
}
