use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use feedscribe::db::{ConnectionPool, Repository};
use feedscribe::models::{FeedSpec, RawEntry};
use feedscribe::traits::{ArticleSource, FeedSource, Mirror, Summarize};
use feedscribe::{AppError, Collaborators, Config, Pipeline, Result};

#[derive(Default)]
struct Feeds(Mutex<HashMap<String, Vec<RawEntry>>>);

impl Feeds {
    fn set(&self, url: &str, entries: Vec<RawEntry>) {
        self.0.lock().unwrap().insert(url.to_string(), entries);
    }
}

#[async_trait]
impl FeedSource for Feeds {
    async fn fetch_entries(&self, url: &str) -> Result<Vec<RawEntry>> {
        self.0
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::Other(anyhow::anyhow!("404 for {url}")))
    }
}

struct Articles;

#[async_trait]
impl ArticleSource for Articles {
    async fn fetch_text(&self, url: &str) -> Result<Option<String>> {
        Ok(Some(format!("The full article published at {url}.")))
    }
}

/// Pages that load without usable text, like paywalls and stubs.
struct Paywalled(&'static str);

#[async_trait]
impl ArticleSource for Paywalled {
    async fn fetch_text(&self, url: &str) -> Result<Option<String>> {
        if url.ends_with(self.0) {
            return Ok(None);
        }
        Articles.fetch_text(url).await
    }
}

/// Drops a feed table while fetching one of its articles, so that row's
/// store write fails mid-run.
#[derive(Default)]
struct DropsTable {
    pool: OnceLock<ConnectionPool>,
}

#[async_trait]
impl ArticleSource for DropsTable {
    async fn fetch_text(&self, url: &str) -> Result<Option<String>> {
        if url.ends_with("/t1") {
            if let Some(pool) = self.pool.get() {
                Repository::acquire(pool).await?.drop_table("Tech").await?;
            }
        }
        Articles.fetch_text(url).await
    }
}

struct Summaries;

#[async_trait]
impl Summarize for Summaries {
    async fn summarize(&self, title: &str, _article_text: &str) -> Result<String> {
        Ok(format!("A concise summary of {title} for busy readers."))
    }
}

#[derive(Default)]
struct RecordingMirror {
    fail: bool,
    synced: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl Mirror for RecordingMirror {
    async fn sync(&self, local_dir: &Path) -> Result<()> {
        self.synced.lock().unwrap().push(local_dir.to_path_buf());
        if self.fail {
            return Err(AppError::Sync("remote unreachable".into()));
        }
        Ok(())
    }
}

fn entry(id: &str, day: u32) -> RawEntry {
    RawEntry {
        id: Some(format!("urn:{id}")),
        title: Some(format!("Story {id}")),
        summary: Some("teaser".to_string()),
        published: Some(Utc.with_ymd_and_hms(2024, 6, day, 9, 30, 0).unwrap()),
        link: Some(format!("https://news.example.com/{id}")),
    }
}

fn config(root: &Path) -> Config {
    let mut config: Config = toml::from_str(&format!(
        "db_path = {:?}\noutput_dir = {:?}\n",
        root.join("db").join("feeds.db").to_string_lossy(),
        root.join("out").to_string_lossy()
    ))
    .unwrap();
    config.pool.max_connections = 3;
    config.pool.acquire_timeout_secs = 10;
    config.enrich.workers = 3;
    config
}

fn tech_news() -> Vec<FeedSpec> {
    vec![FeedSpec {
        title: "Tech News".to_string(),
        url: "https://news.example.com/rss".to_string(),
    }]
}

fn collaborators(feeds: Arc<Feeds>, mirror: Option<Arc<RecordingMirror>>) -> Collaborators {
    Collaborators {
        feeds,
        articles: Arc::new(Articles),
        summarizer: Some(Arc::new(Summaries)),
        mirror: mirror.map(|m| m as Arc<dyn Mirror>),
    }
}

fn document(root: &Path) -> String {
    std::fs::read_to_string(root.join("out").join("Tech_News.md")).unwrap()
}

#[tokio::test]
async fn full_run_publishes_newest_first_and_only_once() {
    let tmp = TempDir::new().unwrap();
    let feeds = Arc::new(Feeds::default());
    feeds.set(
        "https://news.example.com/rss",
        vec![entry("a", 1), entry("b", 2), entry("c", 3)],
    );

    let pipeline = Pipeline::open(config(tmp.path()), collaborators(feeds.clone(), None))
        .await
        .unwrap();
    let pool = pipeline.pool().clone();
    let report = pipeline.run(&tech_news(), false).await.unwrap();

    assert_eq!(report.ingest.inserted, 3);
    assert_eq!(report.enrich.text_fetched, 3);
    assert_eq!(report.enrich.summarized, 3);
    assert_eq!(report.publish.written, 3);
    assert_eq!(report.mirrored, None);
    assert!(pool.is_closed());
    assert_eq!(pool.outstanding(), 0);

    let first = document(tmp.path());
    let c = first.find("[Story c]").unwrap();
    let b = first.find("[Story b]").unwrap();
    let a = first.find("[Story a]").unwrap();
    assert!(c < b && b < a);
    assert!(first.starts_with("### June 03, 2024\n\n## [Story c](https://news.example.com/c)\n\n"));
    assert!(first.contains("A concise summary of Story c for busy readers."));

    // Same feed contents again: every entry is a duplicate, nothing is appended.
    let pipeline = Pipeline::open(config(tmp.path()), collaborators(feeds.clone(), None))
        .await
        .unwrap();
    let report = pipeline.run(&tech_news(), false).await.unwrap();
    assert_eq!(report.ingest.inserted, 0);
    assert_eq!(report.ingest.duplicates, 3);
    assert_eq!(report.publish.written, 0);
    assert_eq!(document(tmp.path()), first);

    // A new entry is appended after what is already there.
    feeds.set(
        "https://news.example.com/rss",
        vec![entry("a", 1), entry("b", 2), entry("c", 3), entry("d", 4)],
    );
    let pipeline = Pipeline::open(config(tmp.path()), collaborators(feeds, None))
        .await
        .unwrap();
    let report = pipeline.run(&tech_news(), false).await.unwrap();
    assert_eq!(report.ingest.inserted, 1);
    assert_eq!(report.publish.written, 1);

    let third = document(tmp.path());
    assert!(third.starts_with(&first));
    assert_eq!(third.matches("[Story d]").count(), 1);
}

#[tokio::test]
async fn invalid_entries_and_unreachable_feeds_do_not_stop_the_run() {
    let tmp = TempDir::new().unwrap();
    let feeds = Arc::new(Feeds::default());
    let mut no_link = entry("x", 5);
    no_link.link = None;
    feeds.set("https://news.example.com/rss", vec![entry("a", 1), no_link]);

    let mut specs = tech_news();
    specs.push(FeedSpec {
        title: "Gone".to_string(),
        url: "https://gone.example.com/rss".to_string(),
    });

    let pipeline = Pipeline::open(config(tmp.path()), collaborators(feeds, None))
        .await
        .unwrap();
    let report = pipeline.run(&specs, false).await.unwrap();

    assert_eq!(report.ingest.feeds, 2);
    assert_eq!(report.ingest.fetch_failures, 1);
    assert_eq!(report.ingest.inserted, 1);
    assert_eq!(report.ingest.invalid, 1);
    assert_eq!(report.publish.written, 1);
    assert!(!document(tmp.path()).contains("Story x"));
}

#[tokio::test]
async fn mirror_failure_is_reported_but_not_fatal() {
    let tmp = TempDir::new().unwrap();
    let feeds = Arc::new(Feeds::default());
    feeds.set("https://news.example.com/rss", vec![entry("a", 1)]);
    let mirror = Arc::new(RecordingMirror {
        fail: true,
        ..Default::default()
    });

    let pipeline = Pipeline::open(
        config(tmp.path()),
        collaborators(feeds, Some(mirror.clone())),
    )
    .await
    .unwrap();
    let report = pipeline.run(&tech_news(), true).await.unwrap();

    assert_eq!(report.publish.written, 1);
    assert_eq!(report.mirrored, Some(false));
    assert_eq!(
        mirror.synced.lock().unwrap().as_slice(),
        &[tmp.path().join("out")]
    );
}

#[tokio::test]
async fn reset_written_republishes_into_the_same_document() {
    let tmp = TempDir::new().unwrap();
    let feeds = Arc::new(Feeds::default());
    feeds.set("https://news.example.com/rss", vec![entry("a", 1), entry("b", 2)]);
    let mirror = Arc::new(RecordingMirror::default());

    let pipeline = Pipeline::open(
        config(tmp.path()),
        collaborators(feeds.clone(), Some(mirror.clone())),
    )
    .await
    .unwrap();
    let report = pipeline.run(&tech_news(), true).await.unwrap();
    assert_eq!(report.mirrored, Some(true));

    let pipeline = Pipeline::open(config(tmp.path()), collaborators(feeds, None))
        .await
        .unwrap();
    let reset = pipeline
        .repository()
        .await
        .unwrap()
        .reset_written_flags()
        .await
        .unwrap();
    assert_eq!(reset, 2);

    let report = pipeline.publish().await.unwrap();
    pipeline.close().await;
    assert_eq!(report.written, 2);
    assert_eq!(document(tmp.path()).matches("[Story a]").count(), 2);
}

#[tokio::test]
async fn pool_ceiling_holds_for_direct_callers() {
    let tmp = TempDir::new().unwrap();
    let pipeline = Pipeline::open(
        config(tmp.path()),
        collaborators(Arc::new(Feeds::default()), None),
    )
    .await
    .unwrap();
    let pool = pipeline.pool().clone();

    let mut held = Vec::new();
    for _ in 0..pool.max_connections() {
        held.push(Repository::acquire(&pool).await.unwrap());
    }
    assert!(matches!(
        Repository::acquire(&pool).await,
        Err(AppError::PoolExhausted { max: 3 })
    ));

    held.pop();
    assert!(Repository::acquire(&pool).await.is_ok());

    drop(held);
    pipeline.close().await;
    assert!(matches!(
        Repository::acquire(&pool).await,
        Err(AppError::PoolClosed)
    ));
}

fn feed(title: &str, url: &str) -> FeedSpec {
    FeedSpec {
        title: title.to_string(),
        url: url.to_string(),
    }
}

#[tokio::test]
async fn rows_without_page_text_are_still_summarized_and_published() {
    let tmp = TempDir::new().unwrap();
    let feeds = Arc::new(Feeds::default());
    feeds.set(
        "https://news.example.com/rss",
        vec![entry("paywalled", 1), entry("open", 2)],
    );

    let pipeline = Pipeline::open(
        config(tmp.path()),
        Collaborators {
            feeds,
            articles: Arc::new(Paywalled("/paywalled")),
            summarizer: Some(Arc::new(Summaries)),
            mirror: None,
        },
    )
    .await
    .unwrap();
    let report = pipeline.run(&tech_news(), false).await.unwrap();

    assert_eq!(report.enrich.text_failed, 1);
    assert_eq!(report.enrich.summarized, 2);
    assert_eq!(report.enrich.summarized_from_teaser, 1);
    assert_eq!(report.publish.written, 2);
    assert!(document(tmp.path()).contains("A concise summary of Story paywalled"));
}

#[tokio::test]
async fn a_failing_table_does_not_keep_others_from_being_published() {
    let tmp = TempDir::new().unwrap();
    let feeds = Arc::new(Feeds::default());
    feeds.set("https://tech.example.com/rss", vec![entry("t1", 1)]);
    feeds.set("https://world.example.com/rss", vec![entry("w1", 2)]);
    let articles = Arc::new(DropsTable::default());

    let pipeline = Pipeline::open(
        config(tmp.path()),
        Collaborators {
            feeds,
            articles: articles.clone(),
            summarizer: Some(Arc::new(Summaries)),
            mirror: None,
        },
    )
    .await
    .unwrap();
    let _ = articles.pool.set(pipeline.pool().clone());

    let result = pipeline
        .run(
            &[
                feed("Tech", "https://tech.example.com/rss"),
                feed("World", "https://world.example.com/rss"),
            ],
            false,
        )
        .await;
    assert!(matches!(result, Err(AppError::Database(_))));

    let world = std::fs::read_to_string(tmp.path().join("out").join("World.md")).unwrap();
    assert!(world.contains("[Story w1]"));
    assert!(!tmp.path().join("out").join("Tech.md").exists());

    let pool = ConnectionPool::new(tmp.path().join("db").join("feeds.db"), 1);
    let repo = Repository::acquire(&pool).await.unwrap();
    let tables = repo.list_tables().await.unwrap();
    assert_eq!(tables.len(), 1);
    assert!(repo.entries(&tables[0]).await.unwrap().iter().all(|e| e.written));
}
