//! One run: ingest → enrich → publish → mirror, over a shared pool.

mod enrich;
mod ingest;
mod publish;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::ai::Summarizer;
use crate::config::Config;
use crate::db::{ConnectionPool, Repository};
use crate::error::{AppError, Result};
use crate::feed::FeedFetcher;
use crate::models::FeedSpec;
use crate::services::{ContentFetcher, MirrorCredentials, RcloneMirror};
use crate::traits::{ArticleSource, FeedSource, Mirror, Summarize};

pub use enrich::{
    enrich, fill_article_text, fill_summaries, summarize_with_retry, EnrichReport, EnrichSettings,
};
pub use ingest::{ingest, IngestReport};
pub use publish::{document_path, publish, publish_table, render_entry, PublishReport, PublishSettings};

/// The external systems a run talks to.
pub struct Collaborators {
    pub feeds: Arc<dyn FeedSource>,
    pub articles: Arc<dyn ArticleSource>,
    pub summarizer: Option<Arc<dyn Summarize>>,
    pub mirror: Option<Arc<dyn Mirror>>,
}

impl Collaborators {
    /// Production adapters. The summarizer needs an API key and the mirror
    /// needs `mirror.enabled` plus credentials in the environment; either is
    /// left out, with a warning, when its prerequisites are missing.
    pub fn from_config(config: &Config) -> Result<Self> {
        let summarizer = Summarizer::from_config(&config.summarizer)?
            .map(|s| Arc::new(s) as Arc<dyn Summarize>);
        if summarizer.is_none() {
            tracing::warn!("summarizer.api_key is not set; entries will not be summarized");
        }

        let mirror = if config.mirror.enabled {
            match MirrorCredentials::from_env() {
                Ok(credentials) => Some(
                    Arc::new(RcloneMirror::new(&config.mirror, credentials)) as Arc<dyn Mirror>
                ),
                Err(e) => {
                    tracing::warn!("Mirror sync disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            feeds: Arc::new(FeedFetcher::new()?),
            articles: Arc::new(ContentFetcher::new()?),
            summarizer,
            mirror,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub ingest: IngestReport,
    pub enrich: EnrichReport,
    pub publish: PublishReport,
    /// `None` when no mirror ran.
    pub mirrored: Option<bool>,
}

pub struct Pipeline {
    config: Config,
    pool: ConnectionPool,
    collaborators: Collaborators,
}

impl Pipeline {
    /// Opens the pool and makes sure the registry schema exists.
    pub async fn open(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        if let Some(parent) = PathBuf::from(&config.db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = ConnectionPool::new(&config.db_path, config.pool.max_connections);
        Repository::acquire(&pool).await?.init_schema().await?;
        tracing::debug!(
            db = %config.db_path,
            max_connections = config.pool.max_connections,
            "store opened"
        );

        Ok(Self {
            config,
            pool,
            collaborators,
        })
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.config.pool.acquire_timeout_secs)
    }

    pub async fn repository(&self) -> Result<Repository> {
        Repository::acquire_timeout(&self.pool, self.acquire_timeout()).await
    }

    pub async fn ingest(&self, feeds: &[FeedSpec]) -> Result<IngestReport> {
        ingest(
            &self.pool,
            self.collaborators.feeds.as_ref(),
            feeds,
            self.acquire_timeout(),
        )
        .await
    }

    pub async fn enrich(&self) -> Result<EnrichReport> {
        enrich(
            &self.pool,
            self.collaborators.articles.as_ref(),
            self.collaborators.summarizer.as_deref(),
            &EnrichSettings::from(&self.config),
        )
        .await
    }

    pub async fn publish(&self) -> Result<PublishReport> {
        let settings = PublishSettings {
            output_dir: PathBuf::from(&self.config.output_dir),
            policy: self.config.publish.policy,
            workers: self.config.publish.workers,
            acquire_timeout: self.acquire_timeout(),
        };
        publish(&self.pool, &settings).await
    }

    /// Mirrors the output directory. Failure is logged, never propagated:
    /// the documents are already durable locally.
    pub async fn mirror(&self) -> Option<bool> {
        let mirror = self.collaborators.mirror.as_ref()?;
        match mirror.sync(&PathBuf::from(&self.config.output_dir)).await {
            Ok(()) => Some(true),
            Err(e) => {
                tracing::warn!("Mirror sync failed: {}", e);
                Some(false)
            }
        }
    }

    /// Runs every stage in order and closes the pool afterwards, whether or
    /// not a stage failed. A failing stage does not stop the later ones: rows
    /// that are ready still get published and mirrored. The first stage error
    /// is returned once everything has run.
    pub async fn run(self, feeds: &[FeedSpec], sync: bool) -> Result<RunReport> {
        let result = self.run_stages(feeds, sync).await;
        self.close().await;
        result
    }

    async fn run_stages(&self, feeds: &[FeedSpec], sync: bool) -> Result<RunReport> {
        let mut first_error = None;
        let mut report = RunReport::default();

        match self.ingest(feeds).await {
            Ok(ingest) => report.ingest = ingest,
            Err(e) => stage_failed("ingest", e, &mut first_error),
        }
        match self.enrich().await {
            Ok(enrich) => report.enrich = enrich,
            Err(e) => stage_failed("enrichment", e, &mut first_error),
        }
        match self.publish().await {
            Ok(publish) => report.publish = publish,
            Err(e) => stage_failed("publication", e, &mut first_error),
        }
        if sync {
            report.mirrored = self.mirror().await;
        }

        first_error.map_or(Ok(report), Err)
    }

    pub async fn close(self) {
        self.pool.close_all().await;
    }
}

fn stage_failed(stage: &str, error: AppError, first_error: &mut Option<AppError>) {
    tracing::error!("{} stage failed, continuing with the next stage: {}", stage, error);
    first_error.get_or_insert(error);
}
