use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// OPML document listing the feeds to ingest.
    #[serde(default = "default_opml_path")]
    pub opml_path: String,

    /// Directory receiving one append-only Markdown document per feed.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub enrich: EnrichConfig,

    #[serde(default)]
    pub summarizer: SummarizerConfig,

    #[serde(default)]
    pub publish: PublishConfig,

    #[serde(default)]
    pub mirror: MirrorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Concurrent enrichment tasks per sub-pass.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_summary_attempts")]
    pub summary_attempts: u32,

    /// A summary is accepted only with strictly more words than this.
    #[serde(default = "default_min_summary_words")]
    pub min_summary_words: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    pub api_key: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishPolicy {
    /// Hold rows back until they carry a generated summary.
    #[default]
    PreferSummary,
    /// Publish the full article text; fall back to the summary when no text
    /// was fetched.
    PreferFullText,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default)]
    pub policy: PublishPolicy,

    /// Feed tables published concurrently.
    #[serde(default = "default_publish_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_remote_folder")]
    pub remote_folder: String,

    #[serde(default = "default_rclone_binary")]
    pub rclone_binary: String,

    /// Force a full re-upload instead of the usual size/mtime comparison.
    #[serde(default)]
    pub resync: bool,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("feedscribe");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("feeds.db").to_string_lossy().to_string()
}

fn default_opml_path() -> String {
    "Feeds.opml".to_string()
}

fn default_output_dir() -> String {
    "markdown_files".to_string()
}

fn default_max_connections() -> usize {
    5
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_workers() -> usize {
    5
}

fn default_summary_attempts() -> u32 {
    10
}

fn default_min_summary_words() -> usize {
    5
}

fn default_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_model() -> String {
    "claude-3-5-haiku-20241022".to_string()
}

fn default_max_tokens() -> u32 {
    500
}

fn default_max_input_chars() -> usize {
    10000
}

fn default_publish_workers() -> usize {
    2
}

fn default_remote_folder() -> String {
    ".Notes/Current".to_string()
}

fn default_rclone_binary() -> String {
    "rclone".to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            summary_attempts: default_summary_attempts(),
            min_summary_words: default_min_summary_words(),
        }
    }
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            policy: PublishPolicy::default(),
            workers: default_publish_workers(),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            remote_folder: default_remote_folder(),
            rclone_binary: default_rclone_binary(),
            resync: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            opml_path: default_opml_path(),
            output_dir: default_output_dir(),
            pool: PoolConfig::default(),
            enrich: EnrichConfig::default(),
            summarizer: SummarizerConfig::default(),
            publish: PublishConfig::default(),
            mirror: MirrorConfig::default(),
        }
    }
}

impl Config {
    /// Loads the config from the default location, writing defaults on first run.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            config
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool.max_connections == 0 {
            return Err(AppError::Config("pool.max_connections must be at least 1".into()));
        }
        if self.enrich.workers == 0 {
            return Err(AppError::Config("enrich.workers must be at least 1".into()));
        }
        if self.publish.workers == 0 {
            return Err(AppError::Config("publish.workers must be at least 1".into()));
        }
        if self.enrich.summary_attempts == 0 {
            return Err(AppError::Config("enrich.summary_attempts must be at least 1".into()));
        }
        // Every worker holds a pooled handle for its whole task
        for (key, workers) in [
            ("enrich.workers", self.enrich.workers),
            ("publish.workers", self.publish.workers),
        ] {
            if workers > self.pool.max_connections {
                return Err(AppError::Config(format!(
                    "{key} ({workers}) exceeds pool.max_connections ({})",
                    self.pool.max_connections
                )));
            }
        }
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("feedscribe")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            db_path = "/tmp/feeds.db"

            [publish]
            policy = "prefer_full_text"

            [pool]
            max_connections = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.db_path, "/tmp/feeds.db");
        assert_eq!(config.publish.policy, PublishPolicy::PreferFullText);
        assert_eq!(config.pool.max_connections, 2);
        assert_eq!(config.pool.acquire_timeout_secs, 30);
        assert_eq!(config.enrich.summary_attempts, 10);
        assert_eq!(config.enrich.min_summary_words, 5);
        assert!(!config.mirror.enabled);
    }

    #[test]
    fn zero_connections_is_rejected() {
        let mut config = Config::default();
        config.pool.max_connections = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn workers_beyond_the_pool_are_rejected() {
        let mut config = Config::default();
        config.pool.max_connections = 2;
        config.enrich.workers = 2;
        config.publish.workers = 2;
        assert!(config.validate().is_ok());

        config.enrich.workers = 3;
        assert!(matches!(config.validate(), Err(AppError::Config(msg)) if msg.contains("enrich.workers")));

        config.enrich.workers = 1;
        config.publish.workers = 3;
        assert!(matches!(config.validate(), Err(AppError::Config(msg)) if msg.contains("publish.workers")));
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.publish.policy, PublishPolicy::PreferSummary);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.output_dir, config.output_dir);
    }
}
