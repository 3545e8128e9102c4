use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::SummarizerConfig;
use crate::error::{AppError, Result};
use crate::traits::Summarize;

const SYSTEM_PROMPT: &str = "You summarize articles for a daily reading digest. \
Reply with the summary only: two or three short paragraphs of plain prose covering \
what happened, who is involved and why it matters. No headings, no bullet lists, no preamble.";

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message>,
    system: &'a str,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

/// Client for the Anthropic Messages API.
pub struct Summarizer {
    client: Client,
    api_key: String,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(api_key: String, config: SummarizerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    /// Builds a summarizer when an API key is configured.
    pub fn from_config(config: &SummarizerConfig) -> Result<Option<Self>> {
        match config.api_key.as_ref().filter(|k| !k.is_empty()) {
            Some(key) => Ok(Some(Self::new(key.clone(), config.clone())?)),
            None => Ok(None),
        }
    }

    pub fn model_version(&self) -> &str {
        &self.config.model
    }

    fn user_message(&self, article_title: &str, article_content: &str) -> String {
        let content = truncate_chars(article_content, self.config.max_input_chars);
        format!("# {article_title}\n\n{content}")
    }

    fn request<'a>(&'a self, article_title: &str, article_content: &str) -> MessageRequest<'a> {
        MessageRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages: vec![Message {
                role: "user",
                content: self.user_message(article_title, article_content),
            }],
            system: SYSTEM_PROMPT,
        }
    }
}

#[async_trait]
impl Summarize for Summarizer {
    async fn summarize(&self, article_title: &str, article_content: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.config.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request(article_title, article_content))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::SummaryApi(format!("HTTP {status}: {body}")));
        }

        let reply: MessageResponse = response.json().await?;
        let summary = reply
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        if summary.trim().is_empty() {
            return Err(AppError::SummaryApi("empty completion".into()));
        }
        Ok(summary)
    }
}

/// Cuts `s` to at most `max` characters without splitting a code point.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
