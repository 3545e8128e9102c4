use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use url::Url;

use crate::error::Result;
use crate::traits::ArticleSource;

const USER_AGENT_STRING: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Below this many characters the page is treated as a stub or paywall.
const MIN_TEXT_CHARS: usize = 200;

/// Wide enough that html2text never wraps a paragraph.
const RENDER_WIDTH: usize = 10_000;

fn paragraph() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<p(?:\s[^>]*)?>(.*?)</p\s*>").expect("static regex"))
}

/// Fetches article pages and keeps their paragraph text.
pub struct ContentFetcher {
    client: Client,
}

impl ContentFetcher {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArticleSource for ContentFetcher {
    async fn fetch_text(&self, article_url: &str) -> Result<Option<String>> {
        if Url::parse(article_url).is_err() {
            tracing::debug!("Skipping unparseable article URL {}", article_url);
            return Ok(None);
        }

        let response = self.client.get(article_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Article {} answered {}", article_url, status);
            return Ok(None);
        }

        let html = response.text().await?;
        Ok(extract_content(&html))
    }
}

/// Plain text of every `<p>` element, one paragraph per line. Pages without
/// paragraph markup fall back to the text of the whole document.
pub fn extract_content(html: &str) -> Option<String> {
    let paragraphs: Vec<String> = paragraph()
        .captures_iter(html)
        .filter_map(|caps| render_text(&caps[1]))
        .collect();

    let text = if paragraphs.is_empty() {
        render_text(html)?
    } else {
        paragraphs.join("\n")
    };

    if text.chars().count() > MIN_TEXT_CHARS {
        Some(text)
    } else {
        tracing::debug!("Extracted text too short ({} chars)", text.len());
        None
    }
}

fn render_text(fragment: &str) -> Option<String> {
    let rendered = match html2text::from_read(fragment.as_bytes(), RENDER_WIDTH) {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("Failed to convert HTML to text: {}", e);
            return None;
        }
    };

    let joined = rendered
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}
