use std::time::Duration;

use async_trait::async_trait;
use feed_rs::parser;
use reqwest::Client;

use crate::error::Result;
use crate::models::RawEntry;
use crate::traits::FeedSource;

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("feedscribe/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch_entries(&self, url: &str) -> Result<Vec<RawEntry>> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        parse_entries(&bytes[..])
    }
}

/// Maps a parsed RSS/Atom/JSON feed onto raw entries. Nothing is defaulted
/// here; validation decides what a missing field means.
pub fn parse_entries(bytes: &[u8]) -> Result<Vec<RawEntry>> {
    let feed = parser::parse(bytes)?;

    let entries = feed
        .entries
        .into_iter()
        .map(|entry| {
            // Try the summary first, then fall back to the content body
            let summary = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));

            RawEntry {
                id: Some(entry.id).filter(|id| !id.is_empty()),
                title: entry.title.map(|t| t.content),
                summary,
                published: entry.published.or(entry.updated),
                link: entry.links.first().map(|l| l.href.clone()),
            }
        })
        .collect();

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Tech News</title>
    <link>https://example.com</link>
    <description>news</description>
    <item>
      <guid>urn:one</guid>
      <title>First</title>
      <link>https://example.com/one</link>
      <description>First teaser</description>
      <pubDate>Fri, 01 Mar 2024 08:00:00 +0000</pubDate>
    </item>
    <item>
      <guid>urn:two</guid>
      <title>Undated</title>
      <link>https://example.com/two</link>
      <description>Second teaser</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn maps_rss_items() {
        let entries = parse_entries(RSS.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.id.as_deref(), Some("urn:one"));
        assert_eq!(first.title.as_deref(), Some("First"));
        assert_eq!(first.link.as_deref(), Some("https://example.com/one"));
        assert_eq!(first.summary.as_deref(), Some("First teaser"));
        assert_eq!(
            first.published,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap())
        );
        assert!(first.validate().is_ok());

        assert_eq!(entries[1].published, None);
        assert!(entries[1].validate().is_err());
    }

    #[test]
    fn rejects_non_feed_bytes() {
        assert!(parse_entries(b"<html><body>nope</body></html>").is_err());
    }
}
