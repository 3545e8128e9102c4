use std::path::Path;

use opml::{Outline, OPML};

use crate::error::Result;
use crate::models::FeedSpec;

/// Reads the feed list from an OPML file.
pub fn parse_opml_file(path: &Path) -> Result<Vec<FeedSpec>> {
    let content = std::fs::read_to_string(path)?;
    parse_opml(&content)
}

/// Returns every outline with an `xmlUrl`, in document order, descending into
/// folders. The title falls back to the outline text, then to the URL.
pub fn parse_opml(content: &str) -> Result<Vec<FeedSpec>> {
    let document = OPML::from_str(content)?;
    let mut feeds = Vec::new();
    collect(&document.body.outlines, &mut feeds);
    Ok(feeds)
}

fn collect(outlines: &[Outline], feeds: &mut Vec<FeedSpec>) {
    for outline in outlines {
        if let Some(url) = outline.xml_url.as_ref().filter(|u| !u.trim().is_empty()) {
            let title = outline
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .or_else(|| Some(outline.text.clone()).filter(|t| !t.trim().is_empty()))
                .unwrap_or_else(|| url.clone());
            feeds.push(FeedSpec {
                title,
                url: url.clone(),
            });
        }
        collect(&outline.outlines, feeds);
    }
}
