mod content_fetcher;
mod mirror;

pub use content_fetcher::{extract_content, ContentFetcher};
pub use mirror::{MirrorCredentials, RcloneMirror};
