mod feed_list;
mod fetcher;

pub use feed_list::{parse_opml, parse_opml_file};
pub use fetcher::FeedFetcher;
