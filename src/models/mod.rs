mod entry;

pub use entry::{
    format_published, parse_published, Entry, FeedSpec, NewEntry, RawEntry, PUBLISHED_FORMAT,
    SUMMARY_SENTINEL,
};
