use std::sync::OnceLock;

use regex::Regex;

use crate::error::{AppError, Result};

use super::schema::REGISTRY_TABLE;

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s").expect("static regex"))
}

/// Maps a feed title to a table name. Each whitespace character becomes `_`,
/// anything else that is not alphanumeric or `_` is dropped. Names that
/// SQLite reserves, that start with a digit, or that shadow the registry get
/// a `feed_` prefix. The mapping is pure, so one title always yields one name.
pub fn sanitize_identifier(title: &str) -> Result<String> {
    let replaced = whitespace().replace_all(title.trim(), "_");
    let name: String = replaced
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    if name.trim_matches('_').is_empty() {
        return Err(AppError::InvalidIdentifier(title.to_string()));
    }

    let reserved = name.to_ascii_lowercase().starts_with("sqlite_")
        || name.eq_ignore_ascii_case(REGISTRY_TABLE)
        || name.starts_with(|c: char| c.is_ascii_digit());

    if reserved {
        Ok(format!("feed_{name}"))
    } else {
        Ok(name)
    }
}

/// Double-quotes an identifier for interpolation into SQL.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
