//! Feed ingestion, enrichment and Markdown publication over a pooled
//! SQLite store.

pub mod ai;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod traits;

pub use config::Config;
pub use error::{AppError, Result};
pub use pipeline::{Collaborators, Pipeline, RunReport};
