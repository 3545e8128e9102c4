mod identifier;
mod pool;
mod repository;
mod schema;

pub use identifier::{quote_identifier, sanitize_identifier};
pub use pool::{ConnectionPool, PooledConnection};
pub use repository::{FeedTable, InsertOutcome, Repository};
pub use schema::REGISTRY_TABLE;
