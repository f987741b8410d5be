//! MongoDB document store.
//!
//! Enabled with the `mongodb` feature. Pipelines produced by the
//! [`QueryCompiler`](crate::query::QueryCompiler) are sent to the server
//! unchanged; multi-document writes run inside a client session
//! transaction, which requires a replica set or sharded cluster.
//!
//! ```no_run
//! use arena_persistence::backends::mongodb::{MongoConfig, MongoStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MongoStore::connect(MongoConfig::from_env()?).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod store;

pub use config::MongoConfig;
pub use store::MongoStore;
