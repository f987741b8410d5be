//! Core persistence traits.
//!
//! - [`DocumentStore`] - database driver abstraction
//! - [`Repository`] - the per-entity operation surface
//!
//! ```text
//! Repository<T>           (search, create, update, delete, ...)
//!     └── DocumentRepository<T, S>
//!             └── S: DocumentStore   (MemoryStore, MongoStore)
//! ```

mod repository;
mod store;

pub use repository::Repository;
pub use store::{DocumentStore, FindOptions, UpdateResult, WriteOp};
