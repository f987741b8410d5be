//! In-process document store.
//!
//! [`MemoryStore`] keeps every collection in memory and evaluates filters,
//! updates and aggregation pipelines itself. It is the default backend and
//! the store every test suite runs against.
//!
//! # Supported query language
//!
//! | Kind | Supported |
//! |------|-----------|
//! | Logical | `$and`, `$or`, `$nor` |
//! | Comparison | `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte` |
//! | Sets | `$in`, `$nin` |
//! | Text | `$regex` with `$options` (`i`, `m`) |
//! | Arrays | `$elemMatch`, implicit element matching |
//! | Other | `$exists` |
//! | Stages | `$match`, `$project`, `$sort`, `$skip`, `$limit` |
//! | Updates | `$set`, `$unset` |
//!
//! Strings holding RFC 3339 timestamps compare as instants, so date range
//! filters behave as they do against BSON dates.
//!
//! Anything else is rejected with `BackendError::QueryError` rather than
//! silently ignored.

mod document;
mod filter;
mod store;

pub use store::MemoryStore;
