//! Query compilation.
//!
//! The [`QueryCompiler`] turns a [`Search`](crate::types::Search) into a
//! [`Pipeline`] of `$match`, `$project`, `$sort`, `$skip` and `$limit`
//! stages over storage paths. Stages are `serde_json::Value` trees, so any
//! store that understands this pipeline shape can execute them.
//!
//! # Operators
//!
//! | Search operator | Predicate |
//! |-----------------|-----------|
//! | `eq` `ne` `gt` `lt` `gte` `lte` | `$eq` ... `$lte` on the first value |
//! | `contains` | `$regex` on the escaped value, case-insensitive |
//! | `startswith` | `$regex` `^value`, case-insensitive |
//! | `endswith` | `$regex` `value$`, case-insensitive |
//! | `in` `nin` | `$in` / `$nin` on all values |

mod compiler;
mod operators;
mod stage;

pub use compiler::QueryCompiler;
pub use stage::{Pipeline, Stage};

pub(crate) use stage::document as stage_document;
