//! Field access schemas.
//!
//! Every entity type declares, once at startup, which logical fields callers
//! may filter on and where those fields live in storage. The query compiler
//! consults the schema for every field a search mentions; a field that is
//! not whitelisted never reaches the store.
//!
//! Declarations are explicit tables:
//!
//! - a whitelist of logical names, exact or `prefix.*`, with explicit denies
//! - direct logical-to-storage mappings
//! - a [`FieldDef`] tree describing nested documents and arrays
//! - the indexes the collection should carry

mod access;
mod field;
mod registry;

pub use access::{
    FieldAccessSchema, FieldAccessSchemaBuilder, ID_PATH, ResolvedField, SchemaDescription,
};
pub use field::{FieldDef, FieldKind, IndexKey, IndexSpec};
pub use registry::SchemaRegistry;
