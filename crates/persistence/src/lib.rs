//! Arena Persistence Layer
//!
//! This crate turns declarative searches into document-store pipelines and
//! runs them, together with every write, through a generic repository that
//! isolates tenants, client applications, groups and users from each other.
//!
//! # Features
//!
//! - **Search compilation**: nested AND/OR aggregations of value, date and
//!   duration predicates compiled to `$match`, `$project`, `$sort`, `$skip`
//!   and `$limit` stages
//! - **Field access schemas**: logical field names, a queryable whitelist and
//!   storage paths declared once per entity type
//! - **Fail-closed tenancy**: isolation predicates derived from the
//!   authenticated caller, never from the search itself
//! - **Repositories**: search, CRUD, counts, atomic batches and idempotent
//!   creates over any [`DocumentStore`](core::DocumentStore)
//!
//! # Backend Features
//!
//! - `memory` (default) - in-process store, used by every test suite
//! - `mongodb` - MongoDB through the official 3.x driver
//!
//! # Architecture
//!
//! - [`schema`] - field access schemas and their registry
//! - [`types`] - searches, entities and result options
//! - [`query`] - the search compiler and pipeline stages
//! - [`tenant`] - caller context and isolation enforcement
//! - [`core`] - store and repository traits
//! - [`repository`] - the generic document repository
//! - [`backends`] - store implementations
//! - [`config`] - repository configuration
//! - [`error`] - error types for all operations
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use arena_persistence::backends::memory::MemoryStore;
//! use arena_persistence::config::RepositoryConfig;
//! use arena_persistence::core::Repository;
//! use arena_persistence::repository::DocumentRepository;
//! use arena_persistence::schema::{FieldAccessSchema, FieldDef};
//! use arena_persistence::tenant::{IntendedAudience, ResourceOwner, TenantContext};
//! use arena_persistence::types::{
//!     BaseEntity, Entity, Search, SearchResultOptions, SearchableValue,
//! };
//! use serde::{Deserialize, Serialize};
//! use uuid::Uuid;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Score {
//!     #[serde(flatten)]
//!     base: BaseEntity,
//!     game_id: String,
//!     points: i64,
//! }
//!
//! impl Entity for Score {
//!     fn id(&self) -> Uuid { self.base.id }
//!     fn resource_owner(&self) -> &ResourceOwner { &self.base.resource_owner }
//!     fn set_resource_owner(&mut self, owner: ResourceOwner) { self.base.resource_owner = owner; }
//! }
//!
//! # tokio_test::block_on(async {
//! let schema = FieldAccessSchema::builder("Score", "scores")
//!     .field(FieldDef::scalar("GameId", "game_id"))
//!     .field(FieldDef::scalar("Points", "points"))
//!     .queryable(["GameId", "Points"])
//!     .build()
//!     .unwrap();
//!
//! let repo: DocumentRepository<Score, MemoryStore> = DocumentRepository::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(schema),
//!     RepositoryConfig::default(),
//! )
//! .unwrap();
//!
//! let ctx = TenantContext::builder()
//!     .tenant_id(Uuid::new_v4())
//!     .user_id(Uuid::new_v4())
//!     .build()
//!     .unwrap();
//!
//! let score = Score { base: BaseEntity::default(), game_id: "chess".into(), points: 12 };
//! repo.create(&ctx, score).await.unwrap();
//!
//! let search = Search::by_values(
//!     &ctx,
//!     vec![SearchableValue::eq("GameId", "chess")],
//!     SearchResultOptions::default(),
//!     IntendedAudience::User,
//! );
//! let found = repo.search(&ctx, &search).await.unwrap();
//! assert_eq!(found.len(), 1);
//! # });
//! ```
//!
//! # Multitenancy
//!
//! All operations require a [`TenantContext`](tenant::TenantContext) built
//! from the authenticated caller. A search declares the
//! [`IntendedAudience`](tenant::IntendedAudience) it runs at; the
//! [`TenancyGuard`](tenant::TenancyGuard) rejects any search whose declared
//! scope does not fit the caller before the store is contacted, and wraps
//! the compiled filter with the caller's ownership predicates otherwise.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod query;
pub mod repository;
pub mod schema;
pub mod tenant;
pub mod types;

// Re-export commonly used types at crate root
pub use config::RepositoryConfig;
pub use error::{StorageError, StorageResult};
pub use repository::{DocumentRepository, IdempotentCreate};
pub use schema::{FieldAccessSchema, SchemaRegistry};
pub use tenant::{IntendedAudience, ResourceOwner, TenantContext};
pub use types::{Entity, Search};

// Re-export core traits
pub use core::{DocumentStore, Repository};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
