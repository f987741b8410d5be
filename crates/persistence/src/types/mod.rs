//! Core types for the persistence layer.
//!
//! - [`Search`] and its parts - the declarative search specification
//! - [`Entity`], [`BaseEntity`] - what repositories persist
//!
//! # Examples
//!
//! ## Building a Search
//!
//! ```
//! use arena_persistence::tenant::{IntendedAudience, TenantContext};
//! use arena_persistence::types::{
//!     Search, SearchResultOptions, SearchableValue, SortableField,
//! };
//! use uuid::Uuid;
//!
//! let ctx = TenantContext::builder()
//!     .tenant_id(Uuid::new_v4())
//!     .user_id(Uuid::new_v4())
//!     .build()
//!     .unwrap();
//!
//! let search = Search::by_values(
//!     &ctx,
//!     vec![SearchableValue::eq("GameID", "CS2")],
//!     SearchResultOptions::new(0, 20),
//!     IntendedAudience::User,
//! )
//! .with_sort(SortableField::desc("CreatedAt"));
//!
//! assert_eq!(search.result_options.limit, 20);
//! ```

mod entity;
mod search;

pub use entity::{BaseEntity, Entity};
pub use search::{
    AggregationClause, ID_FIELD, Search, SearchAggregation, SearchOperator, SearchParameter,
    SearchResultOptions, SearchVisibilityOptions, SearchableDateRange, SearchableDurationRange,
    SearchableValue, SortDirection, SortableField,
};
