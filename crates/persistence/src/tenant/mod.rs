//! Tenant and audience isolation.
//!
//! All repository operations require a [`TenantContext`] carrying the
//! authenticated caller identity. Searches declare the
//! [`IntendedAudience`] they run at, and [`TenancyGuard`] turns identity
//! and audience into mandatory predicates on the [`ResourceOwner`] stored
//! with every record.
//!
//! # Core Types
//!
//! - [`ResourceOwner`] - tenant, client application, group and user owning a record
//! - [`IntendedAudience`] - the scope a search is intended to cover
//! - [`TenantContext`] - identity, cancellation and deadline of one request
//! - [`TenancyGuard`] - fail-closed injection of isolation predicates
//!
//! # Audiences
//!
//! | Audience | Records visible |
//! |----------|-----------------|
//! | `UserAudience` | the caller's own, plus those of the caller's group |
//! | `GroupAudience` | the group's, plus the caller's own |
//! | `ClientAudience` | those of the caller's client application |
//! | `TenantAudience` | never served through searches |
//!
//! Every audience is additionally restricted to the caller's tenant.
//!
//! # Examples
//!
//! ```
//! use arena_persistence::tenant::{IntendedAudience, TenancyGuard, TenantContext};
//! use arena_persistence::types::Search;
//! use serde_json::json;
//! use uuid::Uuid;
//!
//! let ctx = TenantContext::builder()
//!     .tenant_id(Uuid::new_v4())
//!     .user_id(Uuid::new_v4())
//!     .build()
//!     .unwrap();
//!
//! let search = Search::new(&ctx, IntendedAudience::User);
//! let filter = TenancyGuard::enforce(json!({}), &search, &ctx).unwrap();
//! assert_eq!(filter["$and"].as_array().unwrap().len(), 2);
//!
//! let admin = Search::new(&ctx, IntendedAudience::Tenant);
//! assert!(TenancyGuard::enforce(json!({}), &admin, &ctx).is_err());
//! ```

mod context;
mod enforcement;
mod owner;

pub use context::{CallerIdentity, TenantContext, TenantContextBuilder};
pub use enforcement::TenancyGuard;
pub use owner::{IntendedAudience, RESOURCE_OWNER_PATH, ResourceOwner};
