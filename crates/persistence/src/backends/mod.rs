//! Document store implementations.
//!
//! Each backend implements [`DocumentStore`](crate::core::DocumentStore) and
//! is gated behind a feature flag.
//!
//! # Available Backends
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | Memory | `memory` | In-process store, used for tests and development |
//! | MongoDB | `mongodb` | Document store with native pipeline support |
//!
//! # Example
//!
//! ```
//! # #[cfg(feature = "memory")]
//! use arena_persistence::backends::memory::MemoryStore;
//! use arena_persistence::core::DocumentStore;
//!
//! # #[cfg(feature = "memory")]
//! # fn example() {
//! let store = MemoryStore::new();
//! assert_eq!(store.backend_name(), "memory");
//! # }
//! ```

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "mongodb")]
pub mod mongodb;
