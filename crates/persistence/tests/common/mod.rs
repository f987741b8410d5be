//! Test infrastructure for the persistence layer.
//!
//! Provides a match record entity with its field access schema, caller
//! identities, and a store wrapper that counts calls so tests can assert
//! that rejected operations never reach the store.

#![allow(dead_code)]

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;
