//! Document store abstraction.
//!
//! This module defines the [`DocumentStore`] trait, the only seam between
//! the persistence layer and a concrete database driver. Filters, updates
//! and pipeline stages are `serde_json::Value` trees in the MongoDB query
//! language.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageResult;
use crate::schema::IndexSpec;

/// Options of a [`DocumentStore::find`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// `$sort`-style document.
    pub sort: Option<Value>,
    /// Number of documents to skip.
    pub skip: u64,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
    /// `$project`-style document.
    pub projection: Option<Value>,
}

impl FindOptions {
    /// Returns at most `limit` documents.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Outcome of an update or replace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    /// Documents matched by the filter.
    pub matched: u64,
    /// Documents actually changed.
    pub modified: u64,
}

/// One write of a multi-document transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert a document.
    Insert {
        /// Target collection.
        collection: String,
        /// The document.
        document: Value,
    },
    /// Replace the first document matching `filter`.
    Replace {
        /// Target collection.
        collection: String,
        /// Filter document.
        filter: Value,
        /// Replacement document.
        document: Value,
    },
    /// Apply `$set` / `$unset` to the first document matching `filter`.
    Update {
        /// Target collection.
        collection: String,
        /// Filter document.
        filter: Value,
        /// Update document.
        update: Value,
    },
    /// Delete every document matching `filter`.
    Delete {
        /// Target collection.
        collection: String,
        /// Filter document.
        filter: Value,
    },
}

impl WriteOp {
    /// Returns the collection the write targets.
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Insert { collection, .. }
            | WriteOp::Replace { collection, .. }
            | WriteOp::Update { collection, .. }
            | WriteOp::Delete { collection, .. } => collection,
        }
    }
}

/// A document database the repositories run against.
///
/// Implementations must report unique index violations as
/// [`BackendError::DuplicateKey`](crate::error::BackendError::DuplicateKey)
/// so callers can tell them apart from other failures.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns a human-readable name for this store.
    fn backend_name(&self) -> &'static str;

    /// Runs an aggregation pipeline and collects the resulting documents.
    ///
    /// Stores must support at least `$match`, `$project`, `$sort`, `$skip`
    /// and `$limit`.
    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> StorageResult<Vec<Value>>;

    /// Returns the documents matching `filter`.
    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        options: &FindOptions,
    ) -> StorageResult<Vec<Value>>;

    /// Inserts a document.
    ///
    /// # Errors
    ///
    /// * `BackendError::DuplicateKey` - if a unique index rejects the document
    async fn insert_one(&self, collection: &str, document: Value) -> StorageResult<()>;

    /// Inserts documents in order, stopping at the first failure.
    ///
    /// Documents before the failing one stay inserted. Use
    /// [`transaction`](Self::transaction) for all-or-nothing writes.
    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> StorageResult<()>;

    /// Applies `$set` / `$unset` to the first document matching `filter`.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> StorageResult<UpdateResult>;

    /// Replaces the first document matching `filter`.
    async fn replace_one(
        &self,
        collection: &str,
        filter: &Value,
        replacement: Value,
    ) -> StorageResult<UpdateResult>;

    /// Deletes the first document matching `filter`. Returns the number deleted.
    async fn delete_one(&self, collection: &str, filter: &Value) -> StorageResult<u64>;

    /// Deletes every document matching `filter`. Returns the number deleted.
    async fn delete_many(&self, collection: &str, filter: &Value) -> StorageResult<u64>;

    /// Counts the documents matching `filter`.
    async fn count_documents(&self, collection: &str, filter: &Value) -> StorageResult<u64>;

    /// Applies every write or none of them.
    ///
    /// # Errors
    ///
    /// * `TransactionError::EmptyBatch` - if `ops` is empty
    /// * the error of the first failing write, after rolling back
    async fn transaction(&self, ops: Vec<WriteOp>) -> StorageResult<()>;

    /// Creates an index if it does not exist yet.
    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StorageResult<()>;
}
