//! The in-process document store.

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::core::{DocumentStore, FindOptions, UpdateResult, WriteOp};
use crate::error::{BackendError, StorageResult, TransactionError};
use crate::query::Stage;
use crate::schema::{ID_PATH, IndexSpec};

use super::document::{copy_path, lookup, remove_path, sort_order};
use super::filter::{apply_update, matches};

const BACKEND_NAME: &str = "memory";

#[derive(Debug, Clone, Default)]
struct Collection {
    documents: Vec<Value>,
    indexes: Vec<IndexSpec>,
}

impl Collection {
    /// Fails if `candidate` collides with a stored document other than the
    /// one at `skip` on `_id` or on any unique index.
    fn check_unique(
        &self,
        name: &str,
        candidate: &Value,
        skip: Option<usize>,
    ) -> Result<(), BackendError> {
        let others = || {
            self.documents
                .iter()
                .enumerate()
                .filter(move |(i, _)| Some(*i) != skip)
                .map(|(_, doc)| doc)
        };

        if let Some(id) = candidate.get(ID_PATH) {
            if others().any(|doc| doc.get(ID_PATH) == Some(id)) {
                return Err(duplicate(name));
            }
        }

        for index in self.indexes.iter().filter(|index| index.unique) {
            let Some(key) = index_key(index, candidate) else {
                continue;
            };
            if others().any(|doc| index_key(index, doc).as_ref() == Some(&key)) {
                tracing::debug!(collection = name, index = %index.name, "unique index violation");
                return Err(duplicate(name));
            }
        }
        Ok(())
    }

    fn insert(&mut self, name: &str, document: Value) -> Result<(), BackendError> {
        if !document.is_object() {
            return Err(BackendError::QueryError {
                message: "only documents can be inserted".to_string(),
            });
        }
        self.check_unique(name, &document, None)?;
        self.documents.push(document);
        Ok(())
    }

    fn position(&self, filter: &Value) -> StorageResult<Option<usize>> {
        for (i, doc) in self.documents.iter().enumerate() {
            if matches(doc, filter)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn replace(
        &mut self,
        name: &str,
        filter: &Value,
        mut replacement: Value,
    ) -> StorageResult<UpdateResult> {
        let Some(i) = self.position(filter)? else {
            return Ok(UpdateResult::default());
        };
        // The primary key of a stored document never changes.
        if let (Value::Object(map), Some(id)) = (&mut replacement, self.documents[i].get(ID_PATH)) {
            map.insert(ID_PATH.to_string(), id.clone());
        }
        self.check_unique(name, &replacement, Some(i))?;
        let modified = u64::from(self.documents[i] != replacement);
        self.documents[i] = replacement;
        Ok(UpdateResult { matched: 1, modified })
    }

    fn update(
        &mut self,
        name: &str,
        filter: &Value,
        update: &Value,
    ) -> StorageResult<UpdateResult> {
        let Some(i) = self.position(filter)? else {
            return Ok(UpdateResult::default());
        };
        let mut updated = self.documents[i].clone();
        apply_update(&mut updated, update)?;
        if updated.get(ID_PATH) != self.documents[i].get(ID_PATH) {
            return Err(BackendError::QueryError {
                message: "the _id field cannot be modified".to_string(),
            }
            .into());
        }
        self.check_unique(name, &updated, Some(i))?;
        let modified = u64::from(self.documents[i] != updated);
        self.documents[i] = updated;
        Ok(UpdateResult { matched: 1, modified })
    }

    fn delete(&mut self, filter: &Value, many: bool) -> StorageResult<u64> {
        let mut deleted = 0;
        let mut kept = Vec::with_capacity(self.documents.len());
        for doc in self.documents.drain(..) {
            if (many || deleted == 0) && matches(&doc, filter)? {
                deleted += 1;
            } else {
                kept.push(doc);
            }
        }
        self.documents = kept;
        Ok(deleted)
    }
}

/// Values of the index's fields in `document`, or `None` when a sparse
/// index does not cover it.
///
/// A sparse index skips a document only when every key is absent. An
/// explicit `null` is indexed, so two `null`s collide on a unique index.
fn index_key(index: &IndexSpec, document: &Value) -> Option<Vec<Value>> {
    let found: Vec<Option<Value>> = index
        .keys
        .iter()
        .map(|k| lookup(document, &k.path).first().map(|v| (*v).clone()))
        .collect();
    if index.sparse && found.iter().all(Option::is_none) {
        return None;
    }
    Some(
        found
            .into_iter()
            .map(|v| v.unwrap_or(Value::Null))
            .collect(),
    )
}

fn duplicate(collection: &str) -> BackendError {
    BackendError::DuplicateKey {
        collection: collection.to_string(),
    }
}

fn malformed_stage(stage: &Value) -> BackendError {
    BackendError::QueryError {
        message: format!("unsupported pipeline stage {stage}"),
    }
}

fn project(document: &Value, projection: &Map<String, Value>) -> Value {
    let include = projection
        .iter()
        .any(|(path, flag)| path != ID_PATH && is_truthy(flag));

    if include {
        let mut out = Value::Object(Map::new());
        let keep_id = projection.get(ID_PATH).is_none_or(is_truthy);
        if keep_id {
            copy_path(document, &mut out, ID_PATH);
        }
        for (path, flag) in projection {
            if path != ID_PATH && is_truthy(flag) {
                copy_path(document, &mut out, path);
            }
        }
        out
    } else {
        let mut out = document.clone();
        for path in projection.keys() {
            remove_path(&mut out, path);
        }
        out
    }
}

fn is_truthy(flag: &Value) -> bool {
    match flag {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        _ => true,
    }
}

fn sort(documents: &mut [Value], spec: &Map<String, Value>) {
    documents.sort_by(|a, b| {
        for (path, direction) in spec {
            let ordering = sort_order(
                lookup(a, path).first().copied(),
                lookup(b, path).first().copied(),
            );
            let ordering = if direction.as_i64() == Some(-1) {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering.is_ne() {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn as_count(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// Runs `$match`, `$project`, `$sort`, `$skip` and `$limit` stages.
fn run_pipeline(documents: &[Value], pipeline: &[Value]) -> StorageResult<Vec<Value>> {
    let mut working = documents.to_vec();
    for raw in pipeline {
        let stage = Stage::from_document(raw).ok_or_else(|| malformed_stage(raw))?;
        match stage {
            Stage::Match(filter) => {
                let mut kept = Vec::with_capacity(working.len());
                for doc in working {
                    if matches(&doc, &filter)? {
                        kept.push(doc);
                    }
                }
                working = kept;
            }
            Stage::Project(spec) => {
                let spec = spec.as_object().ok_or_else(|| malformed_stage(raw))?;
                working = working.iter().map(|doc| project(doc, spec)).collect();
            }
            Stage::Sort(spec) => {
                let spec = spec.as_object().ok_or_else(|| malformed_stage(raw))?;
                sort(&mut working, spec);
            }
            Stage::Skip(n) => {
                working = working.into_iter().skip(as_count(n)).collect();
            }
            Stage::Limit(n) => working.truncate(as_count(n)),
        }
    }
    Ok(working)
}

/// An in-process [`DocumentStore`].
///
/// Documents live in a map of collections guarded by one
/// `parking_lot::RwLock`. Filters, updates and pipelines are evaluated
/// in-process with the same semantics the MongoDB store gives them, so the
/// memory store serves as the test double for every repository.
///
/// # Example
///
/// ```
/// use arena_persistence::backends::memory::MemoryStore;
/// use arena_persistence::core::{DocumentStore, FindOptions};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let store = MemoryStore::new();
/// store.insert_one("players", json!({"_id": "p1", "name": "ada"})).await.unwrap();
///
/// let found = store
///     .find("players", &json!({"name": "ada"}), &FindOptions::default())
///     .await
///     .unwrap();
/// assert_eq!(found.len(), 1);
/// # });
/// ```
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let collections = self.collections.read();
        let mut names: Vec<&String> = collections.keys().collect();
        names.sort();
        f.debug_struct("MemoryStore")
            .field("collections", &names)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every document in a collection, in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    /// Returns the number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, |c| c.documents.len())
    }

    /// Returns `true` if the collection holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Returns the indexes created on a collection.
    pub fn indexes(&self, collection: &str) -> Vec<IndexSpec> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }
}

fn apply(
    collections: &mut HashMap<String, Collection>,
    op: WriteOp,
) -> StorageResult<()> {
    match op {
        WriteOp::Insert { collection, document } => {
            let target = collections.entry(collection.clone()).or_default();
            target.insert(&collection, document)?;
        }
        WriteOp::Replace { collection, filter, document } => {
            let target = collections.entry(collection.clone()).or_default();
            target.replace(&collection, &filter, document)?;
        }
        WriteOp::Update { collection, filter, update } => {
            let target = collections.entry(collection.clone()).or_default();
            target.update(&collection, &filter, &update)?;
        }
        WriteOp::Delete { collection, filter } => {
            if let Some(target) = collections.get_mut(&collection) {
                target.delete(&filter, true)?;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> StorageResult<Vec<Value>> {
        let collections = self.collections.read();
        let documents = collections
            .get(collection)
            .map(|c| c.documents.as_slice())
            .unwrap_or_default();
        run_pipeline(documents, pipeline)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        options: &FindOptions,
    ) -> StorageResult<Vec<Value>> {
        let mut pipeline = vec![serde_json::json!({ "$match": filter })];
        if let Some(sort) = &options.sort {
            pipeline.push(serde_json::json!({ "$sort": sort }));
        }
        if options.skip > 0 {
            pipeline.push(serde_json::json!({ "$skip": options.skip }));
        }
        if let Some(limit) = options.limit {
            pipeline.push(serde_json::json!({ "$limit": limit }));
        }
        if let Some(projection) = &options.projection {
            pipeline.push(serde_json::json!({ "$project": projection }));
        }
        self.aggregate(collection, &pipeline).await
    }

    async fn insert_one(&self, collection: &str, document: Value) -> StorageResult<()> {
        let mut collections = self.collections.write();
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(collection, document)?;
        Ok(())
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> StorageResult<()> {
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        for document in documents {
            target.insert(collection, document)?;
        }
        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> StorageResult<UpdateResult> {
        let mut collections = self.collections.write();
        match collections.get_mut(collection) {
            Some(target) => target.update(collection, filter, update),
            None => Ok(UpdateResult::default()),
        }
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &Value,
        replacement: Value,
    ) -> StorageResult<UpdateResult> {
        let mut collections = self.collections.write();
        match collections.get_mut(collection) {
            Some(target) => target.replace(collection, filter, replacement),
            None => Ok(UpdateResult::default()),
        }
    }

    async fn delete_one(&self, collection: &str, filter: &Value) -> StorageResult<u64> {
        let mut collections = self.collections.write();
        match collections.get_mut(collection) {
            Some(target) => target.delete(filter, false),
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &str, filter: &Value) -> StorageResult<u64> {
        let mut collections = self.collections.write();
        match collections.get_mut(collection) {
            Some(target) => target.delete(filter, true),
            None => Ok(0),
        }
    }

    async fn count_documents(&self, collection: &str, filter: &Value) -> StorageResult<u64> {
        let collections = self.collections.read();
        let Some(target) = collections.get(collection) else {
            return Ok(0);
        };
        let mut count = 0;
        for doc in &target.documents {
            if matches(doc, filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> StorageResult<()> {
        if ops.is_empty() {
            return Err(TransactionError::EmptyBatch.into());
        }
        let mut collections = self.collections.write();
        let mut staged = collections.clone();
        let count = ops.len();
        for (i, op) in ops.into_iter().enumerate() {
            if let Err(e) = apply(&mut staged, op) {
                tracing::warn!(
                    backend = BACKEND_NAME,
                    failed_op = i,
                    ops = count,
                    error = %e,
                    "transaction rolled back"
                );
                return Err(e);
            }
        }
        *collections = staged;
        tracing::debug!(backend = BACKEND_NAME, ops = count, "transaction committed");
        Ok(())
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StorageResult<()> {
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        if target.indexes.iter().any(|existing| existing.name == index.name) {
            return Ok(());
        }
        if index.unique {
            let mut seen: Vec<Vec<Value>> = Vec::new();
            for doc in &target.documents {
                if let Some(key) = index_key(index, doc) {
                    if seen.contains(&key) {
                        return Err(duplicate(collection).into());
                    }
                    seen.push(key);
                }
            }
        }
        target.indexes.push(index.clone());
        Ok(())
    }
}
