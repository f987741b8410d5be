//! MongoDB document store.

use std::fmt::Debug;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures_util::TryStreamExt;
use mongodb::options::IndexOptions;
use mongodb::{Client, ClientSession, Database, IndexModel};
use serde_json::Value;

use crate::core::{DocumentStore, FindOptions, UpdateResult, WriteOp};
use crate::error::{BackendError, StorageError, StorageResult, TransactionError};
use crate::schema::IndexSpec;

use super::MongoConfig;

const BACKEND_NAME: &str = "mongodb";

/// A [`DocumentStore`] backed by a MongoDB database.
///
/// Documents cross the driver boundary as JSON trees converted to BSON, so
/// identifiers and timestamps are stored as the strings the entities
/// serialize to.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    database: Database,
    config: MongoConfig,
}

impl Debug for MongoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoStore")
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

impl MongoStore {
    /// Connects and verifies the connection with a `ping`.
    pub async fn connect(config: MongoConfig) -> StorageResult<Self> {
        config.validate()?;
        let client = Client::with_uri_str(&config.uri).await.map_err(|e| {
            StorageError::Backend(BackendError::ConnectionFailed {
                backend_name: BACKEND_NAME.to_string(),
                message: e.to_string(),
            })
        })?;
        let database = client.database(&config.database);
        database.run_command(doc! { "ping": 1 }).await?;

        tracing::info!(database = %config.database, "connected to MongoDB");
        Ok(Self {
            client,
            database,
            config,
        })
    }

    /// Wraps an existing client.
    pub fn with_client(client: Client, config: MongoConfig) -> Self {
        let database = client.database(&config.database);
        Self {
            client,
            database,
            config,
        }
    }

    /// Returns the connection settings.
    pub fn config(&self) -> &MongoConfig {
        &self.config
    }

    fn collection(&self, name: &str) -> mongodb::Collection<Document> {
        self.database.collection::<Document>(name)
    }

    async fn apply(&self, session: &mut ClientSession, op: WriteOp) -> StorageResult<()> {
        let name = op.collection().to_string();
        let collection = self.collection(&name);
        let result = match op {
            WriteOp::Insert { document, .. } => collection
                .insert_one(to_document(&document)?)
                .session(&mut *session)
                .await
                .map(|_| ()),
            WriteOp::Replace {
                filter, document, ..
            } => collection
                .replace_one(to_document(&filter)?, to_document(&document)?)
                .session(&mut *session)
                .await
                .map(|_| ()),
            WriteOp::Update { filter, update, .. } => collection
                .update_one(to_document(&filter)?, to_document(&update)?)
                .session(&mut *session)
                .await
                .map(|_| ()),
            WriteOp::Delete { filter, .. } => collection
                .delete_many(to_document(&filter)?)
                .session(&mut *session)
                .await
                .map(|_| ()),
        };
        result.map_err(|e| driver_error(&name, e))
    }
}

fn to_document(value: &Value) -> StorageResult<Document> {
    bson::to_document(value).map_err(|e| {
        StorageError::Backend(BackendError::SerializationError {
            message: e.to_string(),
        })
    })
}

fn to_value(document: Document) -> Value {
    Bson::Document(document).into_relaxed_extjson()
}

/// Classifies a driver error, naming the collection on duplicate keys.
fn driver_error(collection: &str, err: mongodb::error::Error) -> StorageError {
    match StorageError::from(err) {
        StorageError::Backend(BackendError::DuplicateKey { .. }) => {
            StorageError::Backend(BackendError::DuplicateKey {
                collection: collection.to_string(),
            })
        }
        other => other,
    }
}

fn as_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> StorageResult<Vec<Value>> {
        let stages = pipeline
            .iter()
            .map(to_document)
            .collect::<StorageResult<Vec<_>>>()?;
        let cursor = self
            .collection(collection)
            .aggregate(stages)
            .await
            .map_err(|e| driver_error(collection, e))?;
        let documents: Vec<Document> = cursor
            .try_collect()
            .await
            .map_err(|e| driver_error(collection, e))?;
        Ok(documents.into_iter().map(to_value).collect())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        options: &FindOptions,
    ) -> StorageResult<Vec<Value>> {
        let mut find = self
            .collection(collection)
            .find(to_document(filter)?)
            .skip(options.skip);
        if let Some(sort) = &options.sort {
            find = find.sort(to_document(sort)?);
        }
        if let Some(limit) = options.limit {
            find = find.limit(as_i64(limit));
        }
        if let Some(projection) = &options.projection {
            find = find.projection(to_document(projection)?);
        }
        let cursor = find.await.map_err(|e| driver_error(collection, e))?;
        let documents: Vec<Document> = cursor
            .try_collect()
            .await
            .map_err(|e| driver_error(collection, e))?;
        Ok(documents.into_iter().map(to_value).collect())
    }

    async fn insert_one(&self, collection: &str, document: Value) -> StorageResult<()> {
        self.collection(collection)
            .insert_one(to_document(&document)?)
            .await
            .map_err(|e| driver_error(collection, e))?;
        Ok(())
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> StorageResult<()> {
        let documents = documents
            .iter()
            .map(to_document)
            .collect::<StorageResult<Vec<_>>>()?;
        self.collection(collection)
            .insert_many(documents)
            .ordered(true)
            .await
            .map_err(|e| driver_error(collection, e))?;
        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> StorageResult<UpdateResult> {
        let result = self
            .collection(collection)
            .update_one(to_document(filter)?, to_document(update)?)
            .await
            .map_err(|e| driver_error(collection, e))?;
        Ok(UpdateResult {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &Value,
        replacement: Value,
    ) -> StorageResult<UpdateResult> {
        let result = self
            .collection(collection)
            .replace_one(to_document(filter)?, to_document(&replacement)?)
            .await
            .map_err(|e| driver_error(collection, e))?;
        Ok(UpdateResult {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn delete_one(&self, collection: &str, filter: &Value) -> StorageResult<u64> {
        let result = self
            .collection(collection)
            .delete_one(to_document(filter)?)
            .await
            .map_err(|e| driver_error(collection, e))?;
        Ok(result.deleted_count)
    }

    async fn delete_many(&self, collection: &str, filter: &Value) -> StorageResult<u64> {
        let result = self
            .collection(collection)
            .delete_many(to_document(filter)?)
            .await
            .map_err(|e| driver_error(collection, e))?;
        Ok(result.deleted_count)
    }

    async fn count_documents(&self, collection: &str, filter: &Value) -> StorageResult<u64> {
        self.collection(collection)
            .count_documents(to_document(filter)?)
            .await
            .map_err(|e| driver_error(collection, e))
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> StorageResult<()> {
        if ops.is_empty() {
            return Err(TransactionError::EmptyBatch.into());
        }
        let count = ops.len();
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;

        for op in ops {
            if let Err(e) = self.apply(&mut session, op).await {
                if let Err(abort) = session.abort_transaction().await {
                    tracing::error!(error = %abort, "failed to abort transaction");
                }
                tracing::warn!(
                    backend = BACKEND_NAME,
                    ops = count,
                    error = %e,
                    "transaction rolled back"
                );
                return Err(e);
            }
        }

        session.commit_transaction().await.map_err(|e| {
            StorageError::Transaction(TransactionError::RolledBack {
                reason: e.to_string(),
            })
        })?;
        tracing::debug!(backend = BACKEND_NAME, ops = count, "transaction committed");
        Ok(())
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StorageResult<()> {
        let mut keys = Document::new();
        for key in &index.keys {
            keys.insert(key.path.clone(), i32::from(key.direction.as_i8()));
        }
        let options = IndexOptions::builder()
            .name(index.name.clone())
            .unique(index.unique)
            .sparse(index.sparse)
            .build();
        let model = IndexModel::builder().keys(keys).options(options).build();

        self.collection(collection)
            .create_index(model)
            .await
            .map_err(|e| driver_error(collection, e))?;
        tracing::debug!(collection, index = %index.name, "index created");
        Ok(())
    }
}
