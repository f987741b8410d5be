//! Test harness: caller identities, a call-counting store and repository
//! construction.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use arena_persistence::backends::memory::MemoryStore;
use arena_persistence::config::RepositoryConfig;
use arena_persistence::core::{DocumentStore, FindOptions, UpdateResult, WriteOp};
use arena_persistence::error::StorageResult;
use arena_persistence::repository::DocumentRepository;
use arena_persistence::schema::IndexSpec;
use arena_persistence::tenant::{ResourceOwner, TenantContext};

use super::fixtures::{MatchRecord, match_schema};

/// A [`MemoryStore`] that counts every call made to it.
#[derive(Debug, Default)]
pub struct CountingStore {
    inner: MemoryStore,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The wrapped store, for inspecting stored documents.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for CountingStore {
    fn backend_name(&self) -> &'static str {
        "counting-memory"
    }

    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> StorageResult<Vec<Value>> {
        self.hit();
        self.inner.aggregate(collection, pipeline).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        options: &FindOptions,
    ) -> StorageResult<Vec<Value>> {
        self.hit();
        self.inner.find(collection, filter, options).await
    }

    async fn insert_one(&self, collection: &str, document: Value) -> StorageResult<()> {
        self.hit();
        self.inner.insert_one(collection, document).await
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> StorageResult<()> {
        self.hit();
        self.inner.insert_many(collection, documents).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> StorageResult<UpdateResult> {
        self.hit();
        self.inner.update_one(collection, filter, update).await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &Value,
        replacement: Value,
    ) -> StorageResult<UpdateResult> {
        self.hit();
        self.inner.replace_one(collection, filter, replacement).await
    }

    async fn delete_one(&self, collection: &str, filter: &Value) -> StorageResult<u64> {
        self.hit();
        self.inner.delete_one(collection, filter).await
    }

    async fn delete_many(&self, collection: &str, filter: &Value) -> StorageResult<u64> {
        self.hit();
        self.inner.delete_many(collection, filter).await
    }

    async fn count_documents(&self, collection: &str, filter: &Value) -> StorageResult<u64> {
        self.hit();
        self.inner.count_documents(collection, filter).await
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> StorageResult<()> {
        self.hit();
        self.inner.transaction(ops).await
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StorageResult<()> {
        self.hit();
        self.inner.create_index(collection, index).await
    }
}

/// Repository under test.
pub type MatchRepository = DocumentRepository<MatchRecord, CountingStore>;

/// A repository over a fresh store with its indexes created.
pub async fn create_repository() -> (MatchRepository, Arc<CountingStore>) {
    create_repository_with(RepositoryConfig::default()).await
}

/// Like [`create_repository`] with a custom configuration.
pub async fn create_repository_with(
    config: RepositoryConfig,
) -> (MatchRepository, Arc<CountingStore>) {
    let store = Arc::new(CountingStore::new());
    let repo = DocumentRepository::new(store.clone(), Arc::new(match_schema()), config)
        .expect("repository config is valid");
    repo.ensure_indexes().await.expect("indexes are created");
    (repo, store)
}

/// An authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub tenant: Uuid,
    pub client: Uuid,
    pub group: Uuid,
    pub user: Uuid,
}

impl Caller {
    /// A caller with fresh identifiers at every level.
    pub fn new() -> Self {
        Self {
            tenant: Uuid::new_v4(),
            client: Uuid::new_v4(),
            group: Uuid::new_v4(),
            user: Uuid::new_v4(),
        }
    }

    /// Another user in the same tenant, client application and group.
    pub fn teammate(&self) -> Self {
        Self {
            user: Uuid::new_v4(),
            ..*self
        }
    }

    /// Another user in the same tenant and client application, outside the group.
    pub fn colleague(&self) -> Self {
        Self {
            group: Uuid::new_v4(),
            user: Uuid::new_v4(),
            ..*self
        }
    }

    /// The same user in a different tenant.
    pub fn in_other_tenant(&self) -> Self {
        Self {
            tenant: Uuid::new_v4(),
            ..*self
        }
    }

    /// Full context: tenant, client, group and user.
    pub fn ctx(&self) -> TenantContext {
        TenantContext::builder()
            .tenant_id(self.tenant)
            .client_id(self.client)
            .group_id(self.group)
            .user_id(self.user)
            .build()
            .expect("caller has a tenant")
    }

    /// Context carrying only tenant and user.
    pub fn user_ctx(&self) -> TenantContext {
        TenantContext::builder()
            .tenant_id(self.tenant)
            .user_id(self.user)
            .build()
            .expect("caller has a tenant")
    }

    /// The owner records created through [`ctx`](Self::ctx) receive.
    pub fn owner(&self) -> ResourceOwner {
        ResourceOwner::tenant(self.tenant)
            .with_client(self.client)
            .with_group(self.group)
            .with_user(self.user)
    }
}

impl Default for Caller {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs a test subscriber once; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
