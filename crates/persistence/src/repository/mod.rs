//! Generic document repository.
//!
//! [`DocumentRepository`] implements [`Repository`] for any [`Entity`] on
//! top of any [`DocumentStore`]. One instance per entity type is built at
//! startup from a [`FieldAccessSchema`] and shared by all requests.
//!
//! Every search goes through the same steps: compile against the schema,
//! wrap with tenancy predicates, execute, decode. Every write derives the
//! record owner from the [`TenantContext`], never from the record itself.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::config::RepositoryConfig;
use crate::core::{DocumentStore, FindOptions, Repository, WriteOp};
use crate::error::{
    ResourceError, SchemaError, StorageError, StorageResult, TransactionError,
};
use crate::query::{Pipeline, QueryCompiler};
use crate::schema::{FieldAccessSchema, ID_PATH};
use crate::tenant::{RESOURCE_OWNER_PATH, ResourceOwner, TenancyGuard, TenantContext};
use crate::types::{Entity, Search, SearchAggregation, SearchResultOptions};

/// Outcome of [`DocumentRepository::create_idempotent`].
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotentCreate<T> {
    /// The record was inserted by this call.
    Created(T),
    /// A record with the same idempotency key already existed; this is it.
    AlreadyExists(T),
}

impl<T> IdempotentCreate<T> {
    /// Returns the stored record either way.
    pub fn into_inner(self) -> T {
        match self {
            IdempotentCreate::Created(t) | IdempotentCreate::AlreadyExists(t) => t,
        }
    }

    /// Returns `true` if this call inserted the record.
    pub fn is_created(&self) -> bool {
        matches!(self, IdempotentCreate::Created(_))
    }
}

/// A [`Repository`] over a [`DocumentStore`].
///
/// ```
/// use std::sync::Arc;
/// use arena_persistence::backends::memory::MemoryStore;
/// use arena_persistence::config::RepositoryConfig;
/// use arena_persistence::repository::DocumentRepository;
/// use arena_persistence::schema::{FieldAccessSchema, FieldDef};
/// use arena_persistence::tenant::ResourceOwner;
/// use arena_persistence::types::{BaseEntity, Entity};
/// use serde::{Deserialize, Serialize};
/// use uuid::Uuid;
///
/// #[derive(Serialize, Deserialize)]
/// struct Wallet {
///     #[serde(flatten)]
///     base: BaseEntity,
///     currency: String,
/// }
///
/// impl Entity for Wallet {
///     fn id(&self) -> Uuid { self.base.id }
///     fn resource_owner(&self) -> &ResourceOwner { &self.base.resource_owner }
///     fn set_resource_owner(&mut self, owner: ResourceOwner) { self.base.resource_owner = owner; }
/// }
///
/// let schema = FieldAccessSchema::builder("Wallet", "wallets")
///     .field(FieldDef::scalar("Currency", "currency"))
///     .queryable(["Currency"])
///     .build()
///     .unwrap();
///
/// let repo: DocumentRepository<Wallet, MemoryStore> = DocumentRepository::new(
///     Arc::new(MemoryStore::new()),
///     Arc::new(schema),
///     RepositoryConfig::default(),
/// )
/// .unwrap();
/// assert_eq!(repo.schema().collection(), "wallets");
/// ```
pub struct DocumentRepository<T, S> {
    store: Arc<S>,
    schema: Arc<FieldAccessSchema>,
    compiler: QueryCompiler,
    config: RepositoryConfig,
    _entity: PhantomData<fn() -> T>,
}

impl<T, S> std::fmt::Debug for DocumentRepository<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRepository")
            .field("entity_type", &self.schema.entity_type())
            .field("collection", &self.schema.collection())
            .field("config", &self.config)
            .finish()
    }
}

impl<T, S> DocumentRepository<T, S>
where
    T: Entity,
    S: DocumentStore,
{
    /// Creates a repository.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Config` if the configuration is invalid.
    pub fn new(
        store: Arc<S>,
        schema: Arc<FieldAccessSchema>,
        config: RepositoryConfig,
    ) -> StorageResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            schema,
            compiler: QueryCompiler::new(config.clone()),
            config,
            _entity: PhantomData,
        })
    }

    /// Returns the field access schema.
    pub fn schema(&self) -> &FieldAccessSchema {
        &self.schema
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    fn collection(&self) -> &str {
        self.schema.collection()
    }

    /// Runs a store call under the request's cancellation and deadline,
    /// tightened by the configured query timeout.
    async fn call<F, R>(&self, ctx: &TenantContext, fut: F) -> StorageResult<R>
    where
        F: Future<Output = StorageResult<R>> + Send,
        R: Send,
    {
        let result = match self.config.query_timeout {
            Some(timeout) => ctx.clone().with_timeout(timeout).run(fut).await,
            None => ctx.run(fut).await,
        };
        if let Err(e @ StorageError::Backend(_)) = &result {
            tracing::error!(
                backend = self.store.backend_name(),
                collection = self.collection(),
                correlation_id = ctx.correlation_id().unwrap_or_default(),
                error = %e,
                "store call failed"
            );
        }
        result
    }

    /// Compiles a search and applies tenancy, without executing it.
    ///
    /// The returned pipeline is exactly what [`search`](Repository::search)
    /// would send to the store.
    pub fn explain(&self, ctx: &TenantContext, search: &Search) -> StorageResult<Pipeline> {
        let pipeline = self.compiler.compile(search, &self.schema)?;
        let pipeline = TenancyGuard::enforce_pipeline(pipeline, search, ctx)?;
        tracing::info!(
            entity_type = self.schema.entity_type(),
            correlation_id = ctx.correlation_id().unwrap_or_default(),
            pipeline = %serde_json::to_string(&pipeline).unwrap_or_default(),
            "search plan"
        );
        Ok(pipeline)
    }

    /// Inserts records in one store transaction: all or none are stored.
    ///
    /// # Errors
    ///
    /// * `TransactionError::EmptyBatch` - if `entities` is empty
    /// * the first failing write's error; nothing is stored
    pub async fn create_many_atomic(
        &self,
        ctx: &TenantContext,
        entities: Vec<T>,
    ) -> StorageResult<Vec<T>> {
        if entities.is_empty() {
            return Err(TransactionError::EmptyBatch.into());
        }
        let owner = ctx.resource_owner()?;
        let (entities, documents) = self.owned_documents(entities, owner)?;
        let ops = documents
            .into_iter()
            .map(|document| WriteOp::Insert {
                collection: self.collection().to_string(),
                document,
            })
            .collect();

        self.call(ctx, self.store.transaction(ops)).await?;
        tracing::debug!(
            collection = self.collection(),
            count = entities.len(),
            "atomic batch stored"
        );
        Ok(entities)
    }

    /// Inserts a record guarded by its idempotency key.
    ///
    /// When two calls race with the same key, exactly one insert succeeds.
    /// The other finds the winner and returns it as
    /// [`IdempotentCreate::AlreadyExists`]. Records without a key are
    /// inserted plainly.
    ///
    /// # Errors
    ///
    /// * `SchemaError::InvalidMapping` - if the record has a key but the
    ///   schema declares no idempotency key field
    /// * `ResourceError::AlreadyExists` - if the key is taken by a record
    ///   the caller's tenant does not own
    pub async fn create_idempotent(
        &self,
        ctx: &TenantContext,
        entity: T,
    ) -> StorageResult<IdempotentCreate<T>> {
        let Some(key) = entity.idempotency_key().map(str::to_string) else {
            return self.create(ctx, entity).await.map(IdempotentCreate::Created);
        };
        let Some(path) = self.schema.idempotency_path() else {
            return Err(SchemaError::InvalidMapping {
                field: "idempotency_key".to_string(),
                message: format!("{} declares no idempotency key", self.schema.entity_type()),
            }
            .into());
        };

        match self.create(ctx, entity).await {
            Ok(created) => Ok(IdempotentCreate::Created(created)),
            Err(e) if e.is_duplicate_key() => {
                let owner = ctx.resource_owner()?;
                let mut filter = serde_json::Map::new();
                filter.insert(path.to_string(), json!(key));
                filter.insert(
                    format!("{RESOURCE_OWNER_PATH}.tenant_id"),
                    json!(owner.tenant_id),
                );
                let filter = Value::Object(filter);

                let existing = self
                    .call(
                        ctx,
                        self.store.find(
                            self.collection(),
                            &filter,
                            &FindOptions::default().with_limit(1),
                        ),
                    )
                    .await?;
                match existing.into_iter().next() {
                    Some(document) => {
                        tracing::info!(
                            collection = self.collection(),
                            correlation_id = ctx.correlation_id().unwrap_or_default(),
                            "idempotency key already used, returning stored record"
                        );
                        Ok(IdempotentCreate::AlreadyExists(decode(document)?))
                    }
                    None => Err(ResourceError::AlreadyExists {
                        entity_type: self.schema.entity_type().to_string(),
                        key: "idempotency_key".to_string(),
                    }
                    .into()),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Creates the indexes the schema declares.
    pub async fn ensure_indexes(&self) -> StorageResult<()> {
        for index in self.schema.indexes() {
            self.store.create_index(self.collection(), index).await?;
            tracing::info!(
                collection = self.collection(),
                index = %index.name,
                "index ensured"
            );
        }
        Ok(())
    }

    fn owned_documents(
        &self,
        entities: Vec<T>,
        owner: ResourceOwner,
    ) -> StorageResult<(Vec<T>, Vec<Value>)> {
        let mut owned = Vec::with_capacity(entities.len());
        let mut documents = Vec::with_capacity(entities.len());
        for mut entity in entities {
            entity.set_resource_owner(owner);
            documents.push(serde_json::to_value(&entity)?);
            owned.push(entity);
        }
        Ok((owned, documents))
    }

    /// `{_id: id}` restricted by the caller's ownership scope.
    fn owned_by_caller(&self, ctx: &TenantContext, id: Uuid) -> StorageResult<Value> {
        let ownership = TenancyGuard::ownership_filter(ctx, self.config.default_audience)?;
        Ok(json!({ "$and": [id_filter(id), ownership] }))
    }

    fn not_found(&self, id: Uuid) -> StorageError {
        ResourceError::NotFound {
            entity_type: self.schema.entity_type().to_string(),
            id: id.to_string(),
        }
        .into()
    }
}

#[async_trait]
impl<T, S> Repository<T> for DocumentRepository<T, S>
where
    T: Entity,
    S: DocumentStore,
{
    async fn search(&self, ctx: &TenantContext, search: &Search) -> StorageResult<Vec<T>> {
        let pipeline = self.explain(ctx, search)?;
        let stages = pipeline.to_documents();
        let documents = self
            .call(ctx, self.store.aggregate(self.collection(), &stages))
            .await?;

        let results = documents
            .into_iter()
            .map(decode)
            .collect::<StorageResult<Vec<T>>>()
            .inspect_err(|e| {
                tracing::error!(
                    collection = self.collection(),
                    error = %e,
                    "search result failed to decode"
                );
            })?;

        tracing::debug!(
            collection = self.collection(),
            results = results.len(),
            "search completed"
        );
        Ok(results)
    }

    async fn get_by_id(&self, ctx: &TenantContext, id: Uuid) -> StorageResult<Option<T>> {
        let filter = id_filter(id);
        let documents = self
            .call(
                ctx,
                self.store.find(
                    self.collection(),
                    &filter,
                    &FindOptions::default().with_limit(1),
                ),
            )
            .await?;
        documents.into_iter().next().map(decode).transpose()
    }

    async fn create(&self, ctx: &TenantContext, mut entity: T) -> StorageResult<T> {
        entity.set_resource_owner(ctx.resource_owner()?);
        let document = serde_json::to_value(&entity)?;
        self.call(ctx, self.store.insert_one(self.collection(), document))
            .await?;
        tracing::debug!(
            collection = self.collection(),
            id = %entity.id(),
            "record created"
        );
        Ok(entity)
    }

    async fn create_many(&self, ctx: &TenantContext, entities: Vec<T>) -> StorageResult<Vec<T>> {
        if entities.is_empty() {
            return Ok(entities);
        }
        let owner = ctx.resource_owner()?;
        let (entities, documents) = self.owned_documents(entities, owner)?;
        self.call(ctx, self.store.insert_many(self.collection(), documents))
            .await?;
        tracing::debug!(
            collection = self.collection(),
            count = entities.len(),
            "records created"
        );
        Ok(entities)
    }

    async fn update(&self, ctx: &TenantContext, mut entity: T) -> StorageResult<T> {
        let id = entity.id();
        let filter = self.owned_by_caller(ctx, id)?;

        let stored = self
            .call(
                ctx,
                self.store.find(
                    self.collection(),
                    &filter,
                    &FindOptions::default().with_limit(1),
                ),
            )
            .await?;
        let Some(stored) = stored.into_iter().next() else {
            return Err(self.not_found(id));
        };
        let owner: ResourceOwner = stored
            .get(RESOURCE_OWNER_PATH)
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| ResourceError::MissingTenant {
                entity_type: self.schema.entity_type().to_string(),
            })?;

        entity.set_resource_owner(owner);
        entity.touch(Utc::now());
        let document = serde_json::to_value(&entity)?;

        let result = self
            .call(ctx, self.store.replace_one(self.collection(), &filter, document))
            .await?;
        if result.matched == 0 {
            return Err(self.not_found(id));
        }
        tracing::debug!(collection = self.collection(), id = %id, "record updated");
        Ok(entity)
    }

    async fn delete(&self, ctx: &TenantContext, id: Uuid) -> StorageResult<()> {
        let filter = self.owned_by_caller(ctx, id)?;
        let deleted = self
            .call(ctx, self.store.delete_one(self.collection(), &filter))
            .await?;
        if deleted == 0 {
            return Err(self.not_found(id));
        }
        tracing::debug!(collection = self.collection(), id = %id, "record deleted");
        Ok(())
    }

    async fn count(&self, ctx: &TenantContext, search: &Search) -> StorageResult<u64> {
        let compiled = self.compiler.compile_match(&search.search_params, &self.schema)?;
        let filter = TenancyGuard::enforce(compiled, search, ctx)?;
        self.call(ctx, self.store.count_documents(self.collection(), &filter))
            .await
    }

    async fn compile(
        &self,
        ctx: &TenantContext,
        params: Vec<SearchAggregation>,
        mut options: SearchResultOptions,
    ) -> StorageResult<Search> {
        if options.limit == 0 {
            options.limit = self.config.default_page_size;
        }
        let search = Search::by_aggregation(ctx, params, options, self.config.default_audience);
        self.compiler.validate_search(&search, &self.schema)?;
        Ok(search)
    }
}

fn id_filter(id: Uuid) -> Value {
    crate::query::stage_document(ID_PATH, json!(id))
}

fn decode<T: Entity>(document: Value) -> StorageResult<T> {
    serde_json::from_value(document).map_err(StorageError::from)
}
