//! Per-entity repository trait.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StorageResult;
use crate::tenant::TenantContext;
use crate::types::{Entity, Search, SearchAggregation, SearchResultOptions};

/// The operations available for one entity type.
///
/// Every operation takes a [`TenantContext`]; searches and writes are
/// restricted to what the authenticated caller may see.
///
/// # Example
///
/// ```ignore
/// use arena_persistence::core::Repository;
///
/// async fn recent<R: Repository<MatchRecord>>(
///     repo: &R,
///     ctx: &TenantContext,
/// ) -> StorageResult<Vec<MatchRecord>> {
///     let search = repo
///         .compile(ctx, vec![], SearchResultOptions::new(0, 20))
///         .await?
///         .with_sort(SortableField::desc("PlayedAt"));
///     repo.search(ctx, &search).await
/// }
/// ```
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Runs a search and decodes every result.
    ///
    /// # Errors
    ///
    /// * `StorageError::Schema` / `StorageError::Search` - if the search does not compile
    /// * `StorageError::Tenancy` - if the search's scope does not fit the caller
    /// * `BackendError::SerializationError` - if any result fails to decode
    async fn search(&self, ctx: &TenantContext, search: &Search) -> StorageResult<Vec<T>>;

    /// Looks a record up by primary key.
    ///
    /// No tenancy predicates are applied. Route through
    /// [`search`](Self::search) with [`Search::by_id`] for a scoped lookup.
    async fn get_by_id(&self, ctx: &TenantContext, id: Uuid) -> StorageResult<Option<T>>;

    /// Stores a new record owned by the caller.
    async fn create(&self, ctx: &TenantContext, entity: T) -> StorageResult<T>;

    /// Stores several new records owned by the caller.
    async fn create_many(&self, ctx: &TenantContext, entities: Vec<T>) -> StorageResult<Vec<T>>;

    /// Replaces a record the caller owns. The stored owner is kept.
    ///
    /// # Errors
    ///
    /// * `ResourceError::NotFound` - if no record with that id is visible to the caller
    async fn update(&self, ctx: &TenantContext, entity: T) -> StorageResult<T>;

    /// Deletes a record the caller owns.
    ///
    /// # Errors
    ///
    /// * `ResourceError::NotFound` - if no record with that id is visible to the caller
    async fn delete(&self, ctx: &TenantContext, id: Uuid) -> StorageResult<()>;

    /// Counts the records a search matches, ignoring pagination.
    async fn count(&self, ctx: &TenantContext, search: &Search) -> StorageResult<u64>;

    /// Validates search parameters and returns an executable search.
    async fn compile(
        &self,
        ctx: &TenantContext,
        params: Vec<SearchAggregation>,
        options: SearchResultOptions,
    ) -> StorageResult<Search>;
}
