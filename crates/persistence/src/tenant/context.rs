//! Request context for persistence operations.
//!
//! This module defines [`TenantContext`], which carries the authenticated
//! caller identity required by ALL repository operations, together with the
//! request's cancellation token and deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::owner::{non_nil, ResourceOwner};
use crate::error::{RequestError, StorageResult, TenancyError, ValidationError};

/// The authenticated identity of the caller.
///
/// Populated by upstream authentication before the persistence layer is
/// invoked. The persistence layer only reads these values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    /// The tenant the caller authenticated against.
    pub tenant_id: Option<Uuid>,
    /// The client application the request came through.
    pub client_id: Option<Uuid>,
    /// The group the caller belongs to.
    pub group_id: Option<Uuid>,
    /// The caller's user id.
    pub user_id: Option<Uuid>,
}

impl CallerIdentity {
    /// Returns the tenant unless it is absent or nil.
    pub fn tenant(&self) -> Option<Uuid> {
        non_nil(self.tenant_id)
    }

    /// Returns the client unless it is absent or nil.
    pub fn client(&self) -> Option<Uuid> {
        non_nil(self.client_id)
    }

    /// Returns the group unless it is absent or nil.
    pub fn group(&self) -> Option<Uuid> {
        non_nil(self.group_id)
    }

    /// Returns the user unless it is absent or nil.
    pub fn user(&self) -> Option<Uuid> {
        non_nil(self.user_id)
    }
}

/// A request-scoped context required for all repository operations.
///
/// `TenantContext` encapsulates the caller identity, providing a type-level
/// guarantee that every operation knows who is asking. It also carries the
/// request's cancellation token and deadline; every store call made on
/// behalf of the request goes through [`TenantContext::run`] and aborts as
/// soon as the caller gives up.
///
/// ```
/// use arena_persistence::tenant::TenantContext;
/// use uuid::Uuid;
///
/// let ctx = TenantContext::builder()
///     .tenant_id(Uuid::new_v4())
///     .user_id(Uuid::new_v4())
///     .build()
///     .unwrap();
/// assert!(ctx.resource_owner().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct TenantContext {
    identity: CallerIdentity,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    correlation_id: Option<String>,
}

impl TenantContext {
    /// Creates a context for the given identity with no deadline.
    pub fn new(identity: CallerIdentity) -> Self {
        Self {
            identity,
            cancellation: CancellationToken::new(),
            deadline: None,
            correlation_id: None,
        }
    }

    /// Returns a builder.
    pub fn builder() -> TenantContextBuilder {
        TenantContextBuilder::new()
    }

    /// Sets the correlation ID used in log records.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline relative to now. An earlier existing deadline wins.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Uses the given cancellation token instead of a private one.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Returns the caller identity.
    pub fn identity(&self) -> &CallerIdentity {
        &self.identity
    }

    /// Returns the correlation ID, if set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Returns the deadline, if set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the cancellation token of this request.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Cancels the request. In-flight and future store calls abort.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Returns `true` if the request was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Derives the [`ResourceOwner`] of records written by this caller.
    ///
    /// Ownership always comes from the authenticated identity, never from
    /// values supplied with the record.
    pub fn resource_owner(&self) -> Result<ResourceOwner, TenancyError> {
        let tenant_id = self.identity.tenant().ok_or(TenancyError::RequestSource {
            reason: "valid tenant_id is required in the request context",
        })?;
        Ok(ResourceOwner {
            tenant_id,
            client_id: self.identity.client(),
            group_id: self.identity.group(),
            user_id: self.identity.user(),
        })
    }

    /// Returns the identity as a declared request source.
    ///
    /// Unlike [`resource_owner`](Self::resource_owner) this never fails: a
    /// missing tenant becomes the nil id, which tenancy enforcement rejects.
    pub fn request_source(&self) -> ResourceOwner {
        ResourceOwner {
            tenant_id: self.identity.tenant().unwrap_or_default(),
            client_id: self.identity.client(),
            group_id: self.identity.group(),
            user_id: self.identity.user(),
        }
    }

    /// Runs a store future on behalf of this request.
    ///
    /// Returns [`RequestError::Cancelled`] if the request is cancelled first
    /// and [`RequestError::DeadlineExceeded`] if the deadline passes first.
    /// In both cases the store future is dropped.
    pub async fn run<F, T>(&self, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        if self.cancellation.is_cancelled() {
            return Err(RequestError::Cancelled.into());
        }

        match self.deadline {
            Some(deadline) => {
                if Instant::now() >= deadline {
                    return Err(RequestError::DeadlineExceeded.into());
                }
                tokio::select! {
                    _ = self.cancellation.cancelled() => Err(RequestError::Cancelled.into()),
                    res = tokio::time::timeout_at(deadline, fut) => match res {
                        Ok(res) => res,
                        Err(_) => Err(RequestError::DeadlineExceeded.into()),
                    },
                }
            }
            None => {
                tokio::select! {
                    _ = self.cancellation.cancelled() => Err(RequestError::Cancelled.into()),
                    res = fut => res,
                }
            }
        }
    }
}

/// Builder for creating tenant contexts with validation.
///
/// Useful when constructing contexts from external input such as token
/// claims. Nil ids are treated as absent.
#[derive(Debug, Default)]
pub struct TenantContextBuilder {
    identity: CallerIdentity,
    correlation_id: Option<String>,
    timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
}

impl TenantContextBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tenant ID.
    pub fn tenant_id(mut self, tenant_id: Uuid) -> Self {
        self.identity.tenant_id = Some(tenant_id);
        self
    }

    /// Sets the client application ID.
    pub fn client_id(mut self, client_id: Uuid) -> Self {
        self.identity.client_id = Some(client_id);
        self
    }

    /// Sets the group ID.
    pub fn group_id(mut self, group_id: Uuid) -> Self {
        self.identity.group_id = Some(group_id);
        self
    }

    /// Sets the user ID.
    pub fn user_id(mut self, user_id: Uuid) -> Self {
        self.identity.user_id = Some(user_id);
        self
    }

    /// Sets the correlation ID.
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets a timeout relative to the time `build` is called.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Uses an externally owned cancellation token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Builds the context, returning an error if no usable tenant is set.
    pub fn build(self) -> Result<TenantContext, ValidationError> {
        if self.identity.tenant().is_none() {
            return Err(ValidationError::MissingRequiredField {
                field: "tenant_id".to_string(),
            });
        }

        let mut ctx = TenantContext::new(self.identity);
        ctx.correlation_id = self.correlation_id;
        if let Some(token) = self.cancellation {
            ctx.cancellation = token;
        }
        if let Some(timeout) = self.timeout {
            ctx = ctx.with_timeout(timeout);
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    fn ctx() -> TenantContext {
        TenantContext::builder()
            .tenant_id(Uuid::new_v4())
            .user_id(Uuid::new_v4())
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_missing_tenant_id() {
        let result = TenantContext::builder().user_id(Uuid::new_v4()).build();
        assert!(result.is_err());

        let nil = TenantContext::builder().tenant_id(Uuid::nil()).build();
        assert!(nil.is_err());
    }

    #[test]
    fn test_resource_owner_from_identity() {
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();
        let ctx = TenantContext::builder()
            .tenant_id(tenant)
            .user_id(user)
            .group_id(Uuid::nil())
            .correlation_id("req-1")
            .build()
            .unwrap();

        let owner = ctx.resource_owner().unwrap();
        assert_eq!(owner.tenant_id, tenant);
        assert_eq!(owner.user_id, Some(user));
        assert_eq!(owner.group_id, None);
        assert_eq!(ctx.correlation_id(), Some("req-1"));
    }

    #[test]
    fn test_resource_owner_without_tenant() {
        let ctx = TenantContext::new(CallerIdentity::default());
        assert!(matches!(
            ctx.resource_owner(),
            Err(TenancyError::RequestSource { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_passes_result_through() {
        let value = ctx().run(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_after_cancel() {
        let ctx = ctx();
        ctx.cancel();
        let result: StorageResult<()> = ctx.run(async { Ok(()) }).await;
        assert!(matches!(
            result,
            Err(StorageError::Request(RequestError::Cancelled))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_exceeded() {
        let ctx = ctx().with_timeout(Duration::from_millis(50));
        let result: StorageResult<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(StorageError::Request(RequestError::DeadlineExceeded))
        ));
    }

    #[tokio::test]
    async fn test_cancel_while_in_flight() {
        let ctx = ctx();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let result: StorageResult<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(matches!(
            result,
            Err(StorageError::Request(RequestError::Cancelled))
        ));
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let ctx = ctx()
            .with_timeout(Duration::from_secs(1))
            .with_timeout(Duration::from_secs(60));
        let remaining = ctx.deadline().unwrap() - Instant::now();
        assert!(remaining <= Duration::from_secs(1));
    }
}
