//! Tenancy enforcement.
//!
//! Every compiled `$match` filter passes through [`TenancyGuard::enforce`]
//! before it reaches a store. The guard derives the isolation predicates
//! from the authenticated identity in the [`TenantContext`] and the
//! audience the search declares, and ANDs them with the caller's filter.
//! Any inconsistency aborts the operation.

use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use super::context::TenantContext;
use super::owner::{IntendedAudience, RESOURCE_OWNER_PATH, ResourceOwner};
use crate::error::TenancyError;
use crate::query::Pipeline;
use crate::types::Search;

/// Applies tenant and audience isolation to filters.
///
/// The resulting filter always has the shape
/// `{"$and": [tenant term, audience term, caller filter]}`, with the caller
/// filter left out when it is empty. Caller predicates are nested inside
/// the AND and can never widen the isolation terms.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenancyGuard;

impl TenancyGuard {
    /// Wraps a compiled filter with the isolation predicates for `search`.
    ///
    /// # Errors
    ///
    /// Returns the [`TenancyError`] variant naming the level that failed:
    ///
    /// - `RequestSource` when the caller has no tenant or the search
    ///   declares a different one
    /// - `ApplicationLevel` when client ids are missing or differ
    /// - `GroupLevel` / `UserLevel` when the declared group or user is
    ///   missing or differs from the authenticated one
    /// - `Admin` for tenant-wide audiences
    /// - `Unknown` for unrecognized audiences
    pub fn enforce(
        compiled_match: Value,
        search: &Search,
        ctx: &TenantContext,
    ) -> Result<Value, TenancyError> {
        let terms = Self::scope_terms(search.request_source(), search.audience(), ctx)?;
        Ok(combine(terms, compiled_match))
    }

    /// Applies [`enforce`](Self::enforce) to the `$match` stage of a pipeline.
    pub fn enforce_pipeline(
        pipeline: Pipeline,
        search: &Search,
        ctx: &TenantContext,
    ) -> Result<Pipeline, TenancyError> {
        let compiled = pipeline.match_filter().cloned().unwrap_or_else(|| json!({}));
        let filter = Self::enforce(compiled, search, ctx)?;
        Ok(pipeline.with_match(filter))
    }

    /// Builds the isolation filter for write paths.
    ///
    /// The declared scope is taken from the authenticated identity itself,
    /// so the filter only matches records the caller could see through a
    /// search with the same audience.
    pub fn ownership_filter(
        ctx: &TenantContext,
        audience: IntendedAudience,
    ) -> Result<Value, TenancyError> {
        let declared = ctx.request_source();
        let terms = Self::scope_terms(&declared, audience, ctx)?;
        Ok(combine(terms, json!({})))
    }

    fn scope_terms(
        declared: &ResourceOwner,
        audience: IntendedAudience,
        ctx: &TenantContext,
    ) -> Result<Vec<Value>, TenancyError> {
        let identity = ctx.identity();

        let Some(tenant_id) = identity.tenant() else {
            return Err(reject(
                TenancyError::RequestSource {
                    reason: "valid tenant_id is required in the request context",
                },
                ctx,
            ));
        };
        if declared.is_missing_tenant() {
            return Err(reject(
                TenancyError::RequestSource {
                    reason: "tenant_id is required in the search",
                },
                ctx,
            ));
        }
        if declared.tenant_id != tenant_id {
            return Err(reject(
                TenancyError::RequestSource {
                    reason: "tenant_id in the request context does not match the search",
                },
                ctx,
            ));
        }

        let mut terms = vec![owner_term("tenant_id", tenant_id)];

        match audience {
            IntendedAudience::ClientApplication => {
                let Some(client_id) = identity.client() else {
                    return Err(reject(
                        TenancyError::ApplicationLevel {
                            reason: "valid client_id is required in the request context",
                        },
                        ctx,
                    ));
                };
                match declared.client() {
                    None => {
                        return Err(reject(
                            TenancyError::ApplicationLevel {
                                reason: "client_id is required in the search",
                            },
                            ctx,
                        ));
                    }
                    Some(declared) if declared != client_id => {
                        return Err(reject(
                            TenancyError::ApplicationLevel {
                                reason: "client_id in the request context does not match the search",
                            },
                            ctx,
                        ));
                    }
                    Some(_) => {}
                }
                terms.push(owner_term("client_id", client_id));
            }
            IntendedAudience::Group | IntendedAudience::User => {
                let group = checked_group(declared, ctx)?;
                let user = checked_user(declared, ctx)?;

                let alternatives = match audience {
                    IntendedAudience::Group => {
                        let Some(group) = group else {
                            return Err(reject(
                                TenancyError::GroupLevel {
                                    reason: "group_id is required in the search for a group audience",
                                },
                                ctx,
                            ));
                        };
                        let mut alternatives = vec![owner_term("group_id", group)];
                        alternatives.extend(user.map(|u| owner_term("user_id", u)));
                        alternatives
                    }
                    _ => {
                        let Some(user) = user else {
                            return Err(reject(
                                TenancyError::UserLevel {
                                    reason: "user_id is required in the search for a user audience",
                                },
                                ctx,
                            ));
                        };
                        let mut alternatives = vec![owner_term("user_id", user)];
                        alternatives.extend(group.map(|g| owner_term("group_id", g)));
                        alternatives
                    }
                };

                terms.push(any_of(alternatives));
            }
            IntendedAudience::Tenant => {
                return Err(reject(TenancyError::Admin, ctx));
            }
            IntendedAudience::Unknown => {
                return Err(reject(TenancyError::Unknown, ctx));
            }
        }

        info!(
            audience = %audience,
            terms = terms.len(),
            correlation_id = ctx.correlation_id().unwrap_or_default(),
            "tenancy scope applied"
        );
        Ok(terms)
    }
}

/// A declared group must be the caller's own group.
fn checked_group(
    declared: &ResourceOwner,
    ctx: &TenantContext,
) -> Result<Option<Uuid>, TenancyError> {
    match declared.group() {
        Some(group) if ctx.identity().group() != Some(group) => Err(reject(
            TenancyError::GroupLevel {
                reason: "group_id in the request context does not match the search",
            },
            ctx,
        )),
        group => Ok(group),
    }
}

/// A declared user must be the caller.
fn checked_user(
    declared: &ResourceOwner,
    ctx: &TenantContext,
) -> Result<Option<Uuid>, TenancyError> {
    match declared.user() {
        Some(user) if ctx.identity().user() != Some(user) => Err(reject(
            TenancyError::UserLevel {
                reason: "user_id in the request context does not match the search",
            },
            ctx,
        )),
        user => Ok(user),
    }
}

fn owner_term(level: &str, id: Uuid) -> Value {
    crate::query::stage_document(format!("{RESOURCE_OWNER_PATH}.{level}"), json!(id))
}

fn any_of(mut alternatives: Vec<Value>) -> Value {
    if alternatives.len() == 1 {
        alternatives.remove(0)
    } else {
        json!({ "$or": alternatives })
    }
}

fn combine(mut terms: Vec<Value>, compiled_match: Value) -> Value {
    let empty =
        compiled_match.as_object().is_some_and(|m| m.is_empty()) || compiled_match.is_null();
    if !empty {
        terms.push(compiled_match);
    }
    json!({ "$and": terms })
}

fn reject(err: TenancyError, ctx: &TenantContext) -> TenancyError {
    warn!(
        error = %err,
        correlation_id = ctx.correlation_id().unwrap_or_default(),
        "tenancy check rejected the operation"
    );
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::CallerIdentity;
    use crate::types::SearchVisibilityOptions;

    struct Ids {
        tenant: Uuid,
        client: Uuid,
        group: Uuid,
        user: Uuid,
    }

    fn ids() -> Ids {
        Ids {
            tenant: Uuid::new_v4(),
            client: Uuid::new_v4(),
            group: Uuid::new_v4(),
            user: Uuid::new_v4(),
        }
    }

    fn full_ctx(ids: &Ids) -> TenantContext {
        TenantContext::new(CallerIdentity {
            tenant_id: Some(ids.tenant),
            client_id: Some(ids.client),
            group_id: Some(ids.group),
            user_id: Some(ids.user),
        })
    }

    fn declared(search: Search, owner: ResourceOwner, audience: IntendedAudience) -> Search {
        search.with_visibility(SearchVisibilityOptions {
            request_source: owner,
            intended_audience: audience,
        })
    }

    #[test]
    fn test_user_audience_scope() {
        let ids = ids();
        let ctx = TenantContext::builder()
            .tenant_id(ids.tenant)
            .user_id(ids.user)
            .build()
            .unwrap();
        let search = Search::new(&ctx, IntendedAudience::User);

        let compiled = json!({ "$and": [{ "game_id": { "$eq": "CS2" } }] });
        let filter = TenancyGuard::enforce(compiled, &search, &ctx).unwrap();
        assert_eq!(
            filter,
            json!({ "$and": [
                { "resource_owner.tenant_id": ids.tenant },
                { "resource_owner.user_id": ids.user },
                { "$and": [{ "game_id": { "$eq": "CS2" } }] }
            ]})
        );
    }

    #[test]
    fn test_user_audience_includes_group() {
        let ids = ids();
        let ctx = full_ctx(&ids);
        let search = Search::new(&ctx, IntendedAudience::User);
        let filter = TenancyGuard::enforce(json!({}), &search, &ctx).unwrap();
        assert_eq!(
            filter,
            json!({ "$and": [
                { "resource_owner.tenant_id": ids.tenant },
                { "$or": [
                    { "resource_owner.user_id": ids.user },
                    { "resource_owner.group_id": ids.group }
                ]}
            ]})
        );
    }

    #[test]
    fn test_group_audience_scope() {
        let ids = ids();
        let ctx = full_ctx(&ids);
        let search = Search::new(&ctx, IntendedAudience::Group);
        let filter = TenancyGuard::enforce(json!({}), &search, &ctx).unwrap();
        assert_eq!(
            filter["$and"][1],
            json!({ "$or": [
                { "resource_owner.group_id": ids.group },
                { "resource_owner.user_id": ids.user }
            ]})
        );
    }

    #[test]
    fn test_client_audience_scope() {
        let ids = ids();
        let ctx = full_ctx(&ids);
        let search = Search::new(&ctx, IntendedAudience::ClientApplication);
        let filter = TenancyGuard::enforce(json!({}), &search, &ctx).unwrap();
        assert_eq!(
            filter,
            json!({ "$and": [
                { "resource_owner.tenant_id": ids.tenant },
                { "resource_owner.client_id": ids.client }
            ]})
        );
    }

    #[test]
    fn test_caller_without_tenant() {
        let ids = ids();
        let ctx = TenantContext::new(CallerIdentity::default());
        let search = declared(
            Search::default(),
            ResourceOwner::tenant(ids.tenant).with_user(ids.user),
            IntendedAudience::User,
        );
        assert!(matches!(
            TenancyGuard::enforce(json!({}), &search, &ctx),
            Err(TenancyError::RequestSource { .. })
        ));
    }

    #[test]
    fn test_declared_tenant_mismatch() {
        let ids = ids();
        let ctx = full_ctx(&ids);
        let search = declared(
            Search::default(),
            ResourceOwner::tenant(Uuid::new_v4()).with_user(ids.user),
            IntendedAudience::User,
        );
        let err = TenancyGuard::enforce(json!({}), &search, &ctx).unwrap_err();
        assert!(matches!(err, TenancyError::RequestSource { .. }));
        assert!(!err.to_string().contains(&ids.tenant.to_string()));
    }

    #[test]
    fn test_deserialized_search_is_rejected() {
        let ids = ids();
        let ctx = full_ctx(&ids);
        let search: Search = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(
            TenancyGuard::enforce(json!({}), &search, &ctx),
            Err(TenancyError::RequestSource { .. })
        ));
    }

    #[test]
    fn test_client_audience_failures() {
        let ids = ids();
        let no_client = TenantContext::builder().tenant_id(ids.tenant).build().unwrap();
        let search = Search::new(&no_client, IntendedAudience::ClientApplication);
        assert!(matches!(
            TenancyGuard::enforce(json!({}), &search, &no_client),
            Err(TenancyError::ApplicationLevel { .. })
        ));

        let ctx = full_ctx(&ids);
        let search = declared(
            Search::default(),
            ResourceOwner::tenant(ids.tenant).with_client(Uuid::new_v4()),
            IntendedAudience::ClientApplication,
        );
        assert!(matches!(
            TenancyGuard::enforce(json!({}), &search, &ctx),
            Err(TenancyError::ApplicationLevel { .. })
        ));
    }

    #[test]
    fn test_group_and_user_requirements() {
        let ids = ids();
        let user_only = TenantContext::builder()
            .tenant_id(ids.tenant)
            .user_id(ids.user)
            .build()
            .unwrap();
        let search = Search::new(&user_only, IntendedAudience::Group);
        assert!(matches!(
            TenancyGuard::enforce(json!({}), &search, &user_only),
            Err(TenancyError::GroupLevel { .. })
        ));

        let tenant_only = TenantContext::builder().tenant_id(ids.tenant).build().unwrap();
        let search = Search::new(&tenant_only, IntendedAudience::User);
        assert!(matches!(
            TenancyGuard::enforce(json!({}), &search, &tenant_only),
            Err(TenancyError::UserLevel { .. })
        ));
    }

    #[test]
    fn test_declared_user_must_be_caller() {
        let ids = ids();
        let ctx = full_ctx(&ids);
        let search = declared(
            Search::default(),
            ResourceOwner::tenant(ids.tenant).with_user(Uuid::new_v4()),
            IntendedAudience::User,
        );
        assert!(matches!(
            TenancyGuard::enforce(json!({}), &search, &ctx),
            Err(TenancyError::UserLevel { .. })
        ));

        let search = declared(
            Search::default(),
            ResourceOwner::tenant(ids.tenant)
                .with_user(ids.user)
                .with_group(Uuid::new_v4()),
            IntendedAudience::User,
        );
        assert!(matches!(
            TenancyGuard::enforce(json!({}), &search, &ctx),
            Err(TenancyError::GroupLevel { .. })
        ));
    }

    #[test]
    fn test_tenant_and_unknown_audiences() {
        let ids = ids();
        let ctx = full_ctx(&ids);
        let search = Search::new(&ctx, IntendedAudience::Tenant);
        assert_eq!(
            TenancyGuard::enforce(json!({}), &search, &ctx),
            Err(TenancyError::Admin)
        );
        let search = Search::new(&ctx, IntendedAudience::Unknown);
        assert_eq!(
            TenancyGuard::enforce(json!({}), &search, &ctx),
            Err(TenancyError::Unknown)
        );
    }

    #[test]
    fn test_caller_or_cannot_escape_scope() {
        let ids = ids();
        let ctx = full_ctx(&ids);
        let search = Search::new(&ctx, IntendedAudience::User);
        let widening = json!({ "$or": [{ "resource_owner.tenant_id": Uuid::new_v4() }, {}] });
        let filter = TenancyGuard::enforce(widening.clone(), &search, &ctx).unwrap();
        let terms = filter["$and"].as_array().unwrap();
        assert_eq!(terms[0], json!({ "resource_owner.tenant_id": ids.tenant }));
        assert_eq!(terms.last().unwrap(), &widening);
    }

    #[test]
    fn test_ownership_filter() {
        let ids = ids();
        let ctx = TenantContext::builder()
            .tenant_id(ids.tenant)
            .user_id(ids.user)
            .build()
            .unwrap();
        let filter = TenancyGuard::ownership_filter(&ctx, IntendedAudience::User).unwrap();
        assert_eq!(
            filter,
            json!({ "$and": [
                { "resource_owner.tenant_id": ids.tenant },
                { "resource_owner.user_id": ids.user }
            ]})
        );
        assert!(TenancyGuard::ownership_filter(&ctx, IntendedAudience::Tenant).is_err());
    }
}
