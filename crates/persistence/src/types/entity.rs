//! Persisted entity types.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tenant::ResourceOwner;

/// A record persisted through a [`DocumentRepository`](crate::repository::DocumentRepository).
///
/// Entities are plain serde types. Their primary key must serialize under
/// `_id` and their owner under
/// [`RESOURCE_OWNER_PATH`](crate::tenant::RESOURCE_OWNER_PATH); composing
/// [`BaseEntity`] with `#[serde(flatten)]` satisfies both.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The primary key.
    fn id(&self) -> Uuid;

    /// The current owner of the record.
    fn resource_owner(&self) -> &ResourceOwner;

    /// Replaces the owner. Called by the repository on every write.
    fn set_resource_owner(&mut self, owner: ResourceOwner);

    /// Key guarding against duplicate submissions, if the entity has one.
    ///
    /// The key field must be left out of the stored document when there is
    /// no key (`#[serde(skip_serializing_if = "Option::is_none")]`). The
    /// unique index treats an explicit `null` as a value, so a second
    /// keyless record would be rejected as a duplicate.
    fn idempotency_key(&self) -> Option<&str> {
        None
    }

    /// Records a modification time. Called by the repository on update.
    fn touch(&mut self, _now: DateTime<Utc>) {}
}

/// Common persisted fields of an entity.
///
/// ```
/// use arena_persistence::types::BaseEntity;
/// use arena_persistence::tenant::ResourceOwner;
/// use uuid::Uuid;
///
/// let base = BaseEntity::new(ResourceOwner::tenant(Uuid::new_v4()));
/// let json = serde_json::to_value(&base).unwrap();
/// assert!(json.get("_id").is_some());
/// assert!(json.get("resource_owner").is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseEntity {
    /// The primary key.
    #[serde(rename = "_id")]
    pub id: Uuid,
    /// The owner of the record.
    pub resource_owner: ResourceOwner,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last modified.
    pub updated_at: DateTime<Utc>,
}

impl BaseEntity {
    /// Creates base fields with a fresh id and the current time.
    pub fn new(resource_owner: ResourceOwner) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            resource_owner,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for BaseEntity {
    fn default() -> Self {
        Self::new(ResourceOwner::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_entity_wire_names() {
        let tenant = Uuid::new_v4();
        let base = BaseEntity::new(ResourceOwner::tenant(tenant));
        let json = serde_json::to_value(&base).unwrap();
        assert_eq!(json["_id"], serde_json::json!(base.id));
        assert_eq!(json["resource_owner"]["tenant_id"], serde_json::json!(tenant));

        let back: BaseEntity = serde_json::from_value(json).unwrap();
        assert_eq!(back, base);
    }

    #[test]
    fn test_default_has_nil_tenant() {
        assert!(BaseEntity::default().resource_owner.is_missing_tenant());
    }
}
