//! Record ownership and search audiences.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Document path under which every entity stores its [`ResourceOwner`].
pub const RESOURCE_OWNER_PATH: &str = "resource_owner";

/// Identifies who owns a record.
///
/// Every persisted entity carries one. `tenant_id` is always set for a
/// persisted record; the remaining levels are optional and narrow ownership
/// down to a client application, a group, or a single user.
///
/// The default value has a nil tenant and is never accepted by tenancy
/// enforcement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceOwner {
    /// The tenant the record belongs to.
    pub tenant_id: Uuid,
    /// The client application associated with the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Uuid>,
    /// The group the record is shared with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    /// The end user who owns the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

impl ResourceOwner {
    /// Creates an owner scoped to a tenant only.
    pub fn tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            client_id: None,
            group_id: None,
            user_id: None,
        }
    }

    /// Sets the client application.
    pub fn with_client(mut self, client_id: Uuid) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Sets the group.
    pub fn with_group(mut self, group_id: Uuid) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Sets the user.
    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Returns `true` if no usable tenant is set.
    pub fn is_missing_tenant(&self) -> bool {
        self.tenant_id.is_nil()
    }

    /// Returns the client id unless it is absent or nil.
    pub fn client(&self) -> Option<Uuid> {
        non_nil(self.client_id)
    }

    /// Returns the group id unless it is absent or nil.
    pub fn group(&self) -> Option<Uuid> {
        non_nil(self.group_id)
    }

    /// Returns the user id unless it is absent or nil.
    pub fn user(&self) -> Option<Uuid> {
        non_nil(self.user_id)
    }

    /// Owned by the tenant itself, with no narrower level.
    pub fn is_tenant(&self) -> bool {
        !self.is_missing_tenant()
            && self.client().is_none()
            && self.group().is_none()
            && self.user().is_none()
    }

    /// Owned by a client application.
    pub fn is_client(&self) -> bool {
        !self.is_missing_tenant()
            && self.client().is_some()
            && self.group().is_none()
            && self.user().is_none()
    }

    /// Owned by a group rather than an individual user.
    pub fn is_group(&self) -> bool {
        !self.is_missing_tenant() && self.group().is_some() && self.user().is_none()
    }

    /// Owned by an individual user.
    pub fn is_user(&self) -> bool {
        !self.is_missing_tenant() && self.user().is_some()
    }
}

pub(crate) fn non_nil(id: Option<Uuid>) -> Option<Uuid> {
    id.filter(|id| !id.is_nil())
}

/// The scope at which a search is intended to run.
///
/// The audience decides which [`ResourceOwner`] levels become mandatory
/// match predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum IntendedAudience {
    /// Every record of the tenant. Never served by the search compiler.
    #[serde(rename = "TenantAudience")]
    Tenant,
    /// Records of one client application.
    #[serde(rename = "ClientAudience")]
    ClientApplication,
    /// Records of a group, plus the caller's own records.
    #[serde(rename = "GroupAudience")]
    Group,
    /// The caller's own records, plus records shared with the caller's group.
    #[default]
    #[serde(rename = "UserAudience")]
    User,
    /// Any unrecognized audience value.
    #[serde(other)]
    Unknown,
}

impl IntendedAudience {
    /// Returns the wire name of the audience.
    pub fn as_str(&self) -> &'static str {
        match self {
            IntendedAudience::Tenant => "TenantAudience",
            IntendedAudience::ClientApplication => "ClientAudience",
            IntendedAudience::Group => "GroupAudience",
            IntendedAudience::User => "UserAudience",
            IntendedAudience::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for IntendedAudience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntendedAudience {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "TenantAudience" => IntendedAudience::Tenant,
            "ClientAudience" => IntendedAudience::ClientApplication,
            "GroupAudience" => IntendedAudience::Group,
            "UserAudience" => IntendedAudience::User,
            _ => IntendedAudience::Unknown,
        })
    }
}
