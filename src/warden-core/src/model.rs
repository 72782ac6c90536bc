//! Persisted row types and the snapshot format.

use serde::{Deserialize, Serialize};

use crate::linkage::Linkage;
use crate::principal::{Group, GroupId, PrincipalRef, User, UserId};
use crate::target::{ContentTypeId, TargetType};

/// Unique identifier of a permission definition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PermissionId(pub u64);

/// Unique identifier of a grant row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct GrantId(pub u64);

/// A permission definition scoped to one target type.
///
/// Unique per `(target_type, codename)`; immutable at runtime and read-only
/// to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDefinition {
    /// Row id.
    pub id: PermissionId,
    /// Type this permission applies to.
    pub target_type: TargetType,
    /// Machine codename, e.g. `"change_task"`.
    pub codename: String,
    /// Human-readable name, e.g. `"Can change task"`.
    pub name: String,
}

/// One registered target type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypeRow {
    /// Assigned id.
    pub id: ContentTypeId,
    /// The `(app, model)` pair.
    pub target_type: TargetType,
    /// Grant storage strategy for this type.
    pub linkage: Linkage,
}

/// One object permission grant: a (principal, permission, target) triple.
///
/// Generic-linked rows live in the shared table; direct-linked rows live in
/// the dedicated table of their content type. The row shape is the same,
/// only the table and its join field differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRow {
    /// Row id, unique across both tables.
    pub id: GrantId,
    /// Granted permission.
    pub permission: PermissionId,
    /// Holder of the grant.
    pub principal: PrincipalRef,
    /// Target's content type.
    pub content_type: ContentTypeId,
    /// Target's stringified primary key.
    pub object_pk: String,
    /// Creation timestamp (Unix seconds).
    pub created_at: i64,
}

/// Insert request for one grant row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantSpec {
    /// Permission to grant.
    pub permission: PermissionId,
    /// Holder of the grant.
    pub principal: PrincipalRef,
    /// Target's content type.
    pub content_type: ContentTypeId,
    /// Target's stringified primary key.
    pub object_pk: String,
}

impl GrantSpec {
    /// The uniqueness key enforced on insert.
    pub fn unique_key(&self) -> (PermissionId, PrincipalRef, ContentTypeId, String) {
        (
            self.permission,
            self.principal,
            self.content_type,
            self.object_pk.clone(),
        )
    }
}

/// Delete filter over one content type's grants.
#[derive(Debug, Clone, Default)]
pub struct GrantFilter {
    /// Restrict to one holder.
    pub principal: Option<PrincipalRef>,
    /// Restrict to one permission.
    pub permission: Option<PermissionId>,
    /// Restrict to a set of target primary keys.
    pub object_pks: Option<std::collections::BTreeSet<String>>,
}

/// On-disk snapshot of the whole store.
///
/// Indexes and uniqueness sets are rebuilt on load; only the rows are
/// persisted.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Registered target types.
    pub content_types: Vec<ContentTypeRow>,
    /// Permission definitions, referenced by content type id.
    pub permissions: Vec<PermissionDefinitionRow>,
    /// User rows.
    pub users: Vec<User>,
    /// Group rows.
    pub groups: Vec<Group>,
    /// Group membership edges.
    pub memberships: Vec<(UserId, GroupId)>,
    /// Live objects per content type.
    pub objects: Vec<(ContentTypeId, String)>,
    /// Per-type object pk counters.
    pub object_counters: Vec<(ContentTypeId, u64)>,
    /// Shared generic grant table.
    pub generic_grants: Vec<GrantRow>,
    /// Direct grant tables, flattened; the row's content type says which.
    pub direct_grants: Vec<GrantRow>,
    /// Model-wide grants without a target reference.
    pub global_grants: Vec<(PrincipalRef, PermissionId)>,
}

/// Snapshot form of a permission definition (content type by id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDefinitionRow {
    /// Row id.
    pub id: PermissionId,
    /// Owning content type.
    pub content_type: ContentTypeId,
    /// Machine codename.
    pub codename: String,
    /// Human-readable name.
    pub name: String,
}
