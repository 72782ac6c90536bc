//! The grant store.
//!
//! In-memory tables behind a single `RwLock`, playing the role the relational
//! database plays in a deployed system: it owns uniqueness and transactional
//! guarantees, and everything above it is strategy-agnostic. The store also
//! keeps a counter of logical read queries so tests can assert cache
//! behavior the way the original's query-count assertions did.
//!
//! Snapshots serialize rows only; indexes are rebuilt on load.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{Result, WardenError};
use crate::linkage::Linkage;
use crate::model::{
    ContentTypeRow, GrantFilter, GrantId, GrantRow, GrantSpec, PermissionDefinition,
    PermissionDefinitionRow, PermissionId, StoreSnapshot,
};
use crate::principal::{Group, GroupId, PrincipalRef, User, UserId};
use crate::target::{ContentTypeId, ObjectRef, TargetType};

type UniqueKey = (PermissionId, PrincipalRef, ContentTypeId, String);

/// One grant table (the shared generic one, or a per-type direct one).
#[derive(Debug, Default)]
struct GrantTable {
    rows: BTreeMap<GrantId, GrantRow>,
    unique: BTreeSet<UniqueKey>,
}

impl GrantTable {
    fn contains_key(&self, key: &UniqueKey) -> bool {
        self.unique.contains(key)
    }

    fn insert(&mut self, row: GrantRow) {
        self.unique.insert((
            row.permission,
            row.principal,
            row.content_type,
            row.object_pk.clone(),
        ));
        self.rows.insert(row.id, row);
    }

    fn remove(&mut self, id: GrantId) -> Option<GrantRow> {
        let row = self.rows.remove(&id)?;
        self.unique.remove(&(
            row.permission,
            row.principal,
            row.content_type,
            row.object_pk.clone(),
        ));
        Some(row)
    }

    fn find(&self, key: &UniqueKey) -> Option<&GrantRow> {
        self.rows.values().find(|r| {
            r.permission == key.0
                && r.principal == key.1
                && r.content_type == key.2
                && r.object_pk == key.3
        })
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    next_content_type: u32,
    next_permission: u64,
    next_user: u64,
    next_group: u64,
    next_grant: u64,
    content_types: BTreeMap<ContentTypeId, ContentTypeRow>,
    type_index: BTreeMap<String, ContentTypeId>,
    permissions: BTreeMap<PermissionId, PermissionDefinitionRow>,
    perm_index: BTreeMap<(ContentTypeId, String), PermissionId>,
    users: BTreeMap<UserId, User>,
    groups: BTreeMap<GroupId, Group>,
    memberships: BTreeMap<UserId, BTreeSet<GroupId>>,
    objects: BTreeMap<ContentTypeId, BTreeSet<String>>,
    object_counters: BTreeMap<ContentTypeId, u64>,
    generic_grants: GrantTable,
    direct_grants: BTreeMap<ContentTypeId, GrantTable>,
    global_grants: BTreeSet<(PrincipalRef, PermissionId)>,
}

impl StoreInner {
    fn table(&self, ct: ContentTypeId) -> Option<&GrantTable> {
        match self.content_types.get(&ct).map(|row| row.linkage) {
            Some(Linkage::Direct) => self.direct_grants.get(&ct),
            _ => Some(&self.generic_grants),
        }
    }

    fn table_mut(&mut self, ct: ContentTypeId) -> &mut GrantTable {
        match self.content_types.get(&ct).map(|row| row.linkage) {
            Some(Linkage::Direct) => self.direct_grants.entry(ct).or_default(),
            _ => &mut self.generic_grants,
        }
    }

    fn codename(&self, id: PermissionId) -> Option<&str> {
        self.permissions.get(&id).map(|p| p.codename.as_str())
    }

    fn group_ids_of(&self, user: UserId) -> BTreeSet<GroupId> {
        self.memberships.get(&user).cloned().unwrap_or_default()
    }

    fn validate_spec(&self, spec: &GrantSpec) -> Result<()> {
        let perm = self.permissions.get(&spec.permission).ok_or_else(|| {
            WardenError::ValidationFailed(format!(
                "permission id {} does not exist",
                spec.permission.0
            ))
        })?;
        if perm.content_type != spec.content_type {
            let perm_type = self
                .content_types
                .get(&perm.content_type)
                .map(|c| c.target_type.key())
                .unwrap_or_else(|| "?".to_string());
            let target_type = self
                .content_types
                .get(&spec.content_type)
                .map(|c| c.target_type.key())
                .unwrap_or_else(|| "?".to_string());
            return Err(WardenError::ValidationFailed(format!(
                "permission '{}' belongs to {perm_type}, target is {target_type}",
                perm.codename
            )));
        }
        Ok(())
    }

    fn matches(row: &GrantRow, ct: ContentTypeId, filter: &GrantFilter) -> bool {
        if row.content_type != ct {
            return false;
        }
        if let Some(principal) = filter.principal {
            if row.principal != principal {
                return false;
            }
        }
        if let Some(permission) = filter.permission {
            if row.permission != permission {
                return false;
            }
        }
        if let Some(pks) = &filter.object_pks {
            if !pks.contains(&row.object_pk) {
                return false;
            }
        }
        true
    }

    fn delete_matching(
        &mut self,
        ct: ContentTypeId,
        filter: &GrantFilter,
    ) -> (u64, BTreeMap<String, u64>) {
        let table = self.table_mut(ct);
        let ids: Vec<GrantId> = table
            .rows
            .values()
            .filter(|row| Self::matches(row, ct, filter))
            .map(|row| row.id)
            .collect();
        let mut details: BTreeMap<String, u64> = BTreeMap::new();
        for id in &ids {
            if let Some(row) = table.remove(*id) {
                let label = match row.principal {
                    PrincipalRef::User(_) => "warden.UserObjectGrant",
                    PrincipalRef::Group(_) => "warden.GroupObjectGrant",
                };
                *details.entry(label.to_string()).or_default() += 1;
            }
        }
        (ids.len() as u64, details)
    }

    fn grant_pairs(
        &self,
        ct: ContentTypeId,
        principals: &BTreeSet<PrincipalRef>,
        codenames: Option<&BTreeSet<String>>,
        pks: Option<&BTreeSet<String>>,
    ) -> Vec<(String, String)> {
        let Some(table) = self.table(ct) else {
            return Vec::new();
        };
        table
            .rows
            .values()
            .filter(|row| row.content_type == ct && principals.contains(&row.principal))
            .filter(|row| match pks {
                Some(set) => set.contains(&row.object_pk),
                None => true,
            })
            .filter_map(|row| {
                let codename = self.codename(row.permission)?;
                match codenames {
                    Some(set) if !set.contains(codename) => None,
                    _ => Some((row.object_pk.clone(), codename.to_string())),
                }
            })
            .collect()
    }
}

/// Shared handle to the grant store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<RwLock<StoreInner>>,
    queries: Arc<AtomicU64>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("queries", &self.queries.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            queries: Arc::new(AtomicU64::new(0)),
        }
    }

    fn tick(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of logical read queries issued so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Target types and permissions
    // ========================================================================

    /// Register a target type with its linkage strategy and permission
    /// definitions. Idempotent: re-registering an existing key keeps the
    /// original linkage and only adds missing permissions.
    pub fn register_target_type(
        &self,
        app: &str,
        model: &str,
        linkage: Linkage,
        perms: &[(&str, &str)],
    ) -> TargetType {
        let target_type = TargetType::new(app, model);
        let mut inner = self.inner.write();
        let ct = match inner.type_index.get(&target_type.key()) {
            Some(id) => *id,
            None => {
                let id = ContentTypeId(inner.next_content_type);
                inner.next_content_type += 1;
                inner.type_index.insert(target_type.key(), id);
                inner.content_types.insert(
                    id,
                    ContentTypeRow {
                        id,
                        target_type: target_type.clone(),
                        linkage,
                    },
                );
                debug!(target_type = %target_type, %linkage, "registered target type");
                id
            }
        };
        for (codename, name) in perms {
            let key = (ct, codename.to_string());
            if !inner.perm_index.contains_key(&key) {
                let id = PermissionId(inner.next_permission);
                inner.next_permission += 1;
                inner.perm_index.insert(key, id);
                inner.permissions.insert(
                    id,
                    PermissionDefinitionRow {
                        id,
                        content_type: ct,
                        codename: codename.to_string(),
                        name: name.to_string(),
                    },
                );
            }
        }
        target_type
    }

    /// Resolve a target type to its content type id.
    pub fn content_type_id(&self, target_type: &TargetType) -> Result<ContentTypeId> {
        self.inner
            .read()
            .type_index
            .get(&target_type.key())
            .copied()
            .ok_or_else(|| WardenError::UnknownTargetType(target_type.key()))
    }

    /// Target type registered under the given content type id.
    pub fn target_type_of(&self, ct: ContentTypeId) -> Option<TargetType> {
        self.inner
            .read()
            .content_types
            .get(&ct)
            .map(|row| row.target_type.clone())
    }

    /// Linkage strategy of a registered type.
    pub fn linkage_of(&self, ct: ContentTypeId) -> Linkage {
        self.inner
            .read()
            .content_types
            .get(&ct)
            .map(|row| row.linkage)
            .unwrap_or_default()
    }

    /// All permission definitions for a content type.
    pub fn permissions_for(&self, ct: ContentTypeId) -> Vec<PermissionDefinition> {
        self.tick();
        let inner = self.inner.read();
        inner
            .permissions
            .values()
            .filter(|p| p.content_type == ct)
            .filter_map(|p| {
                let target_type = inner.content_types.get(&p.content_type)?;
                Some(PermissionDefinition {
                    id: p.id,
                    target_type: target_type.target_type.clone(),
                    codename: p.codename.clone(),
                    name: p.name.clone(),
                })
            })
            .collect()
    }

    /// Look up one permission id by content type and codename.
    pub fn find_permission(&self, ct: ContentTypeId, codename: &str) -> Result<PermissionId> {
        self.tick();
        let inner = self.inner.read();
        inner
            .perm_index
            .get(&(ct, codename.to_string()))
            .copied()
            .ok_or_else(|| WardenError::PermissionNotFound {
                target_type: inner
                    .content_types
                    .get(&ct)
                    .map(|c| c.target_type.key())
                    .unwrap_or_else(|| "?".to_string()),
                codename: codename.to_string(),
            })
    }

    /// Codename of a permission id, if it exists.
    pub fn permission_codename(&self, id: PermissionId) -> Option<String> {
        self.inner.read().codename(id).map(str::to_string)
    }

    /// Content type owning a permission, found by app label and codename
    /// (counted). Fails with `WrongApp` when no registered type under that
    /// label defines the codename.
    pub fn content_type_by_permission(
        &self,
        app_label: &str,
        codename: &str,
    ) -> Result<ContentTypeId> {
        self.tick();
        let inner = self.inner.read();
        inner
            .permissions
            .values()
            .find(|p| {
                p.codename == codename
                    && inner
                        .content_types
                        .get(&p.content_type)
                        .map(|c| c.target_type.app == app_label)
                        .unwrap_or(false)
            })
            .map(|p| p.content_type)
            .ok_or_else(|| {
                WardenError::WrongApp(format!(
                    "no permission '{codename}' under app '{app_label}'"
                ))
            })
    }

    /// All codenames defined for a content type, sorted.
    pub fn all_codenames(&self, ct: ContentTypeId) -> Vec<String> {
        self.tick();
        let inner = self.inner.read();
        let mut out: Vec<String> = inner
            .permissions
            .values()
            .filter(|p| p.content_type == ct)
            .map(|p| p.codename.clone())
            .collect();
        out.sort();
        out
    }

    // ========================================================================
    // Users, groups, memberships
    // ========================================================================

    /// Create an active, non-superuser user.
    pub fn create_user(&self, username: &str) -> User {
        self.create_user_with(username, true, false)
    }

    /// Create a superuser.
    pub fn create_superuser(&self, username: &str) -> User {
        self.create_user_with(username, true, true)
    }

    /// Create a user with explicit flags.
    pub fn create_user_with(&self, username: &str, is_active: bool, is_superuser: bool) -> User {
        let mut inner = self.inner.write();
        let id = UserId(inner.next_user);
        inner.next_user += 1;
        let user = User {
            id,
            username: username.to_string(),
            is_active,
            is_superuser,
        };
        inner.users.insert(id, user.clone());
        user
    }

    /// Flip a user's active flag. Returns the updated row.
    pub fn set_user_active(&self, id: UserId, is_active: bool) -> Option<User> {
        let mut inner = self.inner.write();
        let user = inner.users.get_mut(&id)?;
        user.is_active = is_active;
        Some(user.clone())
    }

    /// Fetch a user row.
    pub fn user(&self, id: UserId) -> Option<User> {
        self.inner.read().users.get(&id).cloned()
    }

    /// Fetch a user by username (counted: this is the anonymous sentinel
    /// lookup path).
    pub fn user_by_name(&self, username: &str) -> Option<User> {
        self.tick();
        self.inner
            .read()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
    }

    /// Fetch a user by id as a counted read (the pinned anonymous sentinel
    /// lookup path).
    pub fn user_by_id(&self, id: UserId) -> Option<User> {
        self.tick();
        self.inner.read().users.get(&id).cloned()
    }

    /// Create a group.
    pub fn create_group(&self, name: &str) -> Group {
        let mut inner = self.inner.write();
        let id = GroupId(inner.next_group);
        inner.next_group += 1;
        let group = Group {
            id,
            name: name.to_string(),
        };
        inner.groups.insert(id, group.clone());
        group
    }

    /// Fetch a group row.
    pub fn group(&self, id: GroupId) -> Option<Group> {
        self.inner.read().groups.get(&id).cloned()
    }

    /// Add a user to a group. Idempotent.
    pub fn add_user_to_group(&self, user: UserId, group: GroupId) {
        self.inner
            .write()
            .memberships
            .entry(user)
            .or_default()
            .insert(group);
    }

    /// Groups the user belongs to.
    pub fn groups_of(&self, user: UserId) -> BTreeSet<GroupId> {
        self.inner.read().group_ids_of(user)
    }

    /// Members of a group.
    pub fn members_of(&self, group: GroupId) -> Vec<UserId> {
        self.inner
            .read()
            .memberships
            .iter()
            .filter(|(_, groups)| groups.contains(&group))
            .map(|(user, _)| *user)
            .collect()
    }

    /// All superusers (counted).
    pub fn superusers(&self) -> Vec<User> {
        self.tick();
        self.inner
            .read()
            .users
            .values()
            .filter(|u| u.is_superuser)
            .cloned()
            .collect()
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// Create a new persisted object of the given type with an
    /// auto-assigned primary key.
    pub fn create_object(&self, target_type: &TargetType) -> Result<ObjectRef> {
        let ct = self.content_type_id(target_type)?;
        let mut inner = self.inner.write();
        let counter = inner.object_counters.entry(ct).or_insert(0);
        *counter += 1;
        let pk = counter.to_string();
        inner.objects.entry(ct).or_default().insert(pk.clone());
        Ok(ObjectRef::new(target_type.clone(), pk))
    }

    /// Delete an object. Direct-linked grants on it are cascade-deleted;
    /// generic-linked grants are left behind as orphans for the reclaimer.
    pub fn delete_object(&self, obj: &ObjectRef) -> Result<()> {
        let pk = obj.require_pk()?.to_string();
        let ct = self.content_type_id(&obj.target_type)?;
        let mut inner = self.inner.write();
        let existed = inner
            .objects
            .get_mut(&ct)
            .map(|set| set.remove(&pk))
            .unwrap_or(false);
        if existed && !inner.content_types[&ct].linkage.is_generic() {
            let filter = GrantFilter {
                object_pks: Some(std::iter::once(pk.clone()).collect()),
                ..GrantFilter::default()
            };
            let (removed, _) = inner.delete_matching(ct, &filter);
            if removed > 0 {
                debug!(object = %obj, removed, "cascade-deleted direct grants");
            }
        }
        Ok(())
    }

    /// Whether the referenced object is live.
    pub fn object_exists(&self, ct: ContentTypeId, pk: &str) -> bool {
        self.inner
            .read()
            .objects
            .get(&ct)
            .map(|set| set.contains(pk))
            .unwrap_or(false)
    }

    /// Primary keys of all live objects of a type (counted).
    pub fn all_pks(&self, ct: ContentTypeId) -> BTreeSet<String> {
        self.tick();
        self.inner
            .read()
            .objects
            .get(&ct)
            .cloned()
            .unwrap_or_default()
    }

    // ========================================================================
    // Grant reads (counted)
    // ========================================================================

    /// `(object_pk, codename)` pairs for grants held directly by a user.
    pub fn user_grant_pairs(
        &self,
        user: UserId,
        ct: ContentTypeId,
        codenames: Option<&BTreeSet<String>>,
        pks: Option<&BTreeSet<String>>,
    ) -> Vec<(String, String)> {
        self.tick();
        let principals = std::iter::once(PrincipalRef::User(user)).collect();
        self.inner.read().grant_pairs(ct, &principals, codenames, pks)
    }

    /// `(object_pk, codename)` pairs for grants held by any group the user
    /// belongs to. One logical query: the membership join is part of it.
    pub fn user_group_grant_pairs(
        &self,
        user: UserId,
        ct: ContentTypeId,
        codenames: Option<&BTreeSet<String>>,
        pks: Option<&BTreeSet<String>>,
    ) -> Vec<(String, String)> {
        self.tick();
        let inner = self.inner.read();
        let principals: BTreeSet<PrincipalRef> = inner
            .group_ids_of(user)
            .into_iter()
            .map(PrincipalRef::Group)
            .collect();
        inner.grant_pairs(ct, &principals, codenames, pks)
    }

    /// `(object_pk, codename)` pairs for grants held by one group.
    pub fn group_grant_pairs(
        &self,
        group: GroupId,
        ct: ContentTypeId,
        codenames: Option<&BTreeSet<String>>,
        pks: Option<&BTreeSet<String>>,
    ) -> Vec<(String, String)> {
        self.tick();
        let principals = std::iter::once(PrincipalRef::Group(group)).collect();
        self.inner.read().grant_pairs(ct, &principals, codenames, pks)
    }

    /// Users holding a grant directly on the object (counted).
    pub fn users_with_object_grants(&self, ct: ContentTypeId, pk: &str) -> Vec<User> {
        self.tick();
        let inner = self.inner.read();
        let ids: BTreeSet<UserId> = inner
            .table(ct)
            .map(|table| {
                table
                    .rows
                    .values()
                    .filter(|row| row.content_type == ct && row.object_pk == pk)
                    .filter_map(|row| match row.principal {
                        PrincipalRef::User(id) => Some(id),
                        PrincipalRef::Group(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        ids.into_iter()
            .filter_map(|id| inner.users.get(&id).cloned())
            .collect()
    }

    /// Users who are members of a group holding a grant on the object
    /// (counted).
    pub fn users_via_group_object_grants(&self, ct: ContentTypeId, pk: &str) -> Vec<User> {
        self.tick();
        let inner = self.inner.read();
        let group_ids: BTreeSet<GroupId> = inner
            .table(ct)
            .map(|table| {
                table
                    .rows
                    .values()
                    .filter(|row| row.content_type == ct && row.object_pk == pk)
                    .filter_map(|row| match row.principal {
                        PrincipalRef::Group(id) => Some(id),
                        PrincipalRef::User(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let member_ids: BTreeSet<UserId> = inner
            .memberships
            .iter()
            .filter(|(_, groups)| groups.intersection(&group_ids).next().is_some())
            .map(|(user, _)| *user)
            .collect();
        member_ids
            .into_iter()
            .filter_map(|id| inner.users.get(&id).cloned())
            .collect()
    }

    /// Groups holding a grant on the object (counted).
    pub fn groups_with_object_grants(&self, ct: ContentTypeId, pk: &str) -> Vec<Group> {
        self.tick();
        let inner = self.inner.read();
        let ids: BTreeSet<GroupId> = inner
            .table(ct)
            .map(|table| {
                table
                    .rows
                    .values()
                    .filter(|row| row.content_type == ct && row.object_pk == pk)
                    .filter_map(|row| match row.principal {
                        PrincipalRef::Group(id) => Some(id),
                        PrincipalRef::User(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        ids.into_iter()
            .filter_map(|id| inner.groups.get(&id).cloned())
            .collect()
    }

    // ========================================================================
    // Global (model-wide) grants
    // ========================================================================

    /// Attach a model-wide grant to a principal. Idempotent.
    pub fn add_global_grant(&self, principal: PrincipalRef, permission: PermissionId) {
        self.inner.write().global_grants.insert((principal, permission));
    }

    /// Remove a model-wide grant. Returns whether a row was removed.
    pub fn remove_global_grant(&self, principal: PrincipalRef, permission: PermissionId) -> bool {
        self.inner.write().global_grants.remove(&(principal, permission))
    }

    /// Codenames the user holds globally for the type, directly or through
    /// group membership (counted).
    pub fn user_global_codenames(&self, user: UserId, ct: ContentTypeId) -> BTreeSet<String> {
        self.tick();
        let inner = self.inner.read();
        let mut principals: BTreeSet<PrincipalRef> = inner
            .group_ids_of(user)
            .into_iter()
            .map(PrincipalRef::Group)
            .collect();
        principals.insert(PrincipalRef::User(user));
        inner
            .global_grants
            .iter()
            .filter(|(principal, _)| principals.contains(principal))
            .filter_map(|(_, perm)| {
                let row = inner.permissions.get(perm)?;
                (row.content_type == ct).then(|| row.codename.clone())
            })
            .collect()
    }

    /// Codenames the group holds globally for the type (counted).
    pub fn group_global_codenames(&self, group: GroupId, ct: ContentTypeId) -> BTreeSet<String> {
        self.tick();
        let inner = self.inner.read();
        inner
            .global_grants
            .iter()
            .filter(|(principal, _)| *principal == PrincipalRef::Group(group))
            .filter_map(|(_, perm)| {
                let row = inner.permissions.get(perm)?;
                (row.content_type == ct).then(|| row.codename.clone())
            })
            .collect()
    }

    // ========================================================================
    // Grant writes
    // ========================================================================

    /// Create a grant, or fetch the existing row for the same triple.
    /// The check and the insert happen under one write lock, which is what
    /// makes concurrent duplicate assigns race-tolerant.
    pub fn get_or_create_grant(&self, spec: &GrantSpec) -> Result<(GrantRow, bool)> {
        let mut inner = self.inner.write();
        inner.validate_spec(spec)?;
        let key = spec.unique_key();
        let ct = spec.content_type;
        if let Some(existing) = inner.table(ct).and_then(|t| t.find(&key)) {
            return Ok((existing.clone(), false));
        }
        let row = Self::new_row(&mut inner, spec);
        inner.table_mut(ct).insert(row.clone());
        Ok((row, true))
    }

    /// Insert a batch of grants atomically. With `ignore_conflicts` false,
    /// any duplicate triple (against the table or within the batch) fails
    /// the whole batch with nothing applied; with it true, duplicates are
    /// silently skipped.
    pub fn insert_grants(
        &self,
        specs: &[GrantSpec],
        ignore_conflicts: bool,
    ) -> Result<Vec<GrantRow>> {
        let mut inner = self.inner.write();
        Self::insert_grants_locked(&mut inner, specs, ignore_conflicts)
    }

    /// Apply inserts and deletes in one atomic step. Used by the
    /// stage-then-commit batch.
    pub fn apply_batch(
        &self,
        inserts: &[GrantSpec],
        removes: &[(ContentTypeId, GrantFilter)],
        ignore_conflicts: bool,
    ) -> Result<(Vec<GrantRow>, u64)> {
        let mut inner = self.inner.write();
        let created = Self::insert_grants_locked(&mut inner, inserts, ignore_conflicts)?;
        let mut removed = 0;
        for (ct, filter) in removes {
            let (count, _) = inner.delete_matching(*ct, filter);
            removed += count;
        }
        info!(
            created = created.len(),
            removed, "committed grant batch"
        );
        Ok((created, removed))
    }

    fn insert_grants_locked(
        inner: &mut StoreInner,
        specs: &[GrantSpec],
        ignore_conflicts: bool,
    ) -> Result<Vec<GrantRow>> {
        for spec in specs {
            inner.validate_spec(spec)?;
        }
        if !ignore_conflicts {
            let mut seen: BTreeSet<UniqueKey> = BTreeSet::new();
            for spec in specs {
                let key = spec.unique_key();
                let table_hit = inner
                    .table(spec.content_type)
                    .map(|t| t.contains_key(&key))
                    .unwrap_or(false);
                if table_hit || !seen.insert(key) {
                    return Err(WardenError::DuplicateGrant(format!(
                        "{} already holds permission id {} on {}:{}",
                        spec.principal, spec.permission.0, spec.content_type.0, spec.object_pk
                    )));
                }
            }
        }
        let mut created = Vec::new();
        for spec in specs {
            let key = spec.unique_key();
            let exists = inner
                .table(spec.content_type)
                .map(|t| t.contains_key(&key))
                .unwrap_or(false);
            if exists {
                continue;
            }
            let row = Self::new_row(inner, spec);
            inner.table_mut(spec.content_type).insert(row.clone());
            created.push(row);
        }
        Ok(created)
    }

    fn new_row(inner: &mut StoreInner, spec: &GrantSpec) -> GrantRow {
        let id = GrantId(inner.next_grant);
        inner.next_grant += 1;
        GrantRow {
            id,
            permission: spec.permission,
            principal: spec.principal,
            content_type: spec.content_type,
            object_pk: spec.object_pk.clone(),
            created_at: Utc::now().timestamp(),
        }
    }

    /// Delete grants matching the filter. Never fails for "nothing to
    /// delete"; reports a zero count instead.
    pub fn delete_grants(
        &self,
        ct: ContentTypeId,
        filter: &GrantFilter,
    ) -> (u64, BTreeMap<String, u64>) {
        self.inner.write().delete_matching(ct, filter)
    }

    // ========================================================================
    // Reclaimer support
    // ========================================================================

    /// Number of rows in the shared generic table (counted).
    pub fn generic_grant_count(&self) -> u64 {
        self.tick();
        self.inner.read().generic_grants.rows.len() as u64
    }

    /// One page of generic grant rows in id order (counted).
    pub fn generic_grant_page(&self, offset: u64, limit: u64) -> Vec<GrantRow> {
        self.tick();
        self.inner
            .read()
            .generic_grants
            .rows
            .values()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect()
    }

    /// Delete generic grant rows by id. Returns the number removed.
    pub fn delete_generic_grants(&self, ids: &[GrantId]) -> u64 {
        let mut inner = self.inner.write();
        let mut removed = 0;
        for id in ids {
            if inner.generic_grants.remove(*id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Extract a serializable snapshot of all rows.
    pub fn to_snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read();
        StoreSnapshot {
            content_types: inner.content_types.values().cloned().collect(),
            permissions: inner.permissions.values().cloned().collect(),
            users: inner.users.values().cloned().collect(),
            groups: inner.groups.values().cloned().collect(),
            memberships: inner
                .memberships
                .iter()
                .flat_map(|(user, groups)| groups.iter().map(|g| (*user, *g)))
                .collect(),
            objects: inner
                .objects
                .iter()
                .flat_map(|(ct, pks)| pks.iter().map(|pk| (*ct, pk.clone())))
                .collect(),
            object_counters: inner
                .object_counters
                .iter()
                .map(|(ct, n)| (*ct, *n))
                .collect(),
            generic_grants: inner.generic_grants.rows.values().cloned().collect(),
            direct_grants: inner
                .direct_grants
                .values()
                .flat_map(|table| table.rows.values().cloned())
                .collect(),
            global_grants: inner.global_grants.iter().cloned().collect(),
        }
    }

    /// Rebuild a store from a snapshot, restoring indexes and id counters.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut inner = StoreInner::default();
        for row in snapshot.content_types {
            inner.next_content_type = inner.next_content_type.max(row.id.0 + 1);
            inner.type_index.insert(row.target_type.key(), row.id);
            inner.content_types.insert(row.id, row);
        }
        for row in snapshot.permissions {
            inner.next_permission = inner.next_permission.max(row.id.0 + 1);
            inner
                .perm_index
                .insert((row.content_type, row.codename.clone()), row.id);
            inner.permissions.insert(row.id, row);
        }
        for user in snapshot.users {
            inner.next_user = inner.next_user.max(user.id.0 + 1);
            inner.users.insert(user.id, user);
        }
        for group in snapshot.groups {
            inner.next_group = inner.next_group.max(group.id.0 + 1);
            inner.groups.insert(group.id, group);
        }
        for (user, group) in snapshot.memberships {
            inner.memberships.entry(user).or_default().insert(group);
        }
        for (ct, pk) in snapshot.objects {
            inner.objects.entry(ct).or_default().insert(pk);
        }
        for (ct, n) in snapshot.object_counters {
            inner.object_counters.insert(ct, n);
        }
        for row in snapshot.generic_grants {
            inner.next_grant = inner.next_grant.max(row.id.0 + 1);
            inner.generic_grants.insert(row);
        }
        for row in snapshot.direct_grants {
            inner.next_grant = inner.next_grant.max(row.id.0 + 1);
            inner.direct_grants.entry(row.content_type).or_default().insert(row);
        }
        for edge in snapshot.global_grants {
            inner.global_grants.insert(edge);
        }
        Self {
            inner: Arc::new(RwLock::new(inner)),
            queries: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Save a JSON snapshot to disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = self.to_snapshot();
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path.as_ref(), json)?;
        info!(path = %path.as_ref().display(), "saved store snapshot");
        Ok(())
    }

    /// Load a JSON snapshot from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let snapshot: StoreSnapshot = serde_json::from_str(&raw)?;
        info!(path = %path.as_ref().display(), "loaded store snapshot");
        Ok(Self::from_snapshot(snapshot))
    }
}
