//! Convenient shortcuts to manage or check object permissions.
//!
//! This is the surface the excluded collaborators (views, admin, template
//! helpers) consume. Permission strings are `"app_label.codename"`, or bare
//! `"codename"` when a target is supplied and its app label can be
//! inferred; a qualifier that contradicts the target's type is rejected.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::checker::ObjectPermissionChecker;
use crate::config::WardenConfig;
use crate::error::{Result, WardenError};
use crate::identity::{resolve_identity, Identity, IdentityInput};
use crate::manager::{GrantManager, RemovalReport};
use crate::model::{GrantFilter, GrantRow, GrantSpec, PermissionDefinition};
use crate::principal::{Group, PrincipalRef, User};
use crate::store::Store;
use crate::target::{ContentTypeId, ObjectRef};

/// Target side of an assign/remove call.
#[derive(Debug, Clone, Copy)]
pub enum TargetInput<'a> {
    /// No target: operate on the model-wide global grant.
    Global,
    /// One object.
    Object(&'a ObjectRef),
    /// Many objects of one type.
    Objects(&'a [ObjectRef]),
}

impl<'a> From<&'a ObjectRef> for TargetInput<'a> {
    fn from(value: &'a ObjectRef) -> Self {
        TargetInput::Object(value)
    }
}

impl<'a> From<&'a [ObjectRef]> for TargetInput<'a> {
    fn from(value: &'a [ObjectRef]) -> Self {
        TargetInput::Objects(value)
    }
}

impl<'a> From<&'a Vec<ObjectRef>> for TargetInput<'a> {
    fn from(value: &'a Vec<ObjectRef>) -> Self {
        TargetInput::Objects(value.as_slice())
    }
}

/// What an [`assign_perm`] call produced.
#[derive(Debug, Clone)]
pub enum Assigned {
    /// A model-wide grant was attached to the principal(s).
    Global(PermissionDefinition),
    /// One grant row.
    Grant(GrantRow),
    /// Several grant rows (multi-principal or multi-target call).
    Grants(Vec<GrantRow>),
}

impl Assigned {
    /// Grant rows created by the call (empty for global grants).
    pub fn rows(&self) -> &[GrantRow] {
        match self {
            Assigned::Global(_) => &[],
            Assigned::Grant(row) => std::slice::from_ref(row),
            Assigned::Grants(rows) => rows,
        }
    }
}

fn principal_refs(identity: &Identity) -> Vec<PrincipalRef> {
    match identity {
        Identity::User(user) => vec![PrincipalRef::User(user.id)],
        Identity::Group(group) => vec![PrincipalRef::Group(group.id)],
        Identity::Users(users) => users.iter().map(|u| PrincipalRef::User(u.id)).collect(),
        Identity::Groups(groups) => groups.iter().map(|g| PrincipalRef::Group(g.id)).collect(),
    }
}

/// Split a permission string against a known target, rejecting a qualifier
/// that contradicts the target's app label.
fn codename_for(perm: &str, obj: &ObjectRef) -> Result<String> {
    match perm.split_once('.') {
        Some((label, codename)) => {
            if label != obj.target_type.app {
                return Err(WardenError::WrongApp(format!(
                    "permission '{perm}' does not match target type {}",
                    obj.target_type.key()
                )));
            }
            Ok(codename.to_string())
        }
        None => Ok(perm.to_string()),
    }
}

fn global_permission(store: &Store, perm: &str) -> Result<PermissionDefinition> {
    let (app_label, codename) = perm.split_once('.').ok_or_else(|| {
        WardenError::WrongApp(format!(
            "for global permissions the string must be 'app_label.codename' (is '{perm}')"
        ))
    })?;
    let ct = store.content_type_by_permission(app_label, codename)?;
    let id = store.find_permission(ct, codename)?;
    store
        .permissions_for(ct)
        .into_iter()
        .find(|p| p.id == id)
        .ok_or(WardenError::PermissionNotFound {
            target_type: app_label.to_string(),
            codename: codename.to_string(),
        })
}

/// Assign a permission to one or many principals on zero, one or many
/// targets.
///
/// With no target the grant is model-wide and the permission string must be
/// fully qualified. Supplying both a principal collection and a target
/// collection is rejected with
/// [`WardenError::MultipleIdentityAndObject`].
pub fn assign_perm<'a>(
    store: &Store,
    config: &WardenConfig,
    perm: &str,
    who: impl Into<IdentityInput>,
    target: impl Into<TargetInput<'a>>,
) -> Result<Assigned> {
    let identity = resolve_identity(store, config, who.into())?;
    let manager = GrantManager::new(store, config);
    match target.into() {
        TargetInput::Global => {
            let def = global_permission(store, perm)?;
            for principal in principal_refs(&identity) {
                store.add_global_grant(principal, def.id);
            }
            debug!(perm, "assigned global permission");
            Ok(Assigned::Global(def))
        }
        TargetInput::Object(obj) => {
            let codename = codename_for(perm, obj)?;
            let refs = principal_refs(&identity);
            if identity.is_collection() {
                let rows = manager.assign_to_many(codename.as_str(), &refs, obj, false)?;
                Ok(Assigned::Grants(rows))
            } else {
                let row = manager.assign(codename.as_str(), refs[0], obj)?;
                Ok(Assigned::Grant(row))
            }
        }
        TargetInput::Objects(objects) => {
            if identity.is_collection() {
                return Err(WardenError::MultipleIdentityAndObject);
            }
            let refs = principal_refs(&identity);
            let codename = match objects.first() {
                Some(first) => codename_for(perm, first)?,
                None => return Ok(Assigned::Grants(Vec::new())),
            };
            let rows = manager.bulk_assign(codename.as_str(), refs[0], objects, false)?;
            Ok(Assigned::Grants(rows))
        }
    }
}

/// Remove a permission from one or many principals on zero, one or many
/// targets. Removing something never granted reports a zero count.
pub fn remove_perm<'a>(
    store: &Store,
    config: &WardenConfig,
    perm: &str,
    who: impl Into<IdentityInput>,
    target: impl Into<TargetInput<'a>>,
) -> Result<RemovalReport> {
    let identity = resolve_identity(store, config, who.into())?;
    let manager = GrantManager::new(store, config);
    match target.into() {
        TargetInput::Global => {
            let def = global_permission(store, perm)?;
            let mut removed = 0;
            for principal in principal_refs(&identity) {
                if store.remove_global_grant(principal, def.id) {
                    removed += 1;
                }
            }
            let mut details = BTreeMap::new();
            if removed > 0 {
                details.insert("warden.GlobalGrant".to_string(), removed);
            }
            Ok((removed, details))
        }
        TargetInput::Object(obj) => {
            let codename = codename_for(perm, obj)?;
            let refs = principal_refs(&identity);
            if identity.is_collection() {
                manager.remove_from_many(codename.as_str(), &refs, obj)
            } else {
                manager.remove(codename.as_str(), refs[0], obj)
            }
        }
        TargetInput::Objects(objects) => {
            if identity.is_collection() {
                return Err(WardenError::MultipleIdentityAndObject);
            }
            let refs = principal_refs(&identity);
            let codename = match objects.first() {
                Some(first) => codename_for(perm, first)?,
                None => return Ok((0, BTreeMap::new())),
            };
            manager.bulk_remove(codename.as_str(), refs[0], objects)
        }
    }
}

/// All permission codenames the principal holds on the object (direct and
/// through groups, with superuser expansion), via a fresh checker.
pub fn get_perms(
    store: &Store,
    config: &WardenConfig,
    who: impl Into<IdentityInput>,
    obj: &ObjectRef,
) -> Result<Vec<String>> {
    let checker = ObjectPermissionChecker::new(store, config, who)?;
    checker.get_perms(obj)
}

/// Codenames granted directly to the user on the object; group grants and
/// superuser status are not consulted.
pub fn get_user_perms(store: &Store, user: &User, obj: &ObjectRef) -> Result<Vec<String>> {
    let pk = obj.require_pk()?.to_string();
    let ct = store.content_type_id(&obj.target_type)?;
    let single: BTreeSet<String> = std::iter::once(pk).collect();
    let mut codenames: Vec<String> = store
        .user_grant_pairs(user.id, ct, None, Some(&single))
        .into_iter()
        .map(|(_, codename)| codename)
        .collect();
    codenames.sort();
    codenames.dedup();
    Ok(codenames)
}

/// Codenames reaching the principal through group grants only: for a user,
/// grants to any of their groups; for a group, its own grants.
pub fn get_group_perms(
    store: &Store,
    config: &WardenConfig,
    who: impl Into<IdentityInput>,
    obj: &ObjectRef,
) -> Result<Vec<String>> {
    let pk = obj.require_pk()?.to_string();
    let ct = store.content_type_id(&obj.target_type)?;
    let single: BTreeSet<String> = std::iter::once(pk).collect();
    let pairs = match resolve_identity(store, config, who.into())? {
        Identity::User(user) => store.user_group_grant_pairs(user.id, ct, None, Some(&single)),
        Identity::Group(group) => store.group_grant_pairs(group.id, ct, None, Some(&single)),
        _ => {
            return Err(WardenError::NotUserNorGroup(
                "a single user or group is required".to_string(),
            ))
        }
    };
    let mut codenames: Vec<String> = pairs.into_iter().map(|(_, codename)| codename).collect();
    codenames.sort();
    codenames.dedup();
    Ok(codenames)
}

/// Options for [`get_users_with_perms`].
#[derive(Debug, Clone)]
pub struct UsersWithPermsOptions {
    /// Include users who reach the object only through a group grant.
    pub with_group_users: bool,
    /// Include all superusers.
    pub with_superusers: bool,
}

impl Default for UsersWithPermsOptions {
    fn default() -> Self {
        Self {
            with_group_users: true,
            with_superusers: false,
        }
    }
}

/// All users with any object permission on the object, sorted by id.
pub fn get_users_with_perms(
    store: &Store,
    obj: &ObjectRef,
    opts: &UsersWithPermsOptions,
) -> Result<Vec<User>> {
    let pk = obj.require_pk()?;
    let ct = store.content_type_id(&obj.target_type)?;
    let mut users = store.users_with_object_grants(ct, pk);
    if opts.with_group_users {
        users.extend(store.users_via_group_object_grants(ct, pk));
    }
    if opts.with_superusers {
        users.extend(store.superusers());
    }
    users.sort_by_key(|u| u.id);
    users.dedup_by_key(|u| u.id);
    Ok(users)
}

/// Eager variant of [`get_users_with_perms`]: each user paired with their
/// sorted codename list. Fetches per user.
pub fn get_users_with_perms_attached(
    store: &Store,
    config: &WardenConfig,
    obj: &ObjectRef,
    opts: &UsersWithPermsOptions,
) -> Result<Vec<(User, Vec<String>)>> {
    let users = get_users_with_perms(store, obj, opts)?;
    let mut out = Vec::with_capacity(users.len());
    for user in users {
        let perms = get_perms(store, config, user.clone(), obj)?;
        out.push((user, perms));
    }
    Ok(out)
}

/// All groups with any object permission on the object, sorted by id.
pub fn get_groups_with_perms(store: &Store, obj: &ObjectRef) -> Result<Vec<Group>> {
    let pk = obj.require_pk()?;
    let ct = store.content_type_id(&obj.target_type)?;
    let mut groups = store.groups_with_object_grants(ct, pk);
    groups.sort_by_key(|g| g.id);
    groups.dedup_by_key(|g| g.id);
    Ok(groups)
}

/// Eager variant of [`get_groups_with_perms`].
pub fn get_groups_with_perms_attached(
    store: &Store,
    config: &WardenConfig,
    obj: &ObjectRef,
) -> Result<Vec<(Group, Vec<String>)>> {
    let groups = get_groups_with_perms(store, obj)?;
    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        let perms = get_perms(store, config, group.clone(), obj)?;
        out.push((group, perms));
    }
    Ok(out)
}

/// Outcome of a committed [`GrantBatch`].
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// Grant rows created.
    pub created: Vec<GrantRow>,
    /// Grant rows removed.
    pub removed: u64,
}

/// Two-phase grant mutation: stage assigns and removes, then apply them all
/// in one atomic step. Staged-but-uncommitted operations have zero
/// observable effect on any checker.
#[derive(Debug, Default)]
pub struct GrantBatch {
    inserts: Vec<GrantSpec>,
    removes: Vec<(ContentTypeId, GrantFilter)>,
}

impl GrantBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.inserts.len() + self.removes.len()
    }

    /// Whether nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.removes.is_empty()
    }

    /// Stage an assign. The permission is resolved now; the write is
    /// deferred until [`GrantBatch::commit`].
    pub fn stage_assign(
        &mut self,
        store: &Store,
        perm: &str,
        principal: PrincipalRef,
        obj: &ObjectRef,
    ) -> Result<()> {
        let pk = obj.require_pk()?.to_string();
        let codename = codename_for(perm, obj)?;
        let ct = store.content_type_id(&obj.target_type)?;
        let permission = store.find_permission(ct, &codename)?;
        self.inserts.push(GrantSpec {
            permission,
            principal,
            content_type: ct,
            object_pk: pk,
        });
        Ok(())
    }

    /// Stage a remove, deferred until [`GrantBatch::commit`].
    pub fn stage_remove(
        &mut self,
        store: &Store,
        perm: &str,
        principal: PrincipalRef,
        obj: &ObjectRef,
    ) -> Result<()> {
        let pk = obj.require_pk()?.to_string();
        let codename = codename_for(perm, obj)?;
        let ct = store.content_type_id(&obj.target_type)?;
        let permission = store.find_permission(ct, &codename)?;
        self.removes.push((
            ct,
            GrantFilter {
                principal: Some(principal),
                permission: Some(permission),
                object_pks: Some(std::iter::once(pk).collect()),
            },
        ));
        Ok(())
    }

    /// Apply every staged operation in one atomic step. Duplicate staged
    /// assigns against existing grants are skipped, not errors.
    pub fn commit(self, store: &Store) -> Result<CommitOutcome> {
        let (created, removed) = store.apply_batch(&self.inserts, &self.removes, true)?;
        Ok(CommitOutcome { created, removed })
    }
}
