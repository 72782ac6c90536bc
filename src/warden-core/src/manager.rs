//! Grant managers: create, fetch and delete grant rows for
//! (principal, permission, target) triples, with bulk variants.
//!
//! Removal goes through a filter delete rather than fetching rows first, so
//! per-row deletion hooks are never fired; that is the documented contract,
//! not an oversight.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use tracing::debug;

use crate::checker::ObjectPermissionChecker;
use crate::config::WardenConfig;
use crate::error::{Result, WardenError};
use crate::model::{GrantFilter, GrantRow, GrantSpec, PermissionDefinition, PermissionId};
use crate::principal::PrincipalRef;
use crate::store::Store;
use crate::target::ObjectRef;

/// A permission argument: a bare codename or a resolved definition.
#[derive(Debug, Clone, Copy)]
pub enum PermRef<'a> {
    /// Codename resolved against the target's type.
    Codename(&'a str),
    /// Already-resolved definition; its type must match the target's.
    Definition(&'a PermissionDefinition),
}

impl<'a> From<&'a str> for PermRef<'a> {
    fn from(value: &'a str) -> Self {
        PermRef::Codename(value)
    }
}

impl<'a> From<&'a PermissionDefinition> for PermRef<'a> {
    fn from(value: &'a PermissionDefinition) -> Self {
        PermRef::Definition(value)
    }
}

/// Removal outcome: total rows deleted plus a per-table breakdown.
pub type RemovalReport = (u64, BTreeMap<String, u64>);

/// Manager for object permission grants, bound to a store.
#[derive(Debug, Clone)]
pub struct GrantManager {
    store: Store,
    config: WardenConfig,
}

impl GrantManager {
    /// Create a manager over the given store.
    pub fn new(store: &Store, config: &WardenConfig) -> Self {
        Self {
            store: store.clone(),
            config: config.clone(),
        }
    }

    fn resolve_perm(&self, perm: PermRef<'_>, obj: &ObjectRef) -> Result<PermissionId> {
        let ct = self.store.content_type_id(&obj.target_type)?;
        match perm {
            PermRef::Codename(codename) => {
                let codename = codename.rsplit('.').next().unwrap_or(codename);
                self.store.find_permission(ct, codename)
            }
            PermRef::Definition(def) => {
                if def.target_type != obj.target_type {
                    return Err(WardenError::ValidationFailed(format!(
                        "permission '{}' belongs to {}, target is {}",
                        def.codename,
                        def.target_type.key(),
                        obj.target_type.key()
                    )));
                }
                Ok(def.id)
            }
        }
    }

    /// Assign a permission on one target. Idempotent: an existing grant for
    /// the same triple is returned as-is, which also makes concurrent
    /// duplicate assigns race-tolerant.
    pub fn assign<'a>(
        &self,
        perm: impl Into<PermRef<'a>>,
        principal: PrincipalRef,
        obj: &ObjectRef,
    ) -> Result<GrantRow> {
        let pk = obj.require_pk()?.to_string();
        let permission = self.resolve_perm(perm.into(), obj)?;
        let ct = self.store.content_type_id(&obj.target_type)?;
        let (row, created) = self.store.get_or_create_grant(&GrantSpec {
            permission,
            principal,
            content_type: ct,
            object_pk: pk,
        })?;
        if created {
            debug!(grant = ?row.id, %principal, object = %obj, "assigned object permission");
        }
        Ok(row)
    }

    /// Assign the same permission on one target to many principals in a
    /// single atomic insert. A duplicate triple fails the whole batch with
    /// [`WardenError::DuplicateGrant`] unless `ignore_conflicts`.
    pub fn assign_to_many<'a>(
        &self,
        perm: impl Into<PermRef<'a>>,
        principals: &[PrincipalRef],
        obj: &ObjectRef,
        ignore_conflicts: bool,
    ) -> Result<Vec<GrantRow>> {
        let pk = obj.require_pk()?.to_string();
        let permission = self.resolve_perm(perm.into(), obj)?;
        let ct = self.store.content_type_id(&obj.target_type)?;
        let specs: Vec<GrantSpec> = principals
            .iter()
            .map(|principal| GrantSpec {
                permission,
                principal: *principal,
                content_type: ct,
                object_pk: pk.clone(),
            })
            .collect();
        self.store.insert_grants(&specs, ignore_conflicts)
    }

    /// Assign one permission to one principal across many targets.
    ///
    /// Targets the principal already holds the permission on are skipped,
    /// determined via a checker prefetch in O(1) extra queries rather than
    /// one check per target. The remaining inserts are one atomic batch.
    pub fn bulk_assign<'a>(
        &self,
        perm: impl Into<PermRef<'a>>,
        principal: PrincipalRef,
        objects: &[ObjectRef],
        ignore_conflicts: bool,
    ) -> Result<Vec<GrantRow>> {
        let Some(first) = objects.first() else {
            return Ok(Vec::new());
        };
        let permission = self.resolve_perm(perm.into(), first)?;
        let codename = self
            .store
            .permission_codename(permission)
            .unwrap_or_default();
        let ct = self.store.content_type_id(&first.target_type)?;

        let checker = self.checker_for(principal)?;
        checker.prefetch_perms(objects)?;

        let mut specs = Vec::new();
        for obj in objects {
            if obj.target_type != first.target_type {
                return Err(WardenError::MixedContentType(format!(
                    "bulk assign spans {} and {}",
                    first.target_type.key(),
                    obj.target_type.key()
                )));
            }
            let pk = obj.require_pk()?.to_string();
            if checker.get_perms(obj)?.iter().any(|c| *c == codename) {
                continue;
            }
            specs.push(GrantSpec {
                permission,
                principal,
                content_type: ct,
                object_pk: pk,
            });
        }
        self.store.insert_grants(&specs, ignore_conflicts)
    }

    /// Remove one grant via a filter delete. At most one row matches;
    /// removing a never-assigned triple reports a zero count.
    pub fn remove<'a>(
        &self,
        perm: impl Into<PermRef<'a>>,
        principal: PrincipalRef,
        obj: &ObjectRef,
    ) -> Result<RemovalReport> {
        let pk = obj.require_pk()?.to_string();
        let permission = self.resolve_perm(perm.into(), obj)?;
        let ct = self.store.content_type_id(&obj.target_type)?;
        let filter = GrantFilter {
            principal: Some(principal),
            permission: Some(permission),
            object_pks: Some(std::iter::once(pk).collect()),
        };
        Ok(self.store.delete_grants(ct, &filter))
    }

    /// Remove one permission from one principal across many targets.
    pub fn bulk_remove<'a>(
        &self,
        perm: impl Into<PermRef<'a>>,
        principal: PrincipalRef,
        objects: &[ObjectRef],
    ) -> Result<RemovalReport> {
        let Some(first) = objects.first() else {
            return Ok((0, BTreeMap::new()));
        };
        let permission = self.resolve_perm(perm.into(), first)?;
        let ct = self.store.content_type_id(&first.target_type)?;
        let mut pks: BTreeSet<String> = BTreeSet::new();
        for obj in objects {
            pks.insert(obj.require_pk()?.to_string());
        }
        let filter = GrantFilter {
            principal: Some(principal),
            permission: Some(permission),
            object_pks: Some(pks),
        };
        Ok(self.store.delete_grants(ct, &filter))
    }

    /// Remove one permission on one target from many principals.
    pub fn remove_from_many<'a>(
        &self,
        perm: impl Into<PermRef<'a>>,
        principals: &[PrincipalRef],
        obj: &ObjectRef,
    ) -> Result<RemovalReport> {
        let pk = obj.require_pk()?.to_string();
        let permission = self.resolve_perm(perm.into(), obj)?;
        let ct = self.store.content_type_id(&obj.target_type)?;
        let mut total = 0;
        let mut details: BTreeMap<String, u64> = BTreeMap::new();
        for principal in principals {
            let filter = GrantFilter {
                principal: Some(*principal),
                permission: Some(permission),
                object_pks: Some(std::iter::once(pk.clone()).collect()),
            };
            let (count, per_kind) = self.store.delete_grants(ct, &filter);
            total += count;
            for (label, n) in per_kind {
                *details.entry(label).or_default() += n;
            }
        }
        Ok((total, details))
    }

    fn checker_for(&self, principal: PrincipalRef) -> Result<ObjectPermissionChecker> {
        match principal {
            PrincipalRef::User(id) => {
                let user = self.store.user(id).ok_or_else(|| {
                    WardenError::NotUserNorGroup(format!("unknown user id {}", id.0))
                })?;
                ObjectPermissionChecker::new(&self.store, &self.config, user)
            }
            PrincipalRef::Group(id) => {
                let group = self.store.group(id).ok_or_else(|| {
                    WardenError::NotUserNorGroup(format!("unknown group id {}", id.0))
                })?;
                ObjectPermissionChecker::new(&self.store, &self.config, group)
            }
        }
    }
}
