//! Object-set resolution: "list all objects of type T the principal can
//! act on", via direct grants, group grants, and model-wide global grants.
//!
//! Results are lazy [`ObjectQuery`] values, not materialized lists, so
//! callers can compose further restriction before evaluating.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::WardenConfig;
use crate::error::{Result, WardenError};
use crate::identity::{resolve_identity, Identity, IdentityInput};
use crate::store::Store;
use crate::target::{ContentTypeId, ObjectRef, TargetType};

/// Restriction an [`ObjectQuery`] applies over the live objects of a type.
#[derive(Debug, Clone)]
enum Restriction {
    /// Every live instance.
    All,
    /// Only these primary keys (intersected with live instances at
    /// evaluation time).
    Pks(BTreeSet<String>),
}

/// Lazy, composable set of objects of one target type.
///
/// Nothing is fetched until an evaluating method (`pks`, `resolve`,
/// `contains`, `count`) is called.
#[derive(Debug, Clone)]
pub struct ObjectQuery {
    store: Store,
    target_type: TargetType,
    ct: ContentTypeId,
    restriction: Restriction,
}

impl ObjectQuery {
    /// Query over every live instance of the type.
    pub fn all(store: &Store, target_type: &TargetType) -> Result<Self> {
        let ct = store.content_type_id(target_type)?;
        Ok(Self {
            store: store.clone(),
            target_type: target_type.clone(),
            ct,
            restriction: Restriction::All,
        })
    }

    fn with_pks(&self, pks: BTreeSet<String>) -> Self {
        Self {
            store: self.store.clone(),
            target_type: self.target_type.clone(),
            ct: self.ct,
            restriction: Restriction::Pks(pks),
        }
    }

    /// The type this query ranges over.
    pub fn target_type(&self) -> &TargetType {
        &self.target_type
    }

    /// Evaluate to the matching primary keys.
    pub fn pks(&self) -> BTreeSet<String> {
        let live = self.store.all_pks(self.ct);
        match &self.restriction {
            Restriction::All => live,
            Restriction::Pks(pks) => live.intersection(pks).cloned().collect(),
        }
    }

    /// Evaluate to object references.
    pub fn resolve(&self) -> Vec<ObjectRef> {
        self.pks()
            .into_iter()
            .map(|pk| ObjectRef::new(self.target_type.clone(), pk))
            .collect()
    }

    /// Whether the object is in the result set.
    pub fn contains(&self, obj: &ObjectRef) -> bool {
        obj.target_type == self.target_type
            && obj
                .pk
                .as_ref()
                .map(|pk| self.pks().contains(pk))
                .unwrap_or(false)
    }

    /// Number of matching objects.
    pub fn count(&self) -> usize {
        self.pks().len()
    }

    /// Whether the result set is empty.
    pub fn is_empty(&self) -> bool {
        self.pks().is_empty()
    }

    /// Narrow the query to the given primary keys, lazily.
    pub fn restrict(&self, pks: &BTreeSet<String>) -> Self {
        match &self.restriction {
            Restriction::All => self.with_pks(pks.clone()),
            Restriction::Pks(existing) => {
                self.with_pks(existing.intersection(pks).cloned().collect())
            }
        }
    }

    fn restriction_pks(&self) -> Option<&BTreeSet<String>> {
        match &self.restriction {
            Restriction::All => None,
            Restriction::Pks(pks) => Some(pks),
        }
    }
}

/// Options for [`get_objects_for_user`].
#[derive(Debug, Clone)]
pub struct ObjectsForUserOptions {
    /// Also accept grants reached through group membership.
    pub use_groups: bool,
    /// Union semantics: any one listed permission suffices.
    pub any_perm: bool,
    /// Superusers short-circuit to every instance.
    pub with_superuser: bool,
}

impl Default for ObjectsForUserOptions {
    fn default() -> Self {
        Self {
            use_groups: true,
            any_perm: false,
            with_superuser: true,
        }
    }
}

/// Parsed permission list: one shared target type plus bare codenames.
struct ParsedPerms {
    ct: ContentTypeId,
    target_type: TargetType,
    codenames: BTreeSet<String>,
}

/// Parse codenames, enforce app-label homogeneity, and settle the target
/// type from the labels and/or the candidate set.
fn parse_perms(
    store: &Store,
    perms: &[&str],
    klass: Option<&ObjectQuery>,
) -> Result<ParsedPerms> {
    let mut app_label: Option<String> = None;
    let mut ct: Option<ContentTypeId> = None;
    let mut codenames: BTreeSet<String> = BTreeSet::new();

    for perm in perms {
        let codename = match perm.split_once('.') {
            Some((label, codename)) => {
                if let Some(existing) = &app_label {
                    if existing != label {
                        return Err(WardenError::MixedContentType(format!(
                            "given perms must have same app label ({existing} != {label})"
                        )));
                    }
                } else {
                    app_label = Some(label.to_string());
                }
                codename
            }
            None => perm,
        };
        codenames.insert(codename.to_string());
        if let Some(label) = &app_label {
            let found = store.content_type_by_permission(label, codename)?;
            if let Some(existing) = ct {
                if existing != found {
                    return Err(WardenError::MixedContentType(format!(
                        "content type was once computed to be {} and another one {}",
                        existing.0, found.0
                    )));
                }
            } else {
                ct = Some(found);
            }
        }
    }

    let (ct, target_type) = match (ct, klass) {
        (None, None) => {
            return Err(WardenError::WrongApp(
                "cannot determine content type".to_string(),
            ))
        }
        (None, Some(query)) => (query.ct, query.target_type.clone()),
        (Some(ct), None) => {
            let target_type = store
                .target_type_of(ct)
                .ok_or_else(|| WardenError::UnknownTargetType(format!("id {}", ct.0)))?;
            (ct, target_type)
        }
        (Some(ct), Some(query)) => {
            if ct != query.ct {
                return Err(WardenError::MixedContentType(
                    "content type for given perms and klass differs".to_string(),
                ));
            }
            (ct, query.target_type.clone())
        }
    };

    Ok(ParsedPerms {
        ct,
        target_type,
        codenames,
    })
}

fn select_pks(
    pairs: Vec<(String, String)>,
    codenames: &BTreeSet<String>,
    required: &BTreeSet<String>,
    any_perm: bool,
) -> BTreeSet<String> {
    let mut by_pk: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (pk, codename) in pairs {
        by_pk.entry(pk).or_default().insert(codename);
    }
    by_pk
        .into_iter()
        .filter(|(_, held)| {
            if any_perm {
                held.intersection(codenames).next().is_some()
            } else {
                required.is_subset(held)
            }
        })
        .map(|(pk, _)| pk)
        .collect()
}

/// Objects of one type the user can act on through the listed permissions.
///
/// With several codenames the default is intersection semantics (the user
/// must hold all of them, counting model-wide global grants toward the
/// codenames they cover); `any_perm` switches to union, where a global
/// grant for any listed codename widens the result to every instance.
pub fn get_objects_for_user(
    store: &Store,
    config: &WardenConfig,
    who: impl Into<IdentityInput>,
    perms: &[&str],
    klass: Option<ObjectQuery>,
    opts: &ObjectsForUserOptions,
) -> Result<ObjectQuery> {
    let user = match resolve_identity(store, config, who.into())? {
        Identity::User(user) => user,
        _ => {
            return Err(WardenError::NotUserNorGroup(
                "a single user is required".to_string(),
            ))
        }
    };
    let parsed = parse_perms(store, perms, klass.as_ref())?;
    let base = match klass {
        Some(query) => query,
        None => ObjectQuery::all(store, &parsed.target_type)?,
    };

    // Vacuous permission requirement: all instances of the type.
    if parsed.codenames.is_empty() {
        return Ok(base);
    }
    if config.active_only && !user.is_active {
        return Ok(base.with_pks(BTreeSet::new()));
    }
    if opts.with_superuser && user.is_superuser {
        return Ok(base);
    }

    let global: BTreeSet<String> = store
        .user_global_codenames(user.id, parsed.ct)
        .intersection(&parsed.codenames)
        .cloned()
        .collect();
    if opts.any_perm && !global.is_empty() {
        return Ok(base);
    }
    let required: BTreeSet<String> = parsed
        .codenames
        .difference(&global)
        .cloned()
        .collect();
    if required.is_empty() {
        // Every listed codename is satisfied globally.
        return Ok(base);
    }

    let pk_filter = base.restriction_pks();
    let mut pairs = store.user_grant_pairs(user.id, parsed.ct, Some(&parsed.codenames), pk_filter);
    if opts.use_groups {
        pairs.extend(store.user_group_grant_pairs(
            user.id,
            parsed.ct,
            Some(&parsed.codenames),
            pk_filter,
        ));
    }
    let selected = select_pks(pairs, &parsed.codenames, &required, opts.any_perm);
    Ok(base.with_pks(selected))
}

/// Objects of one type the group can act on through the listed permissions.
/// Mirrors [`get_objects_for_user`] without the group-membership union.
pub fn get_objects_for_group(
    store: &Store,
    config: &WardenConfig,
    who: impl Into<IdentityInput>,
    perms: &[&str],
    klass: Option<ObjectQuery>,
    any_perm: bool,
) -> Result<ObjectQuery> {
    let group = match resolve_identity(store, config, who.into())? {
        Identity::Group(group) => group,
        _ => {
            return Err(WardenError::NotUserNorGroup(
                "a single group is required".to_string(),
            ))
        }
    };
    let parsed = parse_perms(store, perms, klass.as_ref())?;
    let base = match klass {
        Some(query) => query,
        None => ObjectQuery::all(store, &parsed.target_type)?,
    };

    if parsed.codenames.is_empty() {
        return Ok(base);
    }

    let global: BTreeSet<String> = store
        .group_global_codenames(group.id, parsed.ct)
        .intersection(&parsed.codenames)
        .cloned()
        .collect();
    if any_perm && !global.is_empty() {
        return Ok(base);
    }
    let required: BTreeSet<String> = parsed
        .codenames
        .difference(&global)
        .cloned()
        .collect();
    if required.is_empty() {
        return Ok(base);
    }

    let pk_filter = base.restriction_pks();
    let pairs = store.group_grant_pairs(group.id, parsed.ct, Some(&parsed.codenames), pk_filter);
    let selected = select_pks(pairs, &parsed.codenames, &required, any_perm);
    Ok(base.with_pks(selected))
}
