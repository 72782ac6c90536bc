//! The caching permission checker.
//!
//! Answers "does principal P have permission X on object O" and "list all
//! permissions P has on O". Once an object has been checked, its full
//! codename list is memoized under `(content_type, pk)` and no further
//! queries are issued for that key — including after a later assign or
//! remove on the same checker instance; construct a new checker (or a new
//! cache) to observe mutations.

use std::collections::BTreeSet;

use tracing::debug;

use crate::cache::{CacheKey, PermissionCache};
use crate::config::WardenConfig;
use crate::error::{Result, WardenError};
use crate::extension::PermissionSourceHandle;
use crate::identity::{resolve_identity, Identity, IdentityInput};
use crate::principal::{Group, PrincipalRef, User};
use crate::store::Store;
use crate::target::{ContentTypeId, ObjectRef};

/// The single principal a checker is bound to.
#[derive(Debug, Clone)]
enum CheckerPrincipal {
    User(User),
    Group(Group),
}

/// Caching object-permission checker bound to one principal.
pub struct ObjectPermissionChecker {
    store: Store,
    config: WardenConfig,
    principal: CheckerPrincipal,
    cache: PermissionCache,
    sources: Vec<PermissionSourceHandle>,
}

impl ObjectPermissionChecker {
    /// Construct a checker with a fresh private cache.
    pub fn new(
        store: &Store,
        config: &WardenConfig,
        input: impl Into<IdentityInput>,
    ) -> Result<Self> {
        Self::with_cache(store, config, input, PermissionCache::new())
    }

    /// Construct a checker sharing a caller-owned cache. Several checkers
    /// built for the same principal within one request can share fetched
    /// state this way.
    pub fn with_cache(
        store: &Store,
        config: &WardenConfig,
        input: impl Into<IdentityInput>,
        cache: PermissionCache,
    ) -> Result<Self> {
        let principal = match resolve_identity(store, config, input.into())? {
            Identity::User(user) => CheckerPrincipal::User(user),
            Identity::Group(group) => CheckerPrincipal::Group(group),
            Identity::Users(_) | Identity::Groups(_) => {
                return Err(WardenError::NotUserNorGroup(
                    "a checker binds to a single user or group".to_string(),
                ))
            }
        };
        Ok(Self {
            store: store.clone(),
            config: config.clone(),
            principal,
            cache,
            sources: Vec::new(),
        })
    }

    /// Register an additional permission source consulted after the store.
    pub fn add_source(&mut self, source: PermissionSourceHandle) {
        self.sources.push(source);
    }

    /// The user this checker is bound to, if any.
    pub fn user(&self) -> Option<&User> {
        match &self.principal {
            CheckerPrincipal::User(user) => Some(user),
            CheckerPrincipal::Group(_) => None,
        }
    }

    /// The group this checker is bound to, if any.
    pub fn group(&self) -> Option<&Group> {
        match &self.principal {
            CheckerPrincipal::Group(group) => Some(group),
            CheckerPrincipal::User(_) => None,
        }
    }

    /// The cache backing this checker.
    pub fn cache(&self) -> &PermissionCache {
        &self.cache
    }

    fn principal_ref(&self) -> PrincipalRef {
        match &self.principal {
            CheckerPrincipal::User(user) => PrincipalRef::User(user.id),
            CheckerPrincipal::Group(group) => PrincipalRef::Group(group.id),
        }
    }

    fn inactive_user(&self) -> bool {
        self.config.active_only
            && matches!(&self.principal, CheckerPrincipal::User(user) if !user.is_active)
    }

    fn superuser(&self) -> bool {
        matches!(&self.principal, CheckerPrincipal::User(user) if user.is_superuser)
    }

    /// Whether the principal has the permission on the object.
    ///
    /// `perm` may carry an `app_label.` prefix, which is stripped.
    /// Inactive users short-circuit to `false` and superusers to `true`,
    /// both without touching the store.
    pub fn has_perm(&self, perm: &str, obj: &ObjectRef) -> Result<bool> {
        let codename = perm.rsplit('.').next().unwrap_or(perm);
        if self.inactive_user() {
            return Ok(false);
        }
        if self.superuser() {
            return Ok(true);
        }
        Ok(self.get_perms(obj)?.iter().any(|c| c == codename))
    }

    /// All permission codenames the principal holds on the object, sorted.
    ///
    /// The first call for a given `(content_type, pk)` key issues the
    /// combined query path and memoizes the result; later calls for the
    /// same key never re-query. With `auto_prefetch` enabled, a key that
    /// was not primed returns empty instead of falling back to a query.
    pub fn get_perms(&self, obj: &ObjectRef) -> Result<Vec<String>> {
        if self.inactive_user() {
            return Ok(Vec::new());
        }
        let pk = obj.require_pk()?.to_string();
        let ct = self.store.content_type_id(&obj.target_type)?;
        let key: CacheKey = (ct, pk.clone());

        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }
        if self.config.auto_prefetch {
            debug!(object = %obj, "auto-prefetch mode: unprimed key reports no permissions");
            return Ok(Vec::new());
        }

        let mut perms: BTreeSet<String> = match &self.principal {
            CheckerPrincipal::User(user) if user.is_superuser => {
                self.store.all_codenames(ct).into_iter().collect()
            }
            CheckerPrincipal::User(user) => {
                let single: BTreeSet<String> = std::iter::once(pk.clone()).collect();
                let direct = self
                    .store
                    .user_grant_pairs(user.id, ct, None, Some(&single));
                let via_groups = self
                    .store
                    .user_group_grant_pairs(user.id, ct, None, Some(&single));
                direct
                    .into_iter()
                    .chain(via_groups)
                    .map(|(_, codename)| codename)
                    .collect()
            }
            CheckerPrincipal::Group(group) => {
                let single: BTreeSet<String> = std::iter::once(pk.clone()).collect();
                self.store
                    .group_grant_pairs(group.id, ct, None, Some(&single))
                    .into_iter()
                    .map(|(_, codename)| codename)
                    .collect()
            }
        };
        for source in &self.sources {
            perms.extend(source.extra_perms(self.principal_ref(), obj));
        }

        let perms: Vec<String> = perms.into_iter().collect();
        self.cache.insert(key, perms.clone());
        Ok(perms)
    }

    /// Prime the cache for every object in one pass: at most two counted
    /// queries regardless of collection size, pre-seeding empty entries for
    /// objects with no grants so a later miss is a true cache hit.
    pub fn prefetch_perms(&self, objects: &[ObjectRef]) -> Result<bool> {
        if objects.is_empty() {
            return Ok(true);
        }
        let target_type = &objects[0].target_type;
        let mut pks: BTreeSet<String> = BTreeSet::new();
        for obj in objects {
            if obj.target_type != *target_type {
                return Err(WardenError::MixedContentType(format!(
                    "prefetch spans {} and {}",
                    target_type.key(),
                    obj.target_type.key()
                )));
            }
            pks.insert(obj.require_pk()?.to_string());
        }
        let ct = self.store.content_type_id(target_type)?;

        if self.inactive_user() {
            for pk in &pks {
                self.cache.insert((ct, pk.clone()), Vec::new());
            }
            return Ok(true);
        }

        if self.superuser() {
            // One query: the full codename list for the type, attached
            // identically to every prefetched object.
            let all = self.store.all_codenames(ct);
            for obj in objects {
                let pk = obj.require_pk()?.to_string();
                self.seed(ct, pk, all.iter().cloned().collect(), obj);
            }
            return Ok(true);
        }

        let pairs: Vec<(String, String)> = match &self.principal {
            CheckerPrincipal::User(user) => {
                let mut pairs = self.store.user_grant_pairs(user.id, ct, None, Some(&pks));
                pairs.extend(self.store.user_group_grant_pairs(user.id, ct, None, Some(&pks)));
                pairs
            }
            CheckerPrincipal::Group(group) => {
                self.store.group_grant_pairs(group.id, ct, None, Some(&pks))
            }
        };

        let mut by_pk: std::collections::HashMap<String, BTreeSet<String>> =
            std::collections::HashMap::new();
        for (pk, codename) in pairs {
            by_pk.entry(pk).or_default().insert(codename);
        }
        for obj in objects {
            let pk = obj.require_pk()?.to_string();
            let perms = by_pk.get(&pk).cloned().unwrap_or_default();
            self.seed(ct, pk, perms, obj);
        }
        debug!(count = pks.len(), principal = %self.principal_ref(), "prefetched permissions");
        Ok(true)
    }

    /// Seed one cache entry, merging registered sources so a prefetched key
    /// holds the same codenames the lazy path would have produced.
    fn seed(&self, ct: ContentTypeId, pk: String, mut perms: BTreeSet<String>, obj: &ObjectRef) {
        for source in &self.sources {
            perms.extend(source.extra_perms(self.principal_ref(), obj));
        }
        self.cache.insert((ct, pk), perms.into_iter().collect());
    }
}
