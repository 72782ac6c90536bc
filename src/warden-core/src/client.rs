//! Authorization client: a principal-bound convenience wrapper.
//!
//! Bundles a store, configuration and one resolved principal behind the
//! helper methods a request handler wants, sharing one permission cache
//! across every check made through the same client. This replaces the
//! original's injection of helper methods onto the principal types.

use crate::cache::PermissionCache;
use crate::checker::ObjectPermissionChecker;
use crate::config::WardenConfig;
use crate::error::{Result, WardenError};
use crate::identity::{resolve_identity, Identity, IdentityInput};
use crate::resolver::{self, ObjectQuery, ObjectsForUserOptions};
use crate::shortcuts::{self, Assigned, TargetInput};
use crate::store::Store;
use crate::target::ObjectRef;

/// Principal-bound facade over the permission core.
pub struct AuthorizationClient {
    store: Store,
    config: WardenConfig,
    identity: Identity,
    cache: PermissionCache,
}

impl AuthorizationClient {
    /// Bind a client to a single user or group.
    pub fn new(
        store: &Store,
        config: &WardenConfig,
        who: impl Into<IdentityInput>,
    ) -> Result<Self> {
        let identity = resolve_identity(store, config, who.into())?;
        if identity.is_collection() {
            return Err(WardenError::NotUserNorGroup(
                "a client binds to a single user or group".to_string(),
            ));
        }
        Ok(Self {
            store: store.clone(),
            config: config.clone(),
            identity,
            cache: PermissionCache::new(),
        })
    }

    fn checker(&self) -> Result<ObjectPermissionChecker> {
        let input = match &self.identity {
            Identity::User(user) => IdentityInput::User(user.clone()),
            Identity::Group(group) => IdentityInput::Group(group.clone()),
            _ => unreachable!("collections are rejected at construction"),
        };
        ObjectPermissionChecker::with_cache(&self.store, &self.config, input, self.cache.clone())
    }

    /// Whether the principal holds the permission on the object.
    pub fn has_perm(&self, perm: &str, obj: &ObjectRef) -> Result<bool> {
        self.checker()?.has_perm(perm, obj)
    }

    /// All codenames the principal holds on the object.
    pub fn get_perms(&self, obj: &ObjectRef) -> Result<Vec<String>> {
        self.checker()?.get_perms(obj)
    }

    /// Prime the shared cache for a collection of objects.
    pub fn prefetch_perms(&self, objects: &[ObjectRef]) -> Result<bool> {
        self.checker()?.prefetch_perms(objects)
    }

    /// Assign a permission to this principal on the object.
    ///
    /// Checks made through this client before the assign keep reporting the
    /// cached state; construct a new client to observe the change.
    pub fn assign_perm(&self, perm: &str, obj: &ObjectRef) -> Result<Assigned> {
        shortcuts::assign_perm(
            &self.store,
            &self.config,
            perm,
            self.identity_input(),
            TargetInput::Object(obj),
        )
    }

    /// Remove a permission from this principal on the object.
    pub fn remove_perm(&self, perm: &str, obj: &ObjectRef) -> Result<u64> {
        let (count, _) = shortcuts::remove_perm(
            &self.store,
            &self.config,
            perm,
            self.identity_input(),
            TargetInput::Object(obj),
        )?;
        Ok(count)
    }

    /// Objects the principal can act on through the listed permissions.
    pub fn objects_with_perm(
        &self,
        perms: &[&str],
        klass: Option<ObjectQuery>,
        opts: &ObjectsForUserOptions,
    ) -> Result<ObjectQuery> {
        match &self.identity {
            Identity::User(_) => resolver::get_objects_for_user(
                &self.store,
                &self.config,
                self.identity_input(),
                perms,
                klass,
                opts,
            ),
            Identity::Group(_) => resolver::get_objects_for_group(
                &self.store,
                &self.config,
                self.identity_input(),
                perms,
                klass,
                opts.any_perm,
            ),
            _ => unreachable!("collections are rejected at construction"),
        }
    }

    fn identity_input(&self) -> IdentityInput {
        match &self.identity {
            Identity::User(user) => IdentityInput::User(user.clone()),
            Identity::Group(group) => IdentityInput::Group(group.clone()),
            _ => unreachable!("collections are rejected at construction"),
        }
    }
}
