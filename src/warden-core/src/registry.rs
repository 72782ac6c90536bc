//! Read-only permission registry.
//!
//! Thin lookup layer over the store's permission definitions. A target type
//! may be spelled as a type handle, an object instance, or an `"app.Model"`
//! string; all three resolve identically.

use crate::error::Result;
use crate::model::PermissionDefinition;
use crate::store::Store;
use crate::target::TypeRef;

/// Registry of permission definitions scoped to target types.
#[derive(Debug, Clone)]
pub struct PermissionRegistry {
    store: Store,
}

impl PermissionRegistry {
    /// Create a registry over the given store.
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Look up one permission definition by target type and codename.
    pub fn lookup<'a>(
        &self,
        type_ref: impl Into<TypeRef<'a>>,
        codename: &str,
    ) -> Result<PermissionDefinition> {
        let target_type = type_ref.into().resolve()?;
        let ct = self.store.content_type_id(&target_type)?;
        let id = self.store.find_permission(ct, codename)?;
        self.store
            .permissions_for(ct)
            .into_iter()
            .find(|p| p.id == id)
            .ok_or(crate::error::WardenError::PermissionNotFound {
                target_type: target_type.key(),
                codename: codename.to_string(),
            })
    }

    /// All permission definitions for a target type, sorted by codename.
    pub fn permissions_for<'a>(
        &self,
        type_ref: impl Into<TypeRef<'a>>,
    ) -> Result<Vec<PermissionDefinition>> {
        let target_type = type_ref.into().resolve()?;
        let ct = self.store.content_type_id(&target_type)?;
        let mut perms = self.store.permissions_for(ct);
        perms.sort_by(|a, b| a.codename.cmp(&b.codename));
        Ok(perms)
    }
}
