//! Extension point for additional permission sources.
//!
//! External code can contribute extra codenames for a (principal, object)
//! pair. The checker queries registered sources after its own resolution
//! and merges the results into the cached entry.

use std::sync::Arc;

use crate::principal::PrincipalRef;
use crate::target::ObjectRef;

/// Contributes extra permission codenames beyond what the grant store holds.
pub trait AdditionalPermissionSource: Send + Sync {
    /// Extra codenames the principal holds on the object.
    fn extra_perms(&self, principal: PrincipalRef, obj: &ObjectRef) -> Vec<String>;
}

/// Shared handle to a registered source.
pub type PermissionSourceHandle = Arc<dyn AdditionalPermissionSource>;
