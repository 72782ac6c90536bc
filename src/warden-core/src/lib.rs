//! Warden Core - per-object permission grants and checks.
//!
//! Augments a model-wide "has permission" check with a fine-grained
//! "has permission on this instance" check backed by persisted grants:
//!
//! - **Identity resolution**: users, groups, homogeneous collections, and
//!   an anonymous marker mapped to a configured sentinel user.
//! - **Grant store**: (principal, permission, target) triples with generic
//!   or direct target linkage, uniqueness enforced, atomic bulk writes.
//! - **Checker**: caching single-object checks with a prefetch mode that
//!   primes N objects in at most two queries.
//! - **Object-set resolver**: lazy "all objects the principal can act on"
//!   queries with intersection/union semantics and global-grant handling.
//! - **Orphan reclaimer**: batched cleanup of grants whose target is gone.
//!
//! # Usage
//!
//! ```rust
//! use warden_core::{assign_perm, Linkage, ObjectPermissionChecker, Store, WardenConfig};
//!
//! fn main() -> warden_core::Result<()> {
//!     let store = Store::new();
//!     let config = WardenConfig::default();
//!     let task_type = store.register_target_type(
//!         "tasker",
//!         "Task",
//!         Linkage::Generic,
//!         &[("view_task", "Can view task"), ("change_task", "Can change task")],
//!     );
//!     let task = store.create_object(&task_type)?;
//!     let joe = store.create_user("joe");
//!
//!     assign_perm(&store, &config, "change_task", joe.clone(), &task)?;
//!
//!     let checker = ObjectPermissionChecker::new(&store, &config, joe)?;
//!     assert!(checker.has_perm("change_task", &task)?);
//!     Ok(())
//! }
//! ```

pub mod anonymous;
pub mod cache;
pub mod checker;
pub mod client;
pub mod config;
pub mod error;
pub mod extension;
pub mod identity;
pub mod linkage;
pub mod manager;
pub mod model;
pub mod principal;
pub mod reclaim;
pub mod registry;
pub mod resolver;
pub mod shortcuts;
pub mod store;
pub mod target;

#[cfg(test)]
mod tests;

// Re-export main types at crate root
pub use anonymous::{anonymous_user, invalidate_anonymous_cache};
pub use cache::{CacheKey, PermissionCache};
pub use checker::ObjectPermissionChecker;
pub use client::AuthorizationClient;
pub use config::WardenConfig;
pub use error::{Result, WardenError};
pub use extension::{AdditionalPermissionSource, PermissionSourceHandle};
pub use identity::{resolve_identity, Identity, IdentityInput};
pub use linkage::Linkage;
pub use manager::{GrantManager, PermRef, RemovalReport};
pub use model::{
    GrantFilter, GrantId, GrantRow, GrantSpec, PermissionDefinition, PermissionId, StoreSnapshot,
};
pub use principal::{Group, GroupId, PrincipalRef, Subject, User, UserId};
pub use reclaim::{reclaim_orphans, ReclaimOptions};
pub use registry::PermissionRegistry;
pub use resolver::{get_objects_for_group, get_objects_for_user, ObjectQuery, ObjectsForUserOptions};
pub use shortcuts::{
    assign_perm, get_group_perms, get_groups_with_perms, get_groups_with_perms_attached,
    get_perms, get_user_perms, get_users_with_perms, get_users_with_perms_attached, remove_perm,
    Assigned, CommitOutcome, GrantBatch, TargetInput, UsersWithPermsOptions,
};
pub use store::Store;
pub use target::{ContentTypeId, ObjectRef, TargetType, TypeRef};
