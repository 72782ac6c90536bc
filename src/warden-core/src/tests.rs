//! Tests for the warden permission core.
//!
//! Coverage:
//! 1. Identity resolution
//! 2. Registry and linkage strategies
//! 3. Grant managers (single and bulk)
//! 4. The caching checker and prefetch
//! 5. Object-set resolution laws
//! 6. Stage-then-commit batches
//! 7. Orphan reclamation
//! 8. Snapshots and configuration

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::*;

const TASK_PERMS: &[(&str, &str)] = &[
    ("view_task", "Can view task"),
    ("change_task", "Can change task"),
    ("delete_task", "Can delete task"),
];

fn setup() -> (Store, WardenConfig, TargetType) {
    let store = Store::new();
    let config = WardenConfig::default();
    let task_type = store.register_target_type("tasker", "Task", Linkage::Generic, TASK_PERMS);
    (store, config, task_type)
}

fn perms_of(store: &Store, config: &WardenConfig, who: User, obj: &ObjectRef) -> Vec<String> {
    get_perms(store, config, who, obj).unwrap()
}

// ============================================================================
// Identity Resolution Tests
// ============================================================================

mod identity_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_single_user_resolves_to_user_side() {
        let (store, config, _) = setup();
        let joe = store.create_user("joe");
        let identity = resolve_identity(&store, &config, joe.clone().into()).unwrap();
        assert_eq!(identity.as_user(), Some(&joe));
        assert!(identity.as_group().is_none());
    }

    #[test]
    fn test_single_group_resolves_to_group_side() {
        let (store, config, _) = setup();
        let admins = store.create_group("admins");
        let identity = resolve_identity(&store, &config, admins.clone().into()).unwrap();
        assert_eq!(identity.as_group(), Some(&admins));
        assert!(identity.as_user().is_none());
    }

    #[test]
    fn test_user_collection_resolves_to_users() {
        let (store, config, _) = setup();
        let users = vec![store.create_user("a"), store.create_user("b")];
        let identity = resolve_identity(&store, &config, users.into()).unwrap();
        assert!(matches!(identity, Identity::Users(ref u) if u.len() == 2));
        assert!(identity.is_collection());
    }

    #[test]
    fn test_mixed_collection_is_rejected() {
        let (store, config, _) = setup();
        let joe = store.create_user("joe");
        let admins = store.create_group("admins");
        let input = IdentityInput::Subjects(vec![joe.into(), admins.into()]);
        let result = resolve_identity(&store, &config, input);
        assert!(matches!(result, Err(WardenError::NotUserNorGroup(_))));
    }

    #[test]
    fn test_empty_collection_is_rejected() {
        let (store, config, _) = setup();
        let input = IdentityInput::Subjects(Vec::new());
        let result = resolve_identity(&store, &config, input);
        assert!(matches!(result, Err(WardenError::NotUserNorGroup(_))));
    }

    #[test]
    fn test_anonymous_resolves_to_sentinel_user() {
        let (store, config, _) = setup();
        let sentinel = store.create_user(&config.anonymous_user_name);
        let identity = resolve_identity(&store, &config, IdentityInput::Anonymous).unwrap();
        assert_eq!(identity.as_user().map(|u| u.id), Some(sentinel.id));
    }

    #[test]
    fn test_anonymous_rejected_when_disabled() {
        let (store, _, _) = setup();
        let config = WardenConfig {
            anonymous_enabled: false,
            ..WardenConfig::default()
        };
        store.create_user(&config.anonymous_user_name);
        let result = resolve_identity(&store, &config, IdentityInput::Anonymous);
        assert!(matches!(result, Err(WardenError::NotUserNorGroup(_))));
    }

    #[test]
    fn test_anonymous_with_missing_sentinel_is_rejected() {
        let (store, _, _) = setup();
        let config = WardenConfig {
            anonymous_user_name: "NoSuchSentinel".to_string(),
            ..WardenConfig::default()
        };
        let result = resolve_identity(&store, &config, IdentityInput::Anonymous);
        assert!(matches!(result, Err(WardenError::NotUserNorGroup(_))));
    }
}

// ============================================================================
// Registry Tests
// ============================================================================

mod registry_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_lookup_accepts_all_three_type_spellings() {
        let (store, _, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let registry = PermissionRegistry::new(store);

        let by_handle = registry.lookup(&task_type, "view_task").unwrap();
        let by_instance = registry.lookup(&task, "view_task").unwrap();
        let by_name = registry.lookup("tasker.Task", "view_task").unwrap();
        assert_eq!(by_handle, by_instance);
        assert_eq!(by_handle, by_name);
        assert_eq!(by_handle.codename, "view_task");
        assert_eq!(by_handle.target_type.key(), "tasker.Task");
    }

    #[test]
    fn test_lookup_missing_codename_fails() {
        let (store, _, task_type) = setup();
        let registry = PermissionRegistry::new(store);
        let result = registry.lookup(&task_type, "fly_task");
        assert!(matches!(result, Err(WardenError::PermissionNotFound { .. })));
    }

    #[test]
    fn test_permissions_for_returns_all_sorted() {
        let (store, _, task_type) = setup();
        let registry = PermissionRegistry::new(store);
        let perms = registry.permissions_for(&task_type).unwrap();
        let codenames: Vec<&str> = perms.iter().map(|p| p.codename.as_str()).collect();
        assert_eq!(codenames, vec!["change_task", "delete_task", "view_task"]);
    }

    #[test]
    fn test_bad_type_name_fails() {
        let (store, _, _) = setup();
        let registry = PermissionRegistry::new(store);
        assert!(registry.permissions_for("no-dot").is_err());
        assert!(registry.permissions_for("other.Unknown").is_err());
    }
}

// ============================================================================
// Linkage Tests
// ============================================================================

mod linkage_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_generic_linkage_shape() {
        assert!(Linkage::Generic.is_generic());
        assert_eq!(Linkage::Generic.join_field(), "object_pk");
        assert_eq!(Linkage::default(), Linkage::Generic);
    }

    #[test]
    fn test_direct_linkage_shape() {
        assert!(!Linkage::Direct.is_generic());
        assert_eq!(Linkage::Direct.join_field(), "target_id");
    }

    #[test]
    fn test_store_remembers_per_type_linkage() {
        let (store, _, task_type) = setup();
        let note_type = store.register_target_type(
            "notes",
            "Note",
            Linkage::Direct,
            &[("view_note", "Can view note")],
        );
        let task_ct = store.content_type_id(&task_type).unwrap();
        let note_ct = store.content_type_id(&note_type).unwrap();
        assert!(store.linkage_of(task_ct).is_generic());
        assert!(!store.linkage_of(note_ct).is_generic());
    }
}

// ============================================================================
// Grant Manager Tests
// ============================================================================

mod manager_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_assign_is_idempotent() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        let manager = GrantManager::new(&store, &config);

        let first = manager
            .assign("view_task", PrincipalRef::User(joe.id), &task)
            .unwrap();
        let second = manager
            .assign("view_task", PrincipalRef::User(joe.id), &task)
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.generic_grant_count(), 1);

        let checker = ObjectPermissionChecker::new(&store, &config, joe).unwrap();
        assert!(checker.has_perm("view_task", &task).unwrap());
    }

    #[test]
    fn test_assign_unsaved_object_fails() {
        let (store, config, task_type) = setup();
        let joe = store.create_user("joe");
        let manager = GrantManager::new(&store, &config);
        let ghost = ObjectRef::unsaved(task_type);
        let result = manager.assign("view_task", PrincipalRef::User(joe.id), &ghost);
        assert!(matches!(result, Err(WardenError::ObjectNotPersisted(_))));
    }

    #[test]
    fn test_assign_definition_of_other_type_fails_validation() {
        let (store, config, task_type) = setup();
        let note_type = store.register_target_type(
            "notes",
            "Note",
            Linkage::Generic,
            &[("view_note", "Can view note")],
        );
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        let registry = PermissionRegistry::new(store.clone());
        let note_perm = registry.lookup(&note_type, "view_note").unwrap();

        let manager = GrantManager::new(&store, &config);
        let result = manager.assign(&note_perm, PrincipalRef::User(joe.id), &task);
        assert!(matches!(result, Err(WardenError::ValidationFailed(_))));
    }

    #[test]
    fn test_remove_is_symmetric_and_zero_on_missing() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        let manager = GrantManager::new(&store, &config);

        manager
            .assign("view_task", PrincipalRef::User(joe.id), &task)
            .unwrap();
        let (removed, details) = manager
            .remove("view_task", PrincipalRef::User(joe.id), &task)
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(details.get("warden.UserObjectGrant"), Some(&1));

        let checker = ObjectPermissionChecker::new(&store, &config, joe).unwrap();
        assert!(!checker.has_perm("view_task", &task).unwrap());

        // A never-assigned triple is a no-op, not an error.
        let (removed, _) = manager
            .remove("view_task", PrincipalRef::User(store.create_user("sam").id), &task)
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_assign_to_many_conflict_handling() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let principals: Vec<PrincipalRef> = (0..3)
            .map(|i| PrincipalRef::User(store.create_user(&format!("u{i}")).id))
            .collect();
        let manager = GrantManager::new(&store, &config);

        let rows = manager
            .assign_to_many("view_task", &principals, &task, false)
            .unwrap();
        assert_eq!(rows.len(), 3);

        // Re-running the identical bulk assign is a data-integrity failure...
        let result = manager.assign_to_many("view_task", &principals, &task, false);
        assert!(matches!(result, Err(WardenError::DuplicateGrant(_))));

        // ...unless conflicts are ignored, which leaves exactly 3 grants.
        manager
            .assign_to_many("view_task", &principals, &task, true)
            .unwrap();
        assert_eq!(store.generic_grant_count(), 3);
    }

    #[test]
    fn test_bulk_assign_skips_already_granted_targets() {
        let (store, config, task_type) = setup();
        let objects: Vec<ObjectRef> = (0..3)
            .map(|_| store.create_object(&task_type).unwrap())
            .collect();
        let joe = store.create_user("joe");
        let manager = GrantManager::new(&store, &config);

        manager
            .assign("view_task", PrincipalRef::User(joe.id), &objects[0])
            .unwrap();
        let rows = manager
            .bulk_assign("view_task", PrincipalRef::User(joe.id), &objects, false)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(store.generic_grant_count(), 3);
    }

    #[test]
    fn test_bulk_remove_and_remove_from_many() {
        let (store, config, task_type) = setup();
        let objects: Vec<ObjectRef> = (0..3)
            .map(|_| store.create_object(&task_type).unwrap())
            .collect();
        let joe = store.create_user("joe");
        let sam = store.create_user("sam");
        let manager = GrantManager::new(&store, &config);

        manager
            .bulk_assign("view_task", PrincipalRef::User(joe.id), &objects, false)
            .unwrap();
        let (removed, _) = manager
            .bulk_remove("view_task", PrincipalRef::User(joe.id), &objects)
            .unwrap();
        assert_eq!(removed, 3);

        let who = [PrincipalRef::User(joe.id), PrincipalRef::User(sam.id)];
        manager
            .assign_to_many("change_task", &who, &objects[0], false)
            .unwrap();
        let (removed, _) = manager
            .remove_from_many("change_task", &who, &objects[0])
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.generic_grant_count(), 0);
    }
}

// ============================================================================
// Shortcut Surface Tests
// ============================================================================

mod shortcuts_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_assign_perm_qualified_and_bare() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");

        assign_perm(&store, &config, "tasker.view_task", joe.clone(), &task).unwrap();
        assign_perm(&store, &config, "change_task", joe.clone(), &task).unwrap();
        let perms = perms_of(&store, &config, joe, &task);
        assert_eq!(perms, vec!["change_task", "view_task"]);
    }

    #[test]
    fn test_assign_perm_wrong_app_label_fails() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        let result = assign_perm(&store, &config, "auth.view_task", joe, &task);
        assert!(matches!(result, Err(WardenError::WrongApp(_))));
    }

    #[test]
    fn test_global_assign_requires_qualifier() {
        let (store, config, _) = setup();
        let joe = store.create_user("joe");
        let result = assign_perm(&store, &config, "view_task", joe.clone(), TargetInput::Global);
        assert!(matches!(result, Err(WardenError::WrongApp(_))));

        let assigned =
            assign_perm(&store, &config, "tasker.view_task", joe.clone(), TargetInput::Global)
                .unwrap();
        assert!(matches!(assigned, Assigned::Global(_)));

        let (removed, _) =
            remove_perm(&store, &config, "tasker.view_task", joe, TargetInput::Global).unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_multi_principals_and_multi_targets_rejected() {
        let (store, config, task_type) = setup();
        let objects: Vec<ObjectRef> = (0..2)
            .map(|_| store.create_object(&task_type).unwrap())
            .collect();
        let users = vec![store.create_user("a"), store.create_user("b")];
        let result = assign_perm(&store, &config, "view_task", users, &objects);
        assert!(matches!(result, Err(WardenError::MultipleIdentityAndObject)));
    }

    #[test]
    fn test_assign_perm_to_many_principals() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let users = vec![store.create_user("a"), store.create_user("b")];
        let assigned = assign_perm(&store, &config, "view_task", users.clone(), &task).unwrap();
        assert_eq!(assigned.rows().len(), 2);

        let (removed, _) = remove_perm(&store, &config, "view_task", users, &task).unwrap();
        assert_eq!(removed, 2);
    }

    #[test]
    fn test_get_user_perms_excludes_group_grants() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        let admins = store.create_group("admins");
        store.add_user_to_group(joe.id, admins.id);

        assign_perm(&store, &config, "view_task", joe.clone(), &task).unwrap();
        assign_perm(&store, &config, "delete_task", admins.clone(), &task).unwrap();

        assert_eq!(get_user_perms(&store, &joe, &task).unwrap(), vec!["view_task"]);
        assert_eq!(
            get_group_perms(&store, &config, joe, &task).unwrap(),
            vec!["delete_task"]
        );
        assert_eq!(
            get_group_perms(&store, &config, admins, &task).unwrap(),
            vec!["delete_task"]
        );
    }

    #[test]
    fn test_users_and_groups_with_perms() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let direct = store.create_user("direct");
        let via_group = store.create_user("via_group");
        let root = store.create_superuser("root");
        let admins = store.create_group("admins");
        store.add_user_to_group(via_group.id, admins.id);

        assign_perm(&store, &config, "view_task", direct.clone(), &task).unwrap();
        assign_perm(&store, &config, "delete_task", admins.clone(), &task).unwrap();

        let users = get_users_with_perms(&store, &task, &UsersWithPermsOptions::default()).unwrap();
        let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["direct", "via_group"]);

        let only_direct = get_users_with_perms(
            &store,
            &task,
            &UsersWithPermsOptions {
                with_group_users: false,
                ..UsersWithPermsOptions::default()
            },
        )
        .unwrap();
        assert_eq!(only_direct.len(), 1);
        assert_eq!(only_direct[0].username, "direct");

        let with_root = get_users_with_perms(
            &store,
            &task,
            &UsersWithPermsOptions {
                with_superusers: true,
                ..UsersWithPermsOptions::default()
            },
        )
        .unwrap();
        assert!(with_root.iter().any(|u| u.id == root.id));

        let groups = get_groups_with_perms(&store, &task).unwrap();
        assert_eq!(groups, vec![admins.clone()]);

        let attached =
            get_users_with_perms_attached(&store, &config, &task, &UsersWithPermsOptions::default())
                .unwrap();
        assert_eq!(attached[0].0.username, "direct");
        assert_eq!(attached[0].1, vec!["view_task"]);
        assert_eq!(attached[1].0.username, "via_group");
        assert_eq!(attached[1].1, vec!["delete_task"]);

        let groups_attached = get_groups_with_perms_attached(&store, &config, &task).unwrap();
        assert_eq!(groups_attached[0].0, admins);
        assert_eq!(groups_attached[0].1, vec!["delete_task"]);
    }
}

// ============================================================================
// Checker Tests
// ============================================================================

mod checker_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_user_and_group_grants_combine() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        let admins = store.create_group("admins");
        store.add_user_to_group(joe.id, admins.id);

        assign_perm(&store, &config, "view_task", joe.clone(), &task).unwrap();
        assign_perm(&store, &config, "delete_task", admins, &task).unwrap();

        let perms = perms_of(&store, &config, joe.clone(), &task);
        assert_eq!(perms, vec!["delete_task", "view_task"]);

        remove_perm(&store, &config, "view_task", joe.clone(), &task).unwrap();
        let perms = perms_of(&store, &config, joe, &task);
        assert_eq!(perms, vec!["delete_task"]);
    }

    #[test]
    fn test_has_perm_strips_app_label() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_task", joe.clone(), &task).unwrap();

        let checker = ObjectPermissionChecker::new(&store, &config, joe).unwrap();
        assert!(checker.has_perm("tasker.view_task", &task).unwrap());
        assert!(!checker.has_perm("tasker.delete_task", &task).unwrap());
    }

    #[test]
    fn test_superuser_gets_every_codename_without_grants() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let root = store.create_superuser("root");

        let checker = ObjectPermissionChecker::new(&store, &config, root).unwrap();
        assert!(checker.has_perm("delete_task", &task).unwrap());
        assert_eq!(
            checker.get_perms(&task).unwrap(),
            vec!["change_task", "delete_task", "view_task"]
        );
    }

    #[test]
    fn test_inactive_user_is_excluded_despite_grants() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_task", joe.clone(), &task).unwrap();
        let joe = store.set_user_active(joe.id, false).unwrap();

        let checker = ObjectPermissionChecker::new(&store, &config, joe).unwrap();
        assert!(!checker.has_perm("view_task", &task).unwrap());
        assert!(checker.get_perms(&task).unwrap().is_empty());
    }

    #[test]
    fn test_inactive_user_visible_when_active_only_disabled() {
        let (store, _, task_type) = setup();
        let config = WardenConfig {
            active_only: false,
            ..WardenConfig::default()
        };
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user_with("joe", false, false);
        assign_perm(&store, &config, "view_task", joe.clone(), &task).unwrap();

        let checker = ObjectPermissionChecker::new(&store, &config, joe).unwrap();
        assert!(checker.has_perm("view_task", &task).unwrap());
    }

    #[test]
    fn test_prefetch_makes_checks_query_free() {
        let (store, config, task_type) = setup();
        let objects: Vec<ObjectRef> = (0..4)
            .map(|_| store.create_object(&task_type).unwrap())
            .collect();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_task", joe.clone(), &objects[0]).unwrap();
        assign_perm(&store, &config, "change_task", joe.clone(), &objects[1]).unwrap();

        let checker = ObjectPermissionChecker::new(&store, &config, joe).unwrap();
        checker.prefetch_perms(&objects[..3]).unwrap();

        let before = store.query_count();
        assert!(checker.has_perm("view_task", &objects[0]).unwrap());
        assert!(checker.has_perm("change_task", &objects[1]).unwrap());
        // o3 had no grants; its empty entry was pre-seeded.
        assert!(!checker.has_perm("view_task", &objects[2]).unwrap());
        assert_eq!(store.query_count(), before);

        // The unprefetched object falls back to querying.
        assert!(!checker.has_perm("view_task", &objects[3]).unwrap());
        assert!(store.query_count() > before);
    }

    #[test]
    fn test_auto_prefetch_mode_returns_empty_without_fallback() {
        let (store, _, task_type) = setup();
        let config = WardenConfig {
            auto_prefetch: true,
            ..WardenConfig::default()
        };
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_task", joe.clone(), &task).unwrap();

        let checker = ObjectPermissionChecker::new(&store, &config, joe).unwrap();
        let before = store.query_count();
        assert!(checker.get_perms(&task).unwrap().is_empty());
        assert_eq!(store.query_count(), before);

        checker.prefetch_perms(std::slice::from_ref(&task)).unwrap();
        assert_eq!(checker.get_perms(&task).unwrap(), vec!["view_task"]);
    }

    #[test]
    fn test_superuser_prefetch_is_one_query() {
        let (store, config, task_type) = setup();
        let objects: Vec<ObjectRef> = (0..3)
            .map(|_| store.create_object(&task_type).unwrap())
            .collect();
        let root = store.create_superuser("root");

        let checker = ObjectPermissionChecker::new(&store, &config, root).unwrap();
        let before = store.query_count();
        checker.prefetch_perms(&objects).unwrap();
        assert_eq!(store.query_count(), before + 1);
        for obj in &objects {
            assert_eq!(
                checker.get_perms(obj).unwrap(),
                vec!["change_task", "delete_task", "view_task"]
            );
        }
        assert_eq!(store.query_count(), before + 1);
    }

    #[test]
    fn test_cache_is_stale_after_mutation_by_design() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");

        let checker = ObjectPermissionChecker::new(&store, &config, joe.clone()).unwrap();
        assert!(checker.get_perms(&task).unwrap().is_empty());

        assign_perm(&store, &config, "view_task", joe.clone(), &task).unwrap();
        // Same checker instance keeps reporting the memoized state.
        assert!(checker.get_perms(&task).unwrap().is_empty());
        // A fresh checker sees the new grant.
        let fresh = ObjectPermissionChecker::new(&store, &config, joe).unwrap();
        assert_eq!(fresh.get_perms(&task).unwrap(), vec!["view_task"]);
    }

    #[test]
    fn test_shared_cache_across_checker_instances() {
        let (store, config, task_type) = setup();
        let objects: Vec<ObjectRef> = (0..2)
            .map(|_| store.create_object(&task_type).unwrap())
            .collect();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_task", joe.clone(), &objects[0]).unwrap();

        let cache = PermissionCache::new();
        let first =
            ObjectPermissionChecker::with_cache(&store, &config, joe.clone(), cache.clone())
                .unwrap();
        first.prefetch_perms(&objects).unwrap();

        let second = ObjectPermissionChecker::with_cache(&store, &config, joe, cache).unwrap();
        let before = store.query_count();
        assert!(second.has_perm("view_task", &objects[0]).unwrap());
        assert!(!second.has_perm("view_task", &objects[1]).unwrap());
        assert_eq!(store.query_count(), before);
    }

    #[test]
    fn test_group_checker_sees_only_group_grants() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        let admins = store.create_group("admins");
        store.add_user_to_group(joe.id, admins.id);
        assign_perm(&store, &config, "view_task", joe, &task).unwrap();
        assign_perm(&store, &config, "delete_task", admins.clone(), &task).unwrap();

        let checker = ObjectPermissionChecker::new(&store, &config, admins).unwrap();
        assert_eq!(checker.get_perms(&task).unwrap(), vec!["delete_task"]);
    }

    #[test]
    fn test_checker_rejects_collections() {
        let (store, config, _) = setup();
        let users = vec![store.create_user("a"), store.create_user("b")];
        let result = ObjectPermissionChecker::new(&store, &config, users);
        assert!(matches!(result, Err(WardenError::NotUserNorGroup(_))));
    }

    struct AuditSource;

    impl AdditionalPermissionSource for AuditSource {
        fn extra_perms(&self, _principal: PrincipalRef, _obj: &ObjectRef) -> Vec<String> {
            vec!["audit_task".to_string()]
        }
    }

    #[test]
    fn test_additional_permission_source_is_merged() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_task", joe.clone(), &task).unwrap();

        let mut checker = ObjectPermissionChecker::new(&store, &config, joe).unwrap();
        checker.add_source(Arc::new(AuditSource));
        assert_eq!(
            checker.get_perms(&task).unwrap(),
            vec!["audit_task", "view_task"]
        );
        assert!(checker.has_perm("audit_task", &task).unwrap());
    }

    #[test]
    fn test_prefetch_seeds_additional_sources() {
        let (store, config, task_type) = setup();
        let granted = store.create_object(&task_type).unwrap();
        let bare = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_task", joe.clone(), &granted).unwrap();

        // Prefetched entries must hold the same codenames the lazy path
        // would have produced, sources included.
        let mut lazy = ObjectPermissionChecker::new(&store, &config, joe.clone()).unwrap();
        lazy.add_source(Arc::new(AuditSource));
        let mut prefetched = ObjectPermissionChecker::new(&store, &config, joe).unwrap();
        prefetched.add_source(Arc::new(AuditSource));
        prefetched
            .prefetch_perms(&[granted.clone(), bare.clone()])
            .unwrap();

        assert_eq!(
            prefetched.get_perms(&granted).unwrap(),
            lazy.get_perms(&granted).unwrap()
        );
        assert_eq!(
            prefetched.get_perms(&bare).unwrap(),
            vec!["audit_task"]
        );
        assert!(prefetched.has_perm("audit_task", &bare).unwrap());

        // Superuser prefetch merges sources on top of the full list.
        let root = store.create_superuser("root");
        let mut super_checker = ObjectPermissionChecker::new(&store, &config, root).unwrap();
        super_checker.add_source(Arc::new(AuditSource));
        super_checker
            .prefetch_perms(std::slice::from_ref(&granted))
            .unwrap();
        assert_eq!(
            super_checker.get_perms(&granted).unwrap(),
            vec!["audit_task", "change_task", "delete_task", "view_task"]
        );
    }
}

// ============================================================================
// Object-Set Resolver Tests
// ============================================================================

mod resolver_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn pk_set(query: &ObjectQuery) -> BTreeSet<String> {
        query.pks()
    }

    #[test]
    fn test_single_codename_returns_granted_objects() {
        let (store, config, task_type) = setup();
        let granted = store.create_object(&task_type).unwrap();
        let _other = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_task", joe.clone(), &granted).unwrap();

        let query = get_objects_for_user(
            &store,
            &config,
            joe,
            &["tasker.view_task"],
            None,
            &ObjectsForUserOptions::default(),
        )
        .unwrap();
        assert_eq!(query.count(), 1);
        assert!(query.contains(&granted));
        assert_eq!(query.resolve(), vec![granted]);
    }

    #[test]
    fn test_group_grants_reach_user_unless_disabled() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        let admins = store.create_group("admins");
        store.add_user_to_group(joe.id, admins.id);
        assign_perm(&store, &config, "view_task", admins, &task).unwrap();

        let via_groups = get_objects_for_user(
            &store,
            &config,
            joe.clone(),
            &["tasker.view_task"],
            None,
            &ObjectsForUserOptions::default(),
        )
        .unwrap();
        assert_eq!(via_groups.count(), 1);

        let without = get_objects_for_user(
            &store,
            &config,
            joe,
            &["tasker.view_task"],
            None,
            &ObjectsForUserOptions {
                use_groups: false,
                ..ObjectsForUserOptions::default()
            },
        )
        .unwrap();
        assert!(without.is_empty());
    }

    #[test]
    fn test_intersection_law_without_globals() {
        let (store, config, task_type) = setup();
        let o1 = store.create_object(&task_type).unwrap();
        let o2 = store.create_object(&task_type).unwrap();
        let o3 = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_task", joe.clone(), &o1).unwrap();
        assign_perm(&store, &config, "change_task", joe.clone(), &o1).unwrap();
        assign_perm(&store, &config, "view_task", joe.clone(), &o2).unwrap();
        assign_perm(&store, &config, "change_task", joe.clone(), &o3).unwrap();

        let opts = ObjectsForUserOptions::default();
        let both = get_objects_for_user(
            &store,
            &config,
            joe.clone(),
            &["tasker.view_task", "tasker.change_task"],
            None,
            &opts,
        )
        .unwrap();
        let view = get_objects_for_user(
            &store, &config, joe.clone(), &["tasker.view_task"], None, &opts,
        )
        .unwrap();
        let change = get_objects_for_user(
            &store, &config, joe, &["tasker.change_task"], None, &opts,
        )
        .unwrap();

        let expected: BTreeSet<String> = pk_set(&view)
            .intersection(&pk_set(&change))
            .cloned()
            .collect();
        assert_eq!(pk_set(&both), expected);
        assert!(both.contains(&o1));
        assert_eq!(both.count(), 1);
    }

    #[test]
    fn test_union_law_with_any_perm() {
        let (store, config, task_type) = setup();
        let o1 = store.create_object(&task_type).unwrap();
        let o2 = store.create_object(&task_type).unwrap();
        let _o3 = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_task", joe.clone(), &o1).unwrap();
        assign_perm(&store, &config, "change_task", joe.clone(), &o2).unwrap();

        let any = ObjectsForUserOptions {
            any_perm: true,
            ..ObjectsForUserOptions::default()
        };
        let either = get_objects_for_user(
            &store,
            &config,
            joe.clone(),
            &["tasker.view_task", "tasker.change_task"],
            None,
            &any,
        )
        .unwrap();
        let opts = ObjectsForUserOptions::default();
        let view = get_objects_for_user(
            &store, &config, joe.clone(), &["tasker.view_task"], None, &opts,
        )
        .unwrap();
        let change = get_objects_for_user(
            &store, &config, joe, &["tasker.change_task"], None, &opts,
        )
        .unwrap();

        let expected: BTreeSet<String> =
            pk_set(&view).union(&pk_set(&change)).cloned().collect();
        assert_eq!(pk_set(&either), expected);
        assert_eq!(either.count(), 2);
    }

    #[test]
    fn test_mixed_content_types_rejected() {
        let (store, config, _) = setup();
        store.register_target_type(
            "notes",
            "Note",
            Linkage::Generic,
            &[("change_note", "Can change note")],
        );
        let joe = store.create_user("joe");
        let result = get_objects_for_user(
            &store,
            &config,
            joe,
            &["tasker.change_task", "notes.change_note"],
            None,
            &ObjectsForUserOptions::default(),
        );
        assert!(matches!(result, Err(WardenError::MixedContentType(_))));
    }

    #[test]
    fn test_unresolvable_type_rejected() {
        let (store, config, _) = setup();
        let joe = store.create_user("joe");
        let result = get_objects_for_user(
            &store,
            &config,
            joe.clone(),
            &["view_task"],
            None,
            &ObjectsForUserOptions::default(),
        );
        assert!(matches!(result, Err(WardenError::WrongApp(_))));

        let result = get_objects_for_user(
            &store,
            &config,
            joe,
            &["unregistered.view_task"],
            None,
            &ObjectsForUserOptions::default(),
        );
        assert!(matches!(result, Err(WardenError::WrongApp(_))));
    }

    #[test]
    fn test_empty_codenames_with_klass_returns_all() {
        let (store, config, task_type) = setup();
        for _ in 0..3 {
            store.create_object(&task_type).unwrap();
        }
        let joe = store.create_user("joe");
        let klass = ObjectQuery::all(&store, &task_type).unwrap();
        let query = get_objects_for_user(
            &store,
            &config,
            joe,
            &[],
            Some(klass),
            &ObjectsForUserOptions::default(),
        )
        .unwrap();
        assert_eq!(query.count(), 3);
    }

    #[test]
    fn test_superuser_shortcut_and_opt_out() {
        let (store, config, task_type) = setup();
        for _ in 0..3 {
            store.create_object(&task_type).unwrap();
        }
        let root = store.create_superuser("root");

        let all = get_objects_for_user(
            &store,
            &config,
            root.clone(),
            &["tasker.view_task"],
            None,
            &ObjectsForUserOptions::default(),
        )
        .unwrap();
        assert_eq!(all.count(), 3);

        let strict = get_objects_for_user(
            &store,
            &config,
            root,
            &["tasker.view_task"],
            None,
            &ObjectsForUserOptions {
                with_superuser: false,
                ..ObjectsForUserOptions::default()
            },
        )
        .unwrap();
        assert!(strict.is_empty());
    }

    #[test]
    fn test_global_grant_satisfies_its_codename_everywhere() {
        let (store, config, task_type) = setup();
        let o1 = store.create_object(&task_type).unwrap();
        let _o2 = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "tasker.view_task", joe.clone(), TargetInput::Global)
            .unwrap();
        assign_perm(&store, &config, "change_task", joe.clone(), &o1).unwrap();

        // All-perms mode: the global grant covers view_task on every
        // instance, so only change_task still restricts the result.
        let both = get_objects_for_user(
            &store,
            &config,
            joe.clone(),
            &["tasker.view_task", "tasker.change_task"],
            None,
            &ObjectsForUserOptions::default(),
        )
        .unwrap();
        assert_eq!(both.resolve(), vec![o1]);

        // Any-perm mode: one global codename widens to all instances.
        let any = get_objects_for_user(
            &store,
            &config,
            joe,
            &["tasker.view_task", "tasker.change_task"],
            None,
            &ObjectsForUserOptions {
                any_perm: true,
                ..ObjectsForUserOptions::default()
            },
        )
        .unwrap();
        assert_eq!(any.count(), 2);
    }

    #[test]
    fn test_inactive_user_resolves_to_empty() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_task", joe.clone(), &task).unwrap();
        let joe = store.set_user_active(joe.id, false).unwrap();

        let query = get_objects_for_user(
            &store,
            &config,
            joe,
            &["tasker.view_task"],
            None,
            &ObjectsForUserOptions::default(),
        )
        .unwrap();
        assert!(query.is_empty());
    }

    #[test]
    fn test_group_resolver_mirrors_user_resolver() {
        let (store, config, task_type) = setup();
        let o1 = store.create_object(&task_type).unwrap();
        let o2 = store.create_object(&task_type).unwrap();
        let admins = store.create_group("admins");
        assign_perm(&store, &config, "view_task", admins.clone(), &o1).unwrap();
        assign_perm(&store, &config, "view_task", admins.clone(), &o2).unwrap();
        assign_perm(&store, &config, "change_task", admins.clone(), &o1).unwrap();

        let all_mode = get_objects_for_group(
            &store,
            &config,
            admins.clone(),
            &["tasker.view_task", "tasker.change_task"],
            None,
            false,
        )
        .unwrap();
        assert_eq!(all_mode.resolve(), vec![o1]);

        let any_mode = get_objects_for_group(
            &store,
            &config,
            admins,
            &["tasker.view_task", "tasker.change_task"],
            None,
            true,
        )
        .unwrap();
        assert_eq!(any_mode.count(), 2);
    }

    #[test]
    fn test_query_is_lazy_and_composable() {
        let (store, config, task_type) = setup();
        let o1 = store.create_object(&task_type).unwrap();
        let o2 = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_task", joe.clone(), &o1).unwrap();
        assign_perm(&store, &config, "view_task", joe.clone(), &o2).unwrap();

        let query = get_objects_for_user(
            &store,
            &config,
            joe,
            &["tasker.view_task"],
            None,
            &ObjectsForUserOptions::default(),
        )
        .unwrap();

        // Restricting further composes before evaluation.
        let only_first: BTreeSet<String> = std::iter::once(o1.pk.clone().unwrap()).collect();
        let narrowed = query.restrict(&only_first);
        assert_eq!(narrowed.resolve(), vec![o1.clone()]);
        assert_eq!(query.count(), 2);

        // Deleting an object is reflected at evaluation time.
        store.delete_object(&o1).unwrap();
        assert_eq!(query.count(), 1);
        assert!(narrowed.is_empty());
    }
}

// ============================================================================
// Direct Linkage Equivalence Tests
// ============================================================================

mod direct_linkage_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn setup_direct() -> (Store, WardenConfig, TargetType) {
        let store = Store::new();
        let config = WardenConfig::default();
        let note_type = store.register_target_type(
            "notes",
            "Note",
            Linkage::Direct,
            &[
                ("view_note", "Can view note"),
                ("change_note", "Can change note"),
            ],
        );
        (store, config, note_type)
    }

    #[test]
    fn test_direct_grants_behave_like_generic_ones() {
        let (store, config, note_type) = setup_direct();
        let note = store.create_object(&note_type).unwrap();
        let other = store.create_object(&note_type).unwrap();
        let joe = store.create_user("joe");

        assign_perm(&store, &config, "view_note", joe.clone(), &note).unwrap();
        assert_eq!(perms_of(&store, &config, joe.clone(), &note), vec!["view_note"]);

        let query = get_objects_for_user(
            &store,
            &config,
            joe.clone(),
            &["notes.view_note"],
            None,
            &ObjectsForUserOptions::default(),
        )
        .unwrap();
        assert!(query.contains(&note));
        assert!(!query.contains(&other));

        remove_perm(&store, &config, "view_note", joe.clone(), &note).unwrap();
        assert!(perms_of(&store, &config, joe, &note).is_empty());
    }

    #[test]
    fn test_direct_grants_cascade_with_their_target() {
        let (store, config, note_type) = setup_direct();
        let note = store.create_object(&note_type).unwrap();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_note", joe.clone(), &note).unwrap();

        store.delete_object(&note).unwrap();
        // Referential integrity removed the grant with the target, so the
        // reclaimer has nothing to scan.
        assert!(perms_of(&store, &config, joe, &note).is_empty());
        assert_eq!(reclaim_orphans(&store, &ReclaimOptions::default()), 0);
    }
}

// ============================================================================
// Stage-then-Commit Tests
// ============================================================================

mod batch_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_staged_operations_have_no_effect_until_commit() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        let sam = store.create_user("sam");

        let mut batch = GrantBatch::new();
        batch
            .stage_assign(&store, "view_task", PrincipalRef::User(joe.id), &task)
            .unwrap();
        batch
            .stage_assign(&store, "view_task", PrincipalRef::User(sam.id), &task)
            .unwrap();
        assert_eq!(batch.len(), 2);

        // Zero observable effect before commit, on any checker.
        let checker = ObjectPermissionChecker::new(&store, &config, joe.clone()).unwrap();
        assert!(!checker.has_perm("view_task", &task).unwrap());

        let outcome = batch.commit(&store).unwrap();
        assert_eq!(outcome.created.len(), 2);
        assert_eq!(outcome.removed, 0);

        let checker = ObjectPermissionChecker::new(&store, &config, joe).unwrap();
        assert!(checker.has_perm("view_task", &task).unwrap());
    }

    #[test]
    fn test_commit_applies_removes_with_assigns() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_task", joe.clone(), &task).unwrap();

        let mut batch = GrantBatch::new();
        batch
            .stage_remove(&store, "view_task", PrincipalRef::User(joe.id), &task)
            .unwrap();
        batch
            .stage_assign(&store, "change_task", PrincipalRef::User(joe.id), &task)
            .unwrap();
        let outcome = batch.commit(&store).unwrap();
        assert_eq!(outcome.created.len(), 1);
        assert_eq!(outcome.removed, 1);

        assert_eq!(perms_of(&store, &config, joe, &task), vec!["change_task"]);
    }
}

// ============================================================================
// Orphan Reclaimer Tests
// ============================================================================

mod reclaim_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Deterministic dataset: 12 objects with one grant each, 10 of which
    /// are then orphaned by deleting their targets.
    fn orphan_store() -> (Store, WardenConfig) {
        let (store, config, task_type) = setup();
        let joe = store.create_user("joe");
        let objects: Vec<ObjectRef> = (0..12)
            .map(|_| store.create_object(&task_type).unwrap())
            .collect();
        for obj in &objects {
            assign_perm(&store, &config, "view_task", joe.clone(), obj).unwrap();
        }
        for obj in &objects[..10] {
            store.delete_object(obj).unwrap();
        }
        (store, config)
    }

    #[test]
    fn test_no_orphans_returns_zero() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_task", joe, &task).unwrap();

        assert_eq!(reclaim_orphans(&store, &ReclaimOptions::default()), 0);
        assert_eq!(store.generic_grant_count(), 1);
    }

    #[test]
    fn test_batched_reclaim_matches_unbounded_reclaim() {
        let (batched, _) = orphan_store();
        let (unbounded, _) = orphan_store();

        let mut total = 0;
        loop {
            let removed = reclaim_orphans(
                &batched,
                &ReclaimOptions {
                    batch_size: Some(3),
                    ..ReclaimOptions::default()
                },
            );
            if removed == 0 {
                break;
            }
            total += removed;
        }
        let single = reclaim_orphans(&unbounded, &ReclaimOptions::default());

        assert_eq!(total, 10);
        assert_eq!(single, 10);
        assert_eq!(batched.generic_grant_count(), 2);
        assert_eq!(unbounded.generic_grant_count(), 2);
    }

    #[test]
    fn test_max_batches_limits_one_run() {
        let (store, _) = orphan_store();
        let removed = reclaim_orphans(
            &store,
            &ReclaimOptions {
                batch_size: Some(3),
                max_batches: Some(1),
                ..ReclaimOptions::default()
            },
        );
        assert!(removed <= 3);
        assert!(store.generic_grant_count() >= 9);
    }

    #[test]
    fn test_zero_time_budget_stops_before_first_batch() {
        let (store, _) = orphan_store();
        let removed = reclaim_orphans(
            &store,
            &ReclaimOptions {
                batch_size: Some(3),
                max_duration: Some(Duration::ZERO),
                ..ReclaimOptions::default()
            },
        );
        assert_eq!(removed, 0);
        assert_eq!(store.generic_grant_count(), 12);
    }

    #[test]
    fn test_skip_batches_resumes_past_clean_prefix() {
        let (store, config, task_type) = setup();
        let joe = store.create_user("joe");
        // Three live grants first, then three orphans.
        let live: Vec<ObjectRef> = (0..3)
            .map(|_| store.create_object(&task_type).unwrap())
            .collect();
        for obj in &live {
            assign_perm(&store, &config, "view_task", joe.clone(), obj).unwrap();
        }
        let doomed: Vec<ObjectRef> = (0..3)
            .map(|_| store.create_object(&task_type).unwrap())
            .collect();
        for obj in &doomed {
            assign_perm(&store, &config, "view_task", joe.clone(), obj).unwrap();
            store.delete_object(obj).unwrap();
        }

        let removed = reclaim_orphans(
            &store,
            &ReclaimOptions {
                batch_size: Some(3),
                skip_batches: 1,
                ..ReclaimOptions::default()
            },
        );
        assert_eq!(removed, 3);
        assert_eq!(store.generic_grant_count(), 3);
    }
}

// ============================================================================
// Anonymous Cache Tests
// ============================================================================

mod anonymous_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_anonymous_cache_lifecycle() {
        let (store, _, _) = setup();
        let config = WardenConfig {
            anonymous_user_name: "CacheSentinel".to_string(),
            anonymous_cache_ttl_secs: -1,
            ..WardenConfig::default()
        };
        let sentinel = store.create_user("CacheSentinel");

        invalidate_anonymous_cache();
        let first = anonymous_user(&store, &config).unwrap();
        assert_eq!(first.id, sentinel.id);

        // Indefinite TTL: the second fetch is served from the cache.
        let before = store.query_count();
        let second = anonymous_user(&store, &config).unwrap();
        assert_eq!(second.id, sentinel.id);
        assert_eq!(store.query_count(), before);

        // Invalidation forces a refetch.
        invalidate_anonymous_cache();
        anonymous_user(&store, &config).unwrap();
        assert!(store.query_count() > before);
        invalidate_anonymous_cache();
    }

    #[test]
    fn test_pinned_sentinel_id_overrides_username() {
        let (store, _, _) = setup();
        let pinned = store.create_user("service_anon");
        let config = WardenConfig {
            anonymous_user_id: Some(pinned.id),
            ..WardenConfig::default()
        };

        // No user carries the configured sentinel name; the pinned id
        // resolves anyway.
        let user = anonymous_user(&store, &config).unwrap();
        assert_eq!(user.id, pinned.id);

        let identity = resolve_identity(&store, &config, IdentityInput::Anonymous).unwrap();
        assert_eq!(identity.as_user().map(|u| u.id), Some(pinned.id));
    }

    #[test]
    fn test_ttl_zero_disables_caching() {
        let (store, _, _) = setup();
        let config = WardenConfig {
            anonymous_user_name: "UncachedSentinel".to_string(),
            anonymous_cache_ttl_secs: 0,
            ..WardenConfig::default()
        };
        store.create_user("UncachedSentinel");

        let before = store.query_count();
        anonymous_user(&store, &config).unwrap();
        anonymous_user(&store, &config).unwrap();
        assert_eq!(store.query_count(), before + 2);
    }
}

// ============================================================================
// Snapshot and Config Tests
// ============================================================================

mod persistence_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_snapshot_round_trip_preserves_grants() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        let admins = store.create_group("admins");
        store.add_user_to_group(joe.id, admins.id);
        assign_perm(&store, &config, "view_task", joe.clone(), &task).unwrap();
        assign_perm(&store, &config, "delete_task", admins, &task).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        store.save(&path).unwrap();

        let restored = Store::load(&path).unwrap();
        assert_eq!(
            perms_of(&restored, &config, joe, &task),
            vec!["delete_task", "view_task"]
        );
        assert_eq!(restored.generic_grant_count(), 2);
    }

    #[test]
    fn test_load_missing_snapshot_fails_with_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Store::load(dir.path().join("absent.json"));
        assert!(matches!(result, Err(WardenError::Io(_))));
    }

    #[test]
    fn test_config_defaults_and_file_loading() {
        let config = WardenConfig::default();
        assert_eq!(config.anonymous_user_name, "AnonymousUser");
        assert!(config.anonymous_enabled);
        assert!(!config.auto_prefetch);
        assert_eq!(config.anonymous_cache_ttl_secs, 0);
        assert!(config.active_only);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(
            &path,
            "anonymous_enabled = false\nauto_prefetch = true\nanonymous_cache_ttl_secs = 30\n",
        )
        .unwrap();
        let loaded = WardenConfig::from_file(&path).unwrap();
        assert!(!loaded.anonymous_enabled);
        assert!(loaded.auto_prefetch);
        assert_eq!(loaded.anonymous_cache_ttl_secs, 30);

        std::fs::write(&path, "anonymous_cache_ttl_secs = -5\n").unwrap();
        assert!(matches!(
            WardenConfig::from_file(&path),
            Err(WardenError::Config(_))
        ));
    }
}

// ============================================================================
// Authorization Client Tests
// ============================================================================

mod client_tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_client_checks_and_mutations() {
        let (store, config, task_type) = setup();
        let task = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");

        let client = AuthorizationClient::new(&store, &config, joe.clone()).unwrap();
        assert!(!client.has_perm("view_task", &task).unwrap());

        client.assign_perm("view_task", &task).unwrap();
        // The client's shared cache was populated by the earlier check and
        // keeps reporting the memoized state.
        assert!(!client.has_perm("view_task", &task).unwrap());

        let fresh = AuthorizationClient::new(&store, &config, joe).unwrap();
        assert!(fresh.has_perm("view_task", &task).unwrap());
        assert_eq!(fresh.get_perms(&task).unwrap(), vec!["view_task"]);
    }

    #[test]
    fn test_client_object_resolution() {
        let (store, config, task_type) = setup();
        let o1 = store.create_object(&task_type).unwrap();
        let _o2 = store.create_object(&task_type).unwrap();
        let joe = store.create_user("joe");
        assign_perm(&store, &config, "view_task", joe.clone(), &o1).unwrap();

        let client = AuthorizationClient::new(&store, &config, joe).unwrap();
        let query = client
            .objects_with_perm(
                &["tasker.view_task"],
                None,
                &ObjectsForUserOptions::default(),
            )
            .unwrap();
        assert_eq!(query.resolve(), vec![o1]);
    }

    #[test]
    fn test_client_rejects_collections() {
        let (store, config, _) = setup();
        let groups = vec![store.create_group("a"), store.create_group("b")];
        let result = AuthorizationClient::new(&store, &config, groups);
        assert!(matches!(result, Err(WardenError::NotUserNorGroup(_))));
    }
}
