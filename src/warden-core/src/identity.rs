//! Identity resolution.
//!
//! Normalizes caller input into exactly one of: single user, single group,
//! collection of users, collection of groups. An anonymous marker resolves
//! to the configured sentinel user when anonymous support is enabled.

use crate::anonymous::anonymous_user;
use crate::config::WardenConfig;
use crate::error::{Result, WardenError};
use crate::principal::{Group, Subject, User};
use crate::store::Store;

/// Caller-side input to identity resolution.
#[derive(Debug, Clone)]
pub enum IdentityInput {
    /// A single user.
    User(User),
    /// A single group.
    Group(Group),
    /// The unauthenticated marker; resolves to the sentinel user.
    Anonymous,
    /// A homogeneous collection of users or groups. Mixed or empty
    /// collections are rejected.
    Subjects(Vec<Subject>),
}

impl From<User> for IdentityInput {
    fn from(user: User) -> Self {
        IdentityInput::User(user)
    }
}

impl From<Group> for IdentityInput {
    fn from(group: Group) -> Self {
        IdentityInput::Group(group)
    }
}

impl From<Vec<User>> for IdentityInput {
    fn from(users: Vec<User>) -> Self {
        IdentityInput::Subjects(users.into_iter().map(Subject::User).collect())
    }
}

impl From<Vec<Group>> for IdentityInput {
    fn from(groups: Vec<Group>) -> Self {
        IdentityInput::Subjects(groups.into_iter().map(Subject::Group).collect())
    }
}

/// Resolved identity: exactly one side is populated.
#[derive(Debug, Clone)]
pub enum Identity {
    /// One user.
    User(User),
    /// One group.
    Group(Group),
    /// All users.
    Users(Vec<User>),
    /// All groups.
    Groups(Vec<Group>),
}

impl Identity {
    /// Whether this identity names more than one principal.
    pub fn is_collection(&self) -> bool {
        matches!(self, Identity::Users(_) | Identity::Groups(_))
    }

    /// The single user, when this is a user identity.
    pub fn as_user(&self) -> Option<&User> {
        match self {
            Identity::User(user) => Some(user),
            _ => None,
        }
    }

    /// The single group, when this is a group identity.
    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Identity::Group(group) => Some(group),
            _ => None,
        }
    }
}

/// Resolve caller input into an [`Identity`].
///
/// A mixed collection (neither all-user nor all-group) and an empty
/// collection both fail with [`WardenError::NotUserNorGroup`], as does an
/// anonymous marker while `anonymous_enabled` is off.
pub fn resolve_identity(
    store: &Store,
    config: &WardenConfig,
    input: IdentityInput,
) -> Result<Identity> {
    match input {
        IdentityInput::User(user) => Ok(Identity::User(user)),
        IdentityInput::Group(group) => Ok(Identity::Group(group)),
        IdentityInput::Anonymous => {
            if !config.anonymous_enabled {
                return Err(WardenError::NotUserNorGroup(
                    "anonymous input while anonymous support is disabled".to_string(),
                ));
            }
            let user = anonymous_user(store, config).ok_or_else(|| {
                WardenError::NotUserNorGroup(format!(
                    "anonymous sentinel user '{}' does not exist",
                    config.anonymous_user_name
                ))
            })?;
            Ok(Identity::User(user))
        }
        IdentityInput::Subjects(subjects) => resolve_subjects(subjects),
    }
}

fn resolve_subjects(subjects: Vec<Subject>) -> Result<Identity> {
    if subjects.is_empty() {
        return Err(WardenError::NotUserNorGroup(
            "empty principal collection".to_string(),
        ));
    }
    match &subjects[0] {
        Subject::User(_) => {
            let mut users = Vec::with_capacity(subjects.len());
            for subject in subjects {
                match subject {
                    Subject::User(user) => users.push(user),
                    Subject::Group(group) => {
                        return Err(WardenError::NotUserNorGroup(format!(
                            "mixed collection: group '{}' among users",
                            group.name
                        )))
                    }
                }
            }
            Ok(Identity::Users(users))
        }
        Subject::Group(_) => {
            let mut groups = Vec::with_capacity(subjects.len());
            for subject in subjects {
                match subject {
                    Subject::Group(group) => groups.push(group),
                    Subject::User(user) => {
                        return Err(WardenError::NotUserNorGroup(format!(
                            "mixed collection: user '{}' among groups",
                            user.username
                        )))
                    }
                }
            }
            Ok(Identity::Groups(groups))
        }
    }
}
