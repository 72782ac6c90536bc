//! Principal types: users, groups and the references grants bind to.

use serde::{Deserialize, Serialize};

/// Unique identifier of a user row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UserId(pub u64);

/// Unique identifier of a group row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct GroupId(pub u64);

/// A user principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Row id.
    pub id: UserId,
    /// Unique username.
    pub username: String,
    /// Inactive users hold no effective permissions when `active_only` is
    /// enforced.
    pub is_active: bool,
    /// Superusers implicitly hold every permission.
    pub is_superuser: bool,
}

/// A group principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Row id.
    pub id: GroupId,
    /// Unique group name.
    pub name: String,
}

/// A grant always binds to exactly one of these; never both.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PrincipalRef {
    /// Grant held directly by a user.
    User(UserId),
    /// Grant held by a group.
    Group(GroupId),
}

impl PrincipalRef {
    /// Short tag used in log lines and removal details.
    pub fn kind(&self) -> &'static str {
        match self {
            PrincipalRef::User(_) => "user",
            PrincipalRef::Group(_) => "group",
        }
    }
}

impl std::fmt::Display for PrincipalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrincipalRef::User(id) => write!(f, "user:{}", id.0),
            PrincipalRef::Group(id) => write!(f, "group:{}", id.0),
        }
    }
}

/// One element of a heterogeneous principal collection handed to identity
/// resolution. Collections must be homogeneous to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    /// A user element.
    User(User),
    /// A group element.
    Group(Group),
}

impl From<User> for Subject {
    fn from(user: User) -> Self {
        Subject::User(user)
    }
}

impl From<Group> for Subject {
    fn from(group: Group) -> Self {
        Subject::Group(group)
    }
}
