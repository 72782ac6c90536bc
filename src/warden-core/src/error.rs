//! Error types for warden-core.
//!
//! All misuse errors are raised synchronously at the call site and are never
//! retried: they represent caller programming errors, not transient
//! conditions.

use thiserror::Error;

/// Errors raised by the permission core.
#[derive(Debug, Error)]
pub enum WardenError {
    /// Identity resolution received something that is neither a user nor a
    /// group shape (including mixed or empty collections, or an anonymous
    /// marker while anonymous support is disabled).
    #[error("user or group instance is required (got {0})")]
    NotUserNorGroup(String),

    /// The target object has no stable identity yet (e.g. never persisted).
    #[error("object {0} needs to be persisted first")]
    ObjectNotPersisted(String),

    /// A permission qualifier does not match the target's type, or is
    /// missing where it cannot be inferred.
    #[error("wrong app label: {0}")]
    WrongApp(String),

    /// Codenames or candidate sets span more than one target type.
    #[error("mixed content types: {0}")]
    MixedContentType(String),

    /// Both a multi-principal collection and a multi-target collection were
    /// supplied at once; the cross-product is ambiguous and rejected.
    #[error("cannot pass multiple identities and multiple objects at the same time")]
    MultipleIdentityAndObject,

    /// No permission definition exists for the given type and codename.
    #[error("permission not found: {target_type}.{codename}")]
    PermissionNotFound {
        /// Target type key (`app.Model`).
        target_type: String,
        /// Permission codename.
        codename: String,
    },

    /// The target type has never been registered with the store.
    #[error("unknown target type: {0}")]
    UnknownTargetType(String),

    /// A grant for this (principal, permission, target) triple already
    /// exists and `ignore_conflicts` was not requested.
    #[error("duplicate grant: {0}")]
    DuplicateGrant(String),

    /// Grant write rejected because the permission's target type and the
    /// target's actual type disagree.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// Configuration file could not be parsed or holds an invalid value.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error during snapshot load/save.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error during snapshot load/save.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for warden-core operations.
pub type Result<T> = std::result::Result<T, WardenError>;
