//! Target types and object references.
//!
//! A target type is the content-type equivalent: the `(app, model)` pair a
//! permission definition is scoped to. An [`ObjectRef`] names one specific
//! record of a target type.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};

/// Internal id assigned to a registered target type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ContentTypeId(pub u32);

/// The `(app, model)` pair identifying one target type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetType {
    /// Owning application label, e.g. `"tasker"`.
    pub app: String,
    /// Model name, e.g. `"Task"`.
    pub model: String,
}

impl TargetType {
    /// Create a target type from its two components.
    pub fn new(app: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            model: model.into(),
        }
    }

    /// Canonical `"app.Model"` key.
    pub fn key(&self) -> String {
        format!("{}.{}", self.app, self.model)
    }

    /// Parse an `"app.Model"` string.
    pub fn parse(value: &str) -> Result<Self> {
        match value.split_once('.') {
            Some((app, model)) if !app.is_empty() && !model.is_empty() => {
                Ok(Self::new(app, model))
            }
            _ => Err(WardenError::UnknownTargetType(format!(
                "'{value}' is not of the form 'app.Model'"
            ))),
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.app, self.model)
    }
}

/// Reference to one record of a target type.
///
/// `pk` is `None` for an object that was never persisted; grant writes
/// against such a reference fail with [`WardenError::ObjectNotPersisted`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Type of the referenced record.
    pub target_type: TargetType,
    /// Stringified primary key, if persisted.
    pub pk: Option<String>,
}

impl ObjectRef {
    /// Reference to a persisted record.
    pub fn new(target_type: TargetType, pk: impl Into<String>) -> Self {
        Self {
            target_type,
            pk: Some(pk.into()),
        }
    }

    /// Reference to a record that has no identity yet.
    pub fn unsaved(target_type: TargetType) -> Self {
        Self {
            target_type,
            pk: None,
        }
    }

    /// The primary key, or `ObjectNotPersisted` when there is none.
    pub fn require_pk(&self) -> Result<&str> {
        self.pk
            .as_deref()
            .ok_or_else(|| WardenError::ObjectNotPersisted(self.target_type.key()))
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.pk {
            Some(pk) => write!(f, "{}#{}", self.target_type, pk),
            None => write!(f, "{}#<unsaved>", self.target_type),
        }
    }
}

/// The three accepted spellings of a target type: a type handle, an object
/// instance, or an `"app.Model"` string. All resolve to the same type.
#[derive(Debug, Clone)]
pub enum TypeRef<'a> {
    /// A type handle.
    Handle(&'a TargetType),
    /// An object instance; its type is used.
    Instance(&'a ObjectRef),
    /// An `"app.Model"` string.
    Name(&'a str),
}

impl TypeRef<'_> {
    /// Resolve to an owned [`TargetType`].
    pub fn resolve(&self) -> Result<TargetType> {
        match self {
            TypeRef::Handle(t) => Ok((*t).clone()),
            TypeRef::Instance(obj) => Ok(obj.target_type.clone()),
            TypeRef::Name(name) => TargetType::parse(name),
        }
    }
}

impl<'a> From<&'a TargetType> for TypeRef<'a> {
    fn from(value: &'a TargetType) -> Self {
        TypeRef::Handle(value)
    }
}

impl<'a> From<&'a ObjectRef> for TypeRef<'a> {
    fn from(value: &'a ObjectRef) -> Self {
        TypeRef::Instance(value)
    }
}

impl<'a> From<&'a str> for TypeRef<'a> {
    fn from(value: &'a str) -> Self {
        TypeRef::Name(value)
    }
}
