//! Target linkage strategy.
//!
//! Each target type stores its grants either in the shared generic table
//! (content-type id + stringified primary key) or in a dedicated direct
//! table with a real reference to the target. The choice is fixed per type
//! at registration time and only changes the query shape inside the store;
//! every component above the store is strategy-agnostic.

use serde::{Deserialize, Serialize};

/// Grant storage strategy for one target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Linkage {
    /// Shared table keyed by `(content_type_id, object_pk)`.
    Generic,
    /// Dedicated per-type table with a real target reference. Rows are
    /// cascade-deleted with their target, so direct grants can never become
    /// orphans.
    Direct,
}

impl Linkage {
    /// Whether this type uses the shared generic table.
    pub fn is_generic(&self) -> bool {
        matches!(self, Linkage::Generic)
    }

    /// Field name used to join a grant row back to its target.
    pub fn join_field(&self) -> &'static str {
        match self {
            Linkage::Generic => "object_pk",
            Linkage::Direct => "target_id",
        }
    }
}

impl Default for Linkage {
    fn default() -> Self {
        Linkage::Generic
    }
}

impl std::fmt::Display for Linkage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Linkage::Generic => write!(f, "generic"),
            Linkage::Direct => write!(f, "direct"),
        }
    }
}
