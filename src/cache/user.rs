//! Owners of cache and config uses

use crate::error::{HangarError, HangarResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whoever keeps a resource cache (or config) alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ResourceUser {
    Build(i64),
    Resource(i64),
    ResourceType(i64),
}

impl ResourceUser {
    /// `(build_id, resource_id, resource_type_id)` columns of a use row
    pub(crate) fn columns(&self) -> (Option<i64>, Option<i64>, Option<i64>) {
        match *self {
            Self::Build(id) => (Some(id), None, None),
            Self::Resource(id) => (None, Some(id), None),
            Self::ResourceType(id) => (None, None, Some(id)),
        }
    }

    /// Rebuild the owner from a use row; exactly one column must be set
    pub(crate) fn from_columns(
        build_id: Option<i64>,
        resource_id: Option<i64>,
        resource_type_id: Option<i64>,
    ) -> HangarResult<Self> {
        match (build_id, resource_id, resource_type_id) {
            (Some(id), None, None) => Ok(Self::Build(id)),
            (None, Some(id), None) => Ok(Self::Resource(id)),
            (None, None, Some(id)) => Ok(Self::ResourceType(id)),
            other => Err(HangarError::InvalidOwner(format!("{other:?}"))),
        }
    }

    pub fn id(&self) -> i64 {
        match *self {
            Self::Build(id) | Self::Resource(id) | Self::ResourceType(id) => id,
        }
    }
}

impl fmt::Display for ResourceUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build(id) => write!(f, "build {id}"),
            Self::Resource(id) => write!(f, "resource {id}"),
            Self::ResourceType(id) => write!(f, "resource type {id}"),
        }
    }
}
