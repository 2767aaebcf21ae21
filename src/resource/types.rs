//! Resource value types and content hashing

use crate::error::HangarResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A resource version as reported by a check script
pub type Version = BTreeMap<String, String>;

/// Resource configuration passed to scripts
pub type Source = BTreeMap<String, serde_json::Value>;

/// Per-step parameters of a get
pub type Params = BTreeMap<String, serde_json::Value>;

/// Sorted-key, compact JSON. Map types above are ordered, so equal values
/// always encode to identical text.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> HangarResult<String> {
    Ok(serde_json::to_string(value)?)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 of the canonical JSON encoding
pub fn hash_json<T: Serialize + ?Sized>(value: &T) -> HangarResult<String> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}

/// Hash of an empty params map
pub fn empty_params_hash() -> String {
    sha256_hex(b"{}")
}

/// Identifies a resource's content across pipelines: type plus source
pub fn generate_resource_hash(source: &Source, resource_type: &str) -> HangarResult<String> {
    Ok(format!("{}{}", resource_type, canonical_json(source)?))
}

/// A pipeline-defined resource type together with its checked version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedResourceType {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub version: Option<Version>,
}

/// The set of pipeline-defined types visible while resolving a resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionedResourceTypes(Vec<VersionedResourceType>);

impl VersionedResourceTypes {
    pub fn new(types: Vec<VersionedResourceType>) -> Self {
        Self(types)
    }

    pub fn lookup(&self, name: &str) -> Option<&VersionedResourceType> {
        self.0.iter().find(|t| t.name == name)
    }

    /// Copy of the set with `name` removed
    pub fn without(&self, name: &str) -> Self {
        Self(self.0.iter().filter(|t| t.name != name).cloned().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionedResourceType> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<VersionedResourceType> for VersionedResourceTypes {
    fn from_iter<I: IntoIterator<Item = VersionedResourceType>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Pipeline definition accepted by `hangar pipeline set`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
    #[serde(default)]
    pub resource_types: Vec<ResourceTypeDefinition>,
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub check_every: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTypeDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub check_every: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
}

/// One `name`/`value` pair emitted by a get script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
}
