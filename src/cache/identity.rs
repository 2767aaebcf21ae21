//! Content-addressed identities of resource configs and caches
//!
//! A config is identified by where its resource type comes from plus the
//! hash of its source. The type either is a base type provided by workers,
//! or is itself a pipeline-defined type whose image is a resource cache, in
//! which case the identity nests that cache's identity. Caches add the
//! fetched version and the hash of the get params.

use crate::error::{HangarError, HangarResult};
use crate::resource::types::{
    canonical_json, hash_json, sha256_hex, Params, Source, Version, VersionedResourceTypes,
};

/// Where an unsaved config's resource type comes from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigOrigin {
    BaseType(String),
    Cache(Box<ResourceCacheDescriptor>),
}

/// Unsaved resource config identity
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceConfigDescriptor {
    pub origin: ConfigOrigin,
    pub source: Source,
}

impl ResourceConfigDescriptor {
    /// Resolve `type_name` through the pipeline-defined types.
    ///
    /// Each level of custom type is resolved against the set without
    /// itself, so the chain always ends at a base type.
    pub fn resolve(
        type_name: &str,
        source: Source,
        types: &VersionedResourceTypes,
    ) -> HangarResult<Self> {
        let Some(custom) = types.lookup(type_name) else {
            return Ok(Self {
                origin: ConfigOrigin::BaseType(type_name.to_string()),
                source,
            });
        };

        let version = custom
            .version
            .clone()
            .ok_or_else(|| HangarError::ResourceTypeVersionNotFound(custom.name.clone()))?;

        // A custom type overriding the base type of the same name
        let parent = if custom.type_ == custom.name {
            Self {
                origin: ConfigOrigin::BaseType(custom.type_.clone()),
                source: custom.source.clone(),
            }
        } else {
            Self::resolve(
                &custom.type_,
                custom.source.clone(),
                &types.without(&custom.name),
            )?
        };

        Ok(Self {
            origin: ConfigOrigin::Cache(Box::new(ResourceCacheDescriptor {
                config: parent,
                version,
                params: Params::new(),
            })),
            source,
        })
    }

    pub fn source_hash(&self) -> HangarResult<String> {
        hash_json(&self.source)
    }

    /// Name of the base type at the bottom of the chain
    pub fn base_type_name(&self) -> &str {
        let mut config = self;
        loop {
            match &config.origin {
                ConfigOrigin::BaseType(name) => return name,
                ConfigOrigin::Cache(parent) => config = &parent.config,
            }
        }
    }

    /// Parent caches from the nearest to the base-most
    pub(crate) fn parent_chain(&self) -> Vec<&ResourceCacheDescriptor> {
        let mut chain = Vec::new();
        let mut config = self;
        while let ConfigOrigin::Cache(parent) = &config.origin {
            chain.push(parent.as_ref());
            config = &parent.config;
        }
        chain
    }
}

/// Unsaved resource cache identity
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceCacheDescriptor {
    pub config: ResourceConfigDescriptor,
    pub version: Version,
    pub params: Params,
}

impl ResourceCacheDescriptor {
    pub fn resolve(
        type_name: &str,
        version: Version,
        source: Source,
        params: Params,
        types: &VersionedResourceTypes,
    ) -> HangarResult<Self> {
        Ok(Self {
            config: ResourceConfigDescriptor::resolve(type_name, source, types)?,
            version,
            params,
        })
    }

    pub fn params_hash(&self) -> HangarResult<String> {
        hash_json(&self.params)
    }
}

/// A registered base resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedBaseResourceType {
    pub id: i64,
    pub name: String,
}

/// Origin of a saved config
#[derive(Debug, Clone, PartialEq)]
pub enum UsedConfigOrigin {
    BaseType(UsedBaseResourceType),
    Cache(Box<UsedResourceCache>),
}

/// A saved resource config with its resolved parent chain
#[derive(Debug, Clone, PartialEq)]
pub struct UsedResourceConfig {
    pub id: i64,
    pub origin: UsedConfigOrigin,
    pub source_hash: String,
}

impl UsedResourceConfig {
    pub fn base_resource_type(&self) -> &UsedBaseResourceType {
        match &self.origin {
            UsedConfigOrigin::BaseType(base) => base,
            UsedConfigOrigin::Cache(parent) => parent.resource_config.base_resource_type(),
        }
    }

    pub fn created_by_cache(&self) -> Option<&UsedResourceCache> {
        match &self.origin {
            UsedConfigOrigin::Cache(parent) => Some(parent),
            UsedConfigOrigin::BaseType(_) => None,
        }
    }

    /// Content address of the config
    pub fn identity(&self) -> HangarResult<String> {
        let origin = match &self.origin {
            UsedConfigOrigin::BaseType(base) => format!("base:{}", base.name),
            UsedConfigOrigin::Cache(parent) => format!("cache:{}", parent.identity()?),
        };
        Ok(sha256_hex(format!("{origin}|{}", self.source_hash).as_bytes()))
    }
}

/// A saved resource cache
#[derive(Debug, Clone, PartialEq)]
pub struct UsedResourceCache {
    pub id: i64,
    pub resource_config: UsedResourceConfig,
    pub version: Version,
    pub params_hash: String,
}

impl UsedResourceCache {
    /// Content address of the cache
    pub fn identity(&self) -> HangarResult<String> {
        Ok(sha256_hex(
            format!(
                "{}|{}|{}",
                self.resource_config.identity()?,
                canonical_json(&self.version)?,
                self.params_hash
            )
            .as_bytes(),
        ))
    }
}
