//! A concrete (type, version, source, params) to fetch for some user

use super::types::{generate_resource_hash, hash_json, Params, Source, Version, VersionedResourceTypes};
use crate::cache::{ResourceCacheFactory, ResourceUser, UsedResourceCache};
use crate::error::HangarResult;
use crate::lifecycle::ContainerOwner;
use crate::worker::{Volume, Worker};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceInstance {
    pub resource_type: String,
    pub version: Version,
    pub source: Source,
    pub params: Params,
    pub user: ResourceUser,
    pub types: VersionedResourceTypes,
}

#[derive(Serialize)]
struct LockId<'a> {
    #[serde(rename = "type")]
    resource_type: &'a str,
    resource_hash: String,
    version: &'a Version,
    params: &'a Params,
    worker_name: &'a str,
}

impl ResourceInstance {
    pub fn new(
        resource_type: impl Into<String>,
        version: Version,
        source: Source,
        params: Params,
        user: ResourceUser,
        types: VersionedResourceTypes,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            version,
            source,
            params,
            user,
            types,
        }
    }

    /// Type plus canonical source; equal for the same resource anywhere
    pub fn resource_hash(&self) -> HangarResult<String> {
        generate_resource_hash(&self.source, &self.resource_type)
    }

    /// Name of the lock serializing fetches of this instance on a worker
    pub fn lock_name(&self, worker_name: &str) -> HangarResult<String> {
        hash_json(&LockId {
            resource_type: &self.resource_type,
            resource_hash: self.resource_hash()?,
            version: &self.version,
            params: &self.params,
            worker_name,
        })
    }

    /// Resolve the cache this instance fills, recording the use
    pub async fn resolve_cache(
        &self,
        factory: &dyn ResourceCacheFactory,
    ) -> HangarResult<UsedResourceCache> {
        factory
            .find_or_create_resource_cache(
                self.user,
                &self.resource_type,
                &self.version,
                &self.source,
                &self.params,
                &self.types,
            )
            .await
    }

    /// Owner of the container that fetches `cache`
    pub fn container_owner(cache: &UsedResourceCache) -> ContainerOwner {
        ContainerOwner::CacheFetch {
            resource_cache_id: cache.id,
        }
    }

    pub async fn find_initialized_on(
        &self,
        worker: &dyn Worker,
        cache: &UsedResourceCache,
    ) -> HangarResult<Option<Arc<dyn Volume>>> {
        worker.find_initialized_volume_for_resource_cache(cache).await
    }

    pub async fn create_on(
        &self,
        worker: &dyn Worker,
        cache: &UsedResourceCache,
    ) -> HangarResult<Arc<dyn Volume>> {
        worker.find_or_create_volume_for_resource_cache(cache).await
    }
}
