//! Getting a resource cache onto a worker
//!
//! Callers hold the lock named by [`FetchSource::lock_name`] around
//! `initialize`. The second `find_initialized` inside `initialize` covers a
//! fetch that finished between the caller's own lookup and taking the lock.
//! A volume that loses the claim on the cache hands back the winner's.

use super::instance::ResourceInstance;
use super::script::{resources_dir, Resource, ScriptResource};
use super::types::{MetadataField, Version};
use crate::cache::{ResourceCacheFactory, UsedResourceCache};
use crate::error::{HangarError, HangarResult};
use crate::lifecycle::{ContainerMetadata, ContainerType};
use crate::worker::{ContainerSpec, ImageSpec, Volume, Worker};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A fetched version sitting on a volume
#[derive(Clone)]
pub struct VersionedSource {
    pub volume: Arc<dyn Volume>,
    pub version: Version,
    pub metadata: Vec<MetadataField>,
}

impl fmt::Debug for VersionedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedSource")
            .field("volume", &self.volume.handle())
            .field("version", &self.version)
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[async_trait]
pub trait FetchSource: Send + Sync {
    fn lock_name(&self) -> HangarResult<String>;

    /// The cache's initialized volume on this worker, if it has one
    async fn find_initialized(&self) -> HangarResult<Option<VersionedSource>>;

    /// Fetch into a new volume unless the worker already has one
    async fn initialize(&self, abort: &CancellationToken) -> HangarResult<VersionedSource>;
}

/// Container settings for the fetch
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub tags: Vec<String>,
    pub env: Vec<(String, String)>,
    pub metadata: ContainerMetadata,
}

pub struct ResourceInstanceFetchSource {
    instance: ResourceInstance,
    cache: UsedResourceCache,
    worker: Arc<dyn Worker>,
    factory: Arc<dyn ResourceCacheFactory>,
    options: FetchOptions,
}

impl ResourceInstanceFetchSource {
    pub fn new(
        instance: ResourceInstance,
        cache: UsedResourceCache,
        worker: Arc<dyn Worker>,
        factory: Arc<dyn ResourceCacheFactory>,
        options: FetchOptions,
    ) -> Self {
        Self {
            instance,
            cache,
            worker,
            factory,
            options,
        }
    }

    fn container_spec(&self, mount_path: &str) -> ContainerSpec {
        ContainerSpec {
            image: ImageSpec {
                resource_type: self.instance.resource_type.clone(),
                privileged: false,
            },
            tags: self.options.tags.clone(),
            env: self.options.env.clone(),
            outputs: [("resource".to_string(), mount_path.to_string())].into(),
        }
    }
}

#[async_trait]
impl FetchSource for ResourceInstanceFetchSource {
    fn lock_name(&self) -> HangarResult<String> {
        self.instance.lock_name(self.worker.name())
    }

    async fn find_initialized(&self) -> HangarResult<Option<VersionedSource>> {
        let Some(volume) = self
            .instance
            .find_initialized_on(self.worker.as_ref(), &self.cache)
            .await?
        else {
            return Ok(None);
        };

        let metadata = self.factory.resource_cache_metadata(&self.cache).await?;
        debug!(
            cache = self.cache.id,
            volume = volume.handle(),
            "found initialized versioned source"
        );
        Ok(Some(VersionedSource {
            volume,
            version: self.instance.version.clone(),
            metadata,
        }))
    }

    async fn initialize(&self, abort: &CancellationToken) -> HangarResult<VersionedSource> {
        if let Some(found) = self.find_initialized().await? {
            return Ok(found);
        }

        let mount_path = resources_dir("get");
        let metadata = ContainerMetadata {
            container_type: Some(ContainerType::Get),
            ..self.options.metadata.clone()
        };
        let container = self
            .worker
            .find_or_create_container(
                &ResourceInstance::container_owner(&self.cache),
                &metadata,
                &self.container_spec(&mount_path),
                &self.instance.types,
            )
            .await?;

        let volume = container
            .volume_mounts()
            .iter()
            .find(|mount| mount.mount_path == mount_path)
            .map(|mount| mount.volume.clone())
            .ok_or_else(|| HangarError::VolumeNotFound(mount_path.clone()))?;

        let fetched = ScriptResource::new(container.clone())
            .get(
                &mount_path,
                &self.instance.source,
                &self.instance.params,
                &self.instance.version,
                abort,
            )
            .await
            .map_err(|e| match e {
                HangarError::Aborted => {
                    info!(container = container.handle(), "get aborted");
                    HangarError::Interrupted
                }
                other => {
                    error!(container = container.handle(), error = %other, "failed to fetch resource");
                    other
                }
            })?;

        volume.set_privileged(false).await?;
        if !volume.initialize_resource_cache(&self.cache).await? {
            debug!(cache = self.cache.id, "cache was initialized by another volume first");
            return self.find_initialized().await?.ok_or_else(|| {
                HangarError::Conflict(format!(
                    "resource cache {} was claimed but no initialized volume was found",
                    self.cache.id
                ))
            });
        }
        self.factory
            .update_resource_cache_metadata(&self.cache, &fetched.metadata)
            .await?;

        info!(cache = self.cache.id, volume = volume.handle(), "resource cache initialized");
        Ok(VersionedSource {
            volume,
            version: fetched.version,
            metadata: fetched.metadata,
        })
    }
}
