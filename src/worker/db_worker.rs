//! Worker backed by the store and a local container runtime

use super::runtime::{ContainerConfig, ContainerRuntime, MountConfig, ProcessOutput};
use super::{Container, ContainerSpec, ImageSpec, Volume, VolumeMount, Worker};
use crate::cache::{UsedResourceCache, UsedResourceConfig};
use crate::config::BaseResourceTypeConfig;
use crate::db::Store;
use crate::error::{HangarError, HangarResult};
use crate::lifecycle::{
    ContainerMetadata, ContainerOwner, ContainerRepository, ContainerState, CreatedVolume,
    VolumeOwner, VolumeRepository, VolumeState,
};
use crate::resource::types::{VersionedResourceType, VersionedResourceTypes};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct DbWorker {
    name: String,
    store: Store,
    runtime: Arc<dyn ContainerRuntime>,
    containers: ContainerRepository,
    volumes: VolumeRepository,
}

impl DbWorker {
    pub fn new(name: impl Into<String>, store: Store, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            name: name.into(),
            containers: ContainerRepository::new(store.clone()),
            volumes: VolumeRepository::new(store.clone()),
            store,
            runtime,
        }
    }

    /// Record the base types this worker provides. Types no longer listed
    /// are removed, which makes their check sessions stale.
    pub async fn register_base_resource_types(
        &self,
        types: &[BaseResourceTypeConfig],
    ) -> HangarResult<()> {
        let mut kept = HashSet::new();
        for base in types {
            let used = self.store.find_or_create_base_resource_type(&base.name).await?;
            sqlx::query(
                "INSERT INTO worker_base_resource_types (worker_name, base_resource_type_id, image, version) \
                 VALUES (?, ?, ?, ?) \
                 ON CONFLICT (worker_name, base_resource_type_id) \
                 DO UPDATE SET image = excluded.image, version = excluded.version",
            )
            .bind(&self.name)
            .bind(used.id)
            .bind(&base.image)
            .bind(&base.version)
            .execute(self.store.pool())
            .await?;
            kept.insert(used.id);
        }

        let registered: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT id, base_resource_type_id FROM worker_base_resource_types WHERE worker_name = ?",
        )
        .bind(&self.name)
        .fetch_all(self.store.pool())
        .await?;

        for (id, base_id) in registered {
            if !kept.contains(&base_id) {
                sqlx::query("DELETE FROM worker_base_resource_types WHERE id = ?")
                    .bind(id)
                    .execute(self.store.pool())
                    .await?;
                info!(worker = %self.name, base_resource_type_id = base_id, "base resource type removed");
            }
        }
        Ok(())
    }

    async fn image_for(
        &self,
        spec: &ImageSpec,
        types: &VersionedResourceTypes,
    ) -> HangarResult<String> {
        if let Some(custom) = types.lookup(&spec.resource_type) {
            return custom_type_image(custom);
        }

        let image: Option<String> = sqlx::query_scalar(
            "SELECT w.image FROM worker_base_resource_types w \
             JOIN base_resource_types b ON b.id = w.base_resource_type_id \
             WHERE w.worker_name = ? AND b.name = ?",
        )
        .bind(&self.name)
        .bind(&spec.resource_type)
        .fetch_optional(self.store.pool())
        .await?;
        image.ok_or_else(|| HangarError::BaseResourceTypeNotFound(spec.resource_type.clone()))
    }

    fn volume(&self, volume: CreatedVolume) -> Arc<dyn Volume> {
        Arc::new(DbVolume {
            handle: volume.handle().to_string(),
            volume: Mutex::new(volume),
        })
    }

    async fn existing_container(&self, id: i64, handle: String) -> HangarResult<Arc<dyn Container>> {
        let mounts = self
            .volumes
            .container_volumes(id)
            .await?
            .into_iter()
            .filter_map(|volume| {
                let mount_path = volume.record().mount_path.clone()?;
                Some(VolumeMount {
                    volume: self.volume(volume),
                    mount_path,
                })
            })
            .collect();
        Ok(Arc::new(DbContainer {
            handle,
            runtime: self.runtime.clone(),
            mounts,
        }))
    }
}

/// Image reference for a pipeline-defined type: the checked digest when
/// there is one, otherwise the configured tag
fn custom_type_image(custom: &VersionedResourceType) -> HangarResult<String> {
    let repository = custom
        .source
        .get("repository")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            HangarError::InvalidData(format!(
                "resource type '{}' has no repository in its source",
                custom.name
            ))
        })?;

    if let Some(digest) = custom.version.as_ref().and_then(|v| v.get("digest")) {
        return Ok(format!("{repository}@{digest}"));
    }

    let tag = custom
        .source
        .get("tag")
        .and_then(|v| v.as_str())
        .unwrap_or("latest");
    Ok(format!("{repository}:{tag}"))
}

fn moved(what: &str, handle: &str) -> HangarError {
    HangarError::Conflict(format!("{what} {handle} changed state while being created"))
}

#[async_trait]
impl Worker for DbWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_session_owner(
        &self,
        config: &UsedResourceConfig,
        expires_at: DateTime<Utc>,
    ) -> HangarResult<ContainerOwner> {
        let base = config.base_resource_type();
        let wbrt: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM worker_base_resource_types \
             WHERE worker_name = ? AND base_resource_type_id = ?",
        )
        .bind(&self.name)
        .bind(base.id)
        .fetch_optional(self.store.pool())
        .await?;

        let worker_base_resource_type_id =
            wbrt.ok_or_else(|| HangarError::BaseResourceTypeNotFound(base.name.clone()))?;
        Ok(ContainerOwner::CheckSession {
            resource_config_id: config.id,
            worker_base_resource_type_id,
            expires_at,
        })
    }

    async fn find_or_create_container(
        &self,
        owner: &ContainerOwner,
        metadata: &ContainerMetadata,
        spec: &ContainerSpec,
        types: &VersionedResourceTypes,
    ) -> HangarResult<Arc<dyn Container>> {
        let (record, inserted) = self.containers.find_or_insert(&self.name, owner, metadata).await?;
        match record.state {
            ContainerState::Created => {
                debug!(handle = %record.handle, "reusing container");
                return self.existing_container(record.id, record.handle).await;
            }
            ContainerState::Destroying => return Err(moved("container", &record.handle)),
            ContainerState::Creating if !inserted => {
                debug!(handle = %record.handle, "container is being created by another caller");
                return Err(HangarError::Conflict(format!(
                    "container {} is still being created",
                    record.handle
                )));
            }
            ContainerState::Creating => {}
        }

        let image = self.image_for(&spec.image, types).await?;

        let mut mounts = Vec::new();
        let mut mount_configs = Vec::new();
        for mount_path in spec.outputs.values() {
            let creating = self
                .volumes
                .create_volume(
                    &self.name,
                    &VolumeOwner::ContainerMount {
                        container_id: record.id,
                        mount_path: mount_path.clone(),
                    },
                )
                .await?;
            let handle = creating.handle().to_string();
            self.runtime.create_volume(&handle, None).await?;

            let mut volume = creating
                .created()
                .await?
                .ok_or_else(|| moved("volume", &handle))?;
            if spec.image.privileged {
                volume.set_privileged(true).await?;
            }

            mount_configs.push(MountConfig {
                volume: handle,
                path: mount_path.clone(),
            });
            mounts.push(VolumeMount {
                volume: self.volume(volume),
                mount_path: mount_path.clone(),
            });
        }

        let config = ContainerConfig {
            handle: record.handle.clone(),
            image,
            privileged: spec.image.privileged,
            env: spec.env.clone(),
            mounts: mount_configs,
        };
        self.runtime.create_container(&config).await?;

        self.containers
            .creating(&record.handle)
            .await?
            .ok_or_else(|| moved("container", &record.handle))?
            .created()
            .await?
            .ok_or_else(|| moved("container", &record.handle))?;

        info!(handle = %record.handle, worker = %self.name, "container created");
        Ok(Arc::new(DbContainer {
            handle: record.handle,
            runtime: self.runtime.clone(),
            mounts,
        }))
    }

    async fn find_or_create_volume_for_resource_cache(
        &self,
        cache: &UsedResourceCache,
    ) -> HangarResult<Arc<dyn Volume>> {
        let record = self
            .volumes
            .create_resource_cache_volume(&self.name, cache.id)
            .await?;

        let created = match record.state {
            VolumeState::Created => self.volumes.created(&record.handle).await?,
            VolumeState::Creating => {
                self.runtime.create_volume(&record.handle, None).await?;
                match self.volumes.creating(&record.handle).await? {
                    Some(creating) => creating.created().await?,
                    None => None,
                }
            }
            VolumeState::Destroying => None,
        };

        let volume = created.ok_or_else(|| moved("volume", &record.handle))?;
        Ok(self.volume(volume))
    }

    async fn find_initialized_volume_for_resource_cache(
        &self,
        cache: &UsedResourceCache,
    ) -> HangarResult<Option<Arc<dyn Volume>>> {
        Ok(self
            .volumes
            .find_initialized_volume_for_resource_cache(&self.name, cache.id)
            .await?
            .map(|volume| self.volume(volume)))
    }
}

struct DbContainer {
    handle: String,
    runtime: Arc<dyn ContainerRuntime>,
    mounts: Vec<VolumeMount>,
}

#[async_trait]
impl Container for DbContainer {
    fn handle(&self) -> &str {
        &self.handle
    }

    fn volume_mounts(&self) -> &[VolumeMount] {
        &self.mounts
    }

    async fn run_script(
        &self,
        path: &str,
        args: &[String],
        stdin: &[u8],
        abort: &CancellationToken,
    ) -> HangarResult<ProcessOutput> {
        self.runtime.run(&self.handle, path, args, stdin, abort).await
    }
}

struct DbVolume {
    handle: String,
    volume: Mutex<CreatedVolume>,
}

#[async_trait]
impl Volume for DbVolume {
    fn handle(&self) -> &str {
        &self.handle
    }

    async fn set_privileged(&self, privileged: bool) -> HangarResult<()> {
        let mut volume = self.volume.lock().await;
        if !volume.set_privileged(privileged).await? {
            return Err(HangarError::VolumeNotFound(self.handle.clone()));
        }
        Ok(())
    }

    async fn initialize_resource_cache(&self, cache: &UsedResourceCache) -> HangarResult<bool> {
        self.volume
            .lock()
            .await
            .initialize_resource_cache(cache.id)
            .await
    }
}
