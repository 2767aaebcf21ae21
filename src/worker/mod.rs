//! Workers: where containers and volumes actually live
//!
//! The traits here are what the scanner and the fetch source see. `DbWorker`
//! implements them by pairing store rows with a [`ContainerRuntime`].

pub mod db_worker;
pub mod podman;
pub mod runtime;

pub use db_worker::DbWorker;
pub use podman::PodmanRuntime;
pub use runtime::{ContainerConfig, ContainerRuntime, MountConfig, ProcessOutput};

use crate::cache::{UsedResourceCache, UsedResourceConfig};
use crate::error::HangarResult;
use crate::lifecycle::{ContainerMetadata, ContainerOwner};
use crate::resource::types::VersionedResourceTypes;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Which image a container runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSpec {
    /// Base or pipeline-defined resource type providing the image
    pub resource_type: String,
    pub privileged: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: ImageSpec,
    pub tags: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Output name to mount path; each gets a fresh volume
    pub outputs: BTreeMap<String, String>,
}

#[async_trait]
pub trait Volume: Send + Sync {
    fn handle(&self) -> &str;

    async fn set_privileged(&self, privileged: bool) -> HangarResult<()>;

    /// Make this the worker's copy of `cache`. `false` if another volume
    /// got there first.
    async fn initialize_resource_cache(&self, cache: &UsedResourceCache) -> HangarResult<bool>;
}

/// A volume and where it is mounted
#[derive(Clone)]
pub struct VolumeMount {
    pub volume: Arc<dyn Volume>,
    pub mount_path: String,
}

impl fmt::Debug for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeMount")
            .field("volume", &self.volume.handle())
            .field("mount_path", &self.mount_path)
            .finish()
    }
}

#[async_trait]
pub trait Container: Send + Sync {
    fn handle(&self) -> &str;

    fn volume_mounts(&self) -> &[VolumeMount];

    /// Run a script inside the container and capture what it printed
    async fn run_script(
        &self,
        path: &str,
        args: &[String],
        stdin: &[u8],
        abort: &CancellationToken,
    ) -> HangarResult<ProcessOutput>;
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    /// Owner for a check container on this worker, living until `expires_at`
    async fn check_session_owner(
        &self,
        config: &UsedResourceConfig,
        expires_at: DateTime<Utc>,
    ) -> HangarResult<ContainerOwner>;

    async fn find_or_create_container(
        &self,
        owner: &ContainerOwner,
        metadata: &ContainerMetadata,
        spec: &ContainerSpec,
        types: &VersionedResourceTypes,
    ) -> HangarResult<Arc<dyn Container>>;

    async fn find_or_create_volume_for_resource_cache(
        &self,
        cache: &UsedResourceCache,
    ) -> HangarResult<Arc<dyn Volume>>;

    async fn find_initialized_volume_for_resource_cache(
        &self,
        cache: &UsedResourceCache,
    ) -> HangarResult<Option<Arc<dyn Volume>>>;
}
