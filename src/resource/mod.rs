//! Resources: the check/get protocol, fetched instances and fetch sources

pub mod fetch_source;
pub mod instance;
pub mod script;
pub mod types;

pub use fetch_source::{FetchOptions, FetchSource, ResourceInstanceFetchSource, VersionedSource};
pub use instance::ResourceInstance;
pub use script::{FetchedVersion, Resource, ScriptResource};

use crate::cache::UsedResourceConfig;
use crate::error::{HangarError, HangarResult};
use crate::lifecycle::ContainerMetadata;
use crate::worker::{ContainerSpec, Worker};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use types::VersionedResourceTypes;

/// Builds resources able to run checks for a resource config
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    /// A resource backed by a check-session container that lives for
    /// `session_ttl`
    async fn new_check_resource(
        &self,
        config: &UsedResourceConfig,
        session_ttl: Duration,
        metadata: &ContainerMetadata,
        spec: &ContainerSpec,
        types: &VersionedResourceTypes,
    ) -> HangarResult<Box<dyn Resource>>;
}

/// Runs checks in containers on a single worker
pub struct WorkerResourceFactory {
    worker: Arc<dyn Worker>,
}

impl WorkerResourceFactory {
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl ResourceFactory for WorkerResourceFactory {
    async fn new_check_resource(
        &self,
        config: &UsedResourceConfig,
        session_ttl: Duration,
        metadata: &ContainerMetadata,
        spec: &ContainerSpec,
        types: &VersionedResourceTypes,
    ) -> HangarResult<Box<dyn Resource>> {
        let ttl = chrono::Duration::from_std(session_ttl)
            .map_err(|e| HangarError::InvalidData(format!("check session ttl: {e}")))?;
        let owner = self
            .worker
            .check_session_owner(config, Utc::now() + ttl)
            .await?;

        let container = self
            .worker
            .find_or_create_container(&owner, metadata, spec, types)
            .await?;
        debug!(
            worker = self.worker.name(),
            container = container.handle(),
            resource_config = config.id,
            "check container ready"
        );
        Ok(Box::new(ScriptResource::new(container)))
    }
}
