//! What a scanner needs from the store, scoped to one pipeline

use super::CheckLock;
use crate::db::pipeline::CheckedTable;
use crate::db::{duration_millis, LockFactory, LockName, PipelineRecord, SavedResource, SavedResourceType, Store};
use crate::error::HangarResult;
use crate::resource::types::{Version, VersionedResourceTypes};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::futures::Notified;
use tracing::debug;

#[async_trait]
pub trait RadarDb: Send + Sync {
    fn pipeline_id(&self) -> i64;

    fn pipeline_name(&self) -> &str;

    async fn is_paused(&self) -> HangarResult<bool>;

    async fn resource(&self, name: &str) -> HangarResult<Option<SavedResource>>;

    async fn resource_type(&self, name: &str) -> HangarResult<Option<SavedResourceType>>;

    async fn resource_types(&self) -> HangarResult<VersionedResourceTypes>;

    async fn latest_version(&self, resource_id: i64) -> HangarResult<Option<Version>>;

    /// Save versions in the order given; later ones are newer
    async fn save_resource_versions(&self, resource_id: i64, versions: &[Version])
        -> HangarResult<()>;

    async fn save_resource_type_version(
        &self,
        resource_type_id: i64,
        version: &Version,
    ) -> HangarResult<()>;

    async fn set_resource_check_error(
        &self,
        resource_id: i64,
        check_error: Option<&str>,
    ) -> HangarResult<()>;

    async fn set_resource_type_check_error(
        &self,
        resource_type_id: i64,
        check_error: Option<&str>,
    ) -> HangarResult<()>;

    /// Take the resource's checking lock. Unless `immediate`, also require
    /// `interval` to have passed since the last check.
    async fn acquire_resource_checking_lock(
        &self,
        resource_id: i64,
        interval: Duration,
        immediate: bool,
    ) -> HangarResult<Option<Box<dyn CheckLock>>>;

    async fn acquire_resource_type_checking_lock(
        &self,
        resource_type_id: i64,
        interval: Duration,
        immediate: bool,
    ) -> HangarResult<Option<Box<dyn CheckLock>>>;

    /// Resolves when a checking lock held by this process is released
    fn lock_released(&self) -> Notified<'_>;
}

/// [`RadarDb`] over the store
#[derive(Debug, Clone)]
pub struct PipelineDb {
    store: Store,
    locks: LockFactory,
    pipeline: PipelineRecord,
    lease: Duration,
}

impl PipelineDb {
    pub fn new(store: Store, locks: LockFactory, pipeline: PipelineRecord, lease: Duration) -> Self {
        Self {
            store,
            locks,
            pipeline,
            lease,
        }
    }

    async fn acquire(
        &self,
        name: LockName,
        table: CheckedTable,
        id: i64,
        interval: Duration,
        immediate: bool,
    ) -> HangarResult<Option<Box<dyn CheckLock>>> {
        let Some(lock) = self.locks.acquire(&name, self.lease).await? else {
            return Ok(None);
        };

        let stamped = match self
            .store
            .stamp_last_checked(table, id, duration_millis(interval), immediate)
            .await
        {
            Ok(stamped) => stamped,
            Err(e) => {
                lock.release().await?;
                return Err(e);
            }
        };

        if !stamped {
            debug!(lock = %name, "checked too recently");
            lock.release().await?;
            return Ok(None);
        }
        Ok(Some(Box::new(lock)))
    }
}

#[async_trait]
impl RadarDb for PipelineDb {
    fn pipeline_id(&self) -> i64 {
        self.pipeline.id
    }

    fn pipeline_name(&self) -> &str {
        &self.pipeline.name
    }

    async fn is_paused(&self) -> HangarResult<bool> {
        self.store.is_pipeline_paused(self.pipeline.id).await
    }

    async fn resource(&self, name: &str) -> HangarResult<Option<SavedResource>> {
        self.store.resource(self.pipeline.id, name).await
    }

    async fn resource_type(&self, name: &str) -> HangarResult<Option<SavedResourceType>> {
        self.store.resource_type(self.pipeline.id, name).await
    }

    async fn resource_types(&self) -> HangarResult<VersionedResourceTypes> {
        self.store.resource_types(self.pipeline.id).await
    }

    async fn latest_version(&self, resource_id: i64) -> HangarResult<Option<Version>> {
        self.store.latest_resource_version(resource_id).await
    }

    async fn save_resource_versions(
        &self,
        resource_id: i64,
        versions: &[Version],
    ) -> HangarResult<()> {
        self.store.save_resource_versions(resource_id, versions).await
    }

    async fn save_resource_type_version(
        &self,
        resource_type_id: i64,
        version: &Version,
    ) -> HangarResult<()> {
        self.store
            .save_resource_type_version(resource_type_id, version)
            .await
    }

    async fn set_resource_check_error(
        &self,
        resource_id: i64,
        check_error: Option<&str>,
    ) -> HangarResult<()> {
        self.store
            .set_resource_check_error(resource_id, check_error)
            .await
    }

    async fn set_resource_type_check_error(
        &self,
        resource_type_id: i64,
        check_error: Option<&str>,
    ) -> HangarResult<()> {
        self.store
            .set_resource_type_check_error(resource_type_id, check_error)
            .await
    }

    async fn acquire_resource_checking_lock(
        &self,
        resource_id: i64,
        interval: Duration,
        immediate: bool,
    ) -> HangarResult<Option<Box<dyn CheckLock>>> {
        let name = LockName::ResourceChecking {
            pipeline_id: self.pipeline.id,
            resource_id,
        };
        self.acquire(name, CheckedTable::Resources, resource_id, interval, immediate)
            .await
    }

    async fn acquire_resource_type_checking_lock(
        &self,
        resource_type_id: i64,
        interval: Duration,
        immediate: bool,
    ) -> HangarResult<Option<Box<dyn CheckLock>>> {
        let name = LockName::ResourceTypeChecking {
            pipeline_id: self.pipeline.id,
            resource_type_id,
        };
        self.acquire(
            name,
            CheckedTable::ResourceTypes,
            resource_type_id,
            interval,
            immediate,
        )
        .await
    }

    fn lock_released(&self) -> Notified<'_> {
        self.locks.released()
    }
}
