//! Checking a pipeline-defined resource type for a newer image version
//!
//! Same shape as the resource scanner, but a type only ever keeps its
//! newest version and its check container is privileged if the type is.

use super::{check_interval, release, wait_for_lock, CheckStart, RadarDb, Scanner};
use crate::cache::{ResourceConfigFactory, ResourceUser};
use crate::config::RadarConfig;
use crate::db::SavedResourceType;
use crate::error::{HangarError, HangarResult};
use crate::lifecycle::{ContainerMetadata, ContainerType};
use crate::resource::types::Version;
use crate::resource::ResourceFactory;
use crate::worker::{ContainerSpec, ImageSpec};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ResourceTypeScanner {
    resource_factory: Arc<dyn ResourceFactory>,
    config_factory: Arc<dyn ResourceConfigFactory>,
    db: Arc<dyn RadarDb>,
    default_interval: Duration,
    check_session_ttl: Duration,
}

impl ResourceTypeScanner {
    pub fn new(
        resource_factory: Arc<dyn ResourceFactory>,
        config_factory: Arc<dyn ResourceConfigFactory>,
        db: Arc<dyn RadarDb>,
        config: &RadarConfig,
    ) -> Self {
        Self {
            resource_factory,
            config_factory,
            db,
            default_interval: config.default_check_interval(),
            check_session_ttl: config.check_session_ttl(),
        }
    }

    /// `None` when the pipeline is paused
    async fn precheck(&self, name: &str) -> HangarResult<Option<(SavedResourceType, Duration)>> {
        if self.db.is_paused().await? {
            debug!(pipeline = self.db.pipeline_name(), "pipeline paused");
            return Ok(None);
        }

        let resource_type = self
            .db
            .resource_type(name)
            .await?
            .ok_or_else(|| HangarError::ResourceTypeNotFound(name.to_string()))?;

        match check_interval(resource_type.check_every.as_deref(), self.default_interval) {
            Ok(interval) => Ok(Some((resource_type, interval))),
            Err(e) => {
                self.record_check_error(&resource_type, Some(&e)).await;
                Err(e)
            }
        }
    }

    async fn record_check_error(&self, resource_type: &SavedResourceType, err: Option<&HangarError>) {
        let message = err.map(|e| e.to_string());
        if let Err(e) = self
            .db
            .set_resource_type_check_error(resource_type.id, message.as_deref())
            .await
        {
            warn!(resource_type = %resource_type.name, error = %e, "failed to record check error");
        }
    }

    async fn scan_with_lock(
        &self,
        name: &str,
        start: CheckStart<'_>,
        cancel: &CancellationToken,
    ) -> HangarResult<()> {
        let Some((resource_type, interval)) = self.precheck(name).await? else {
            return Ok(());
        };

        let db = self.db.as_ref();
        let resource_type_id = resource_type.id;
        let lock = wait_for_lock(db, cancel, move || {
            db.acquire_resource_type_checking_lock(resource_type_id, interval, true)
        })
        .await?;

        let result = self
            .check(
                &resource_type,
                start,
                matches!(start, CheckStart::From(_)),
                cancel,
            )
            .await;
        release(lock).await;
        result
    }

    async fn check(
        &self,
        resource_type: &SavedResourceType,
        start: CheckStart<'_>,
        escalate_script_failure: bool,
        abort: &CancellationToken,
    ) -> HangarResult<()> {
        match self.try_check(resource_type, start, abort).await {
            Ok(()) => {
                self.record_check_error(resource_type, None).await;
                Ok(())
            }
            Err(e) if e.is_script_failure() => {
                info!(resource_type = %resource_type.name, error = %e, "check failed");
                self.record_check_error(resource_type, Some(&e)).await;
                if escalate_script_failure {
                    Err(e)
                } else {
                    Ok(())
                }
            }
            Err(e) => {
                error!(resource_type = %resource_type.name, error = %e, "failed to check");
                self.record_check_error(resource_type, Some(&e)).await;
                Err(e)
            }
        }
    }

    async fn try_check(
        &self,
        resource_type: &SavedResourceType,
        start: CheckStart<'_>,
        abort: &CancellationToken,
    ) -> HangarResult<()> {
        // A type named after a base type builds on that base type, not itself
        let types = self.db.resource_types().await?.without(&resource_type.name);

        let config = self
            .config_factory
            .find_or_create_resource_config(
                ResourceUser::ResourceType(resource_type.id),
                &resource_type.type_,
                &resource_type.source,
                &types,
            )
            .await?;

        let spec = ContainerSpec {
            image: ImageSpec {
                resource_type: resource_type.type_.clone(),
                privileged: resource_type.privileged,
            },
            tags: resource_type.tags.clone(),
            ..Default::default()
        };
        let metadata = ContainerMetadata {
            container_type: Some(ContainerType::Check),
            pipeline_name: Some(self.db.pipeline_name().to_string()),
            resource_name: Some(resource_type.name.clone()),
            ..Default::default()
        };

        let checker = self
            .resource_factory
            .new_check_resource(&config, self.check_session_ttl, &metadata, &spec, &types)
            .await?;

        let from: Option<Version> = match start {
            CheckStart::Latest => resource_type.version.clone(),
            CheckStart::From(version) => version.cloned(),
        };

        let versions = checker
            .check(&resource_type.source, from.as_ref(), abort)
            .await?;
        let Some(newest) = versions.last() else {
            debug!(resource_type = %resource_type.name, "no new versions");
            return Ok(());
        };
        if from.as_ref() == Some(newest) {
            debug!(resource_type = %resource_type.name, "already at the newest version");
            return Ok(());
        }

        info!(
            resource_type = %resource_type.name,
            total = versions.len(),
            version = ?newest,
            "versions found"
        );
        self.db
            .save_resource_type_version(resource_type.id, newest)
            .await
    }
}

#[async_trait]
impl Scanner for ResourceTypeScanner {
    async fn run(&self, name: &str) -> (Duration, HangarResult<()>) {
        let (resource_type, interval) = match self.precheck(name).await {
            Ok(Some(ready)) => ready,
            Ok(None) => return (self.default_interval, Ok(())),
            Err(e) => return (self.default_interval, Err(e)),
        };

        let lock = match self
            .db
            .acquire_resource_type_checking_lock(resource_type.id, interval, false)
            .await
        {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                debug!(resource_type = name, "did not get lock");
                return (interval, Err(HangarError::FailedToAcquireLock));
            }
            Err(e) => {
                error!(resource_type = name, error = %e, "failed to get lock");
                return (interval, Err(HangarError::FailedToAcquireLock));
            }
        };

        let result = self
            .check(
                &resource_type,
                CheckStart::Latest,
                false,
                &CancellationToken::new(),
            )
            .await;
        release(lock).await;
        (interval, result)
    }

    async fn scan(&self, name: &str, cancel: &CancellationToken) -> HangarResult<()> {
        self.scan_with_lock(name, CheckStart::Latest, cancel).await
    }

    async fn scan_from_version(
        &self,
        name: &str,
        from: Option<&Version>,
        cancel: &CancellationToken,
    ) -> HangarResult<()> {
        self.scan_with_lock(name, CheckStart::From(from), cancel)
            .await
    }
}
