//! Checking a pipeline resource for new versions

use super::{check_interval, release, wait_for_lock, CheckStart, RadarDb, Scanner};
use crate::cache::{ResourceConfigFactory, ResourceUser};
use crate::config::RadarConfig;
use crate::db::SavedResource;
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

pub struct ResourceScanner {
    resource_factory: Arc<dyn ResourceFactory>,
    config_factory: Arc<dyn ResourceConfigFactory>,
    db: Arc<dyn RadarDb>,
    default_interval: Duration,
    check_session_ttl: Duration,
    external_url: String,
}

/// Outcome of the checks done before taking the lock
enum Precheck {
    Skip,
    Ready {
        resource: SavedResource,
        interval: Duration,
    },
}

impl ResourceScanner {
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
            external_url: config.external_url.clone(),
        }
    }

    async fn precheck(&self, name: &str) -> HangarResult<Precheck> {
        if self.db.is_paused().await? {
            debug!(pipeline = self.db.pipeline_name(), "pipeline paused");
            return Ok(Precheck::Skip);
        }

        let resource = self
            .db
            .resource(name)
            .await?
            .ok_or_else(|| HangarError::ResourceNotFound(name.to_string()))?;

        if resource.paused {
            debug!(resource = name, "resource paused");
            return Ok(Precheck::Skip);
        }

        let interval = match check_interval(resource.check_every.as_deref(), self.default_interval)
        {
            Ok(interval) => interval,
            Err(e) => {
                error!(resource = name, error = %e, "failed to parse check interval");
                self.record_check_error(&resource, Some(&e)).await;
                return Err(e);
            }
        };

        Ok(Precheck::Ready { resource, interval })
    }

    async fn record_check_error(&self, resource: &SavedResource, err: Option<&HangarError>) {
        let message = err.map(|e| e.to_string());
        if let Err(e) = self
            .db
            .set_resource_check_error(resource.id, message.as_deref())
            .await
        {
            warn!(resource = %resource.name, error = %e, "failed to record check error");
        }
    }

    async fn scan_with_lock(
        &self,
        name: &str,
        start: CheckStart<'_>,
        cancel: &CancellationToken,
    ) -> HangarResult<()> {
        let (resource, interval) = match self.precheck(name).await? {
            Precheck::Skip => return Ok(()),
            Precheck::Ready { resource, interval } => (resource, interval),
        };

        let db = self.db.as_ref();
        let resource_id = resource.id;
        let lock = wait_for_lock(db, cancel, move || {
            db.acquire_resource_checking_lock(resource_id, interval, true)
        })
        .await?;

        let result = self
            .check(&resource, start, matches!(start, CheckStart::From(_)), cancel)
            .await;
        release(lock).await;
        result
    }

    /// Run the check and record its outcome against the resource
    async fn check(
        &self,
        resource: &SavedResource,
        start: CheckStart<'_>,
        escalate_script_failure: bool,
        abort: &CancellationToken,
    ) -> HangarResult<()> {
        match self.try_check(resource, start, abort).await {
            Ok(()) => {
                self.record_check_error(resource, None).await;
                Ok(())
            }
            Err(e) if e.is_script_failure() => {
                info!(resource = %resource.name, error = %e, "check failed");
                self.record_check_error(resource, Some(&e)).await;
                if escalate_script_failure {
                    Err(e)
                } else {
                    Ok(())
                }
            }
            Err(e) => {
                error!(resource = %resource.name, error = %e, "failed to check");
                self.record_check_error(resource, Some(&e)).await;
                Err(e)
            }
        }
    }

    async fn try_check(
        &self,
        resource: &SavedResource,
        start: CheckStart<'_>,
        abort: &CancellationToken,
    ) -> HangarResult<()> {
        let types = self.db.resource_types().await?.without(&resource.name);

        let config = self
            .config_factory
            .find_or_create_resource_config(
                ResourceUser::Resource(resource.id),
                &resource.type_,
                &resource.source,
                &types,
            )
            .await?;

        let spec = ContainerSpec {
            image: ImageSpec {
                resource_type: resource.type_.clone(),
                privileged: types
                    .lookup(&resource.type_)
                    .is_some_and(|custom| custom.privileged),
            },
            tags: resource.tags.clone(),
            env: vec![
                ("ATC_EXTERNAL_URL".to_string(), self.external_url.clone()),
                (
                    "RESOURCE_PIPELINE_NAME".to_string(),
                    self.db.pipeline_name().to_string(),
                ),
                ("RESOURCE_NAME".to_string(), resource.name.clone()),
            ],
            outputs: Default::default(),
        };
        let metadata = ContainerMetadata {
            container_type: Some(ContainerType::Check),
            pipeline_name: Some(self.db.pipeline_name().to_string()),
            resource_name: Some(resource.name.clone()),
            ..Default::default()
        };

        let checker = self
            .resource_factory
            .new_check_resource(&config, self.check_session_ttl, &metadata, &spec, &types)
            .await?;

        let from: Option<Version> = match start {
            CheckStart::Latest => self.db.latest_version(resource.id).await?,
            CheckStart::From(version) => version.cloned(),
        };

        debug!(resource = %resource.name, ?from, "checking");
        let versions = checker.check(&resource.source, from.as_ref(), abort).await?;

        if versions.is_empty() || (versions.len() == 1 && from.as_ref() == Some(&versions[0])) {
            debug!(resource = %resource.name, "no new versions");
            return Ok(());
        }

        info!(resource = %resource.name, total = versions.len(), "versions found");
        if let Err(e) = self
            .db
            .save_resource_versions(resource.id, &versions)
            .await
        {
            error!(resource = %resource.name, error = %e, "failed to save versions");
        }
        Ok(())
    }
}

#[async_trait]
impl Scanner for ResourceScanner {
    async fn run(&self, name: &str) -> (Duration, HangarResult<()>) {
        let (resource, interval) = match self.precheck(name).await {
            Ok(Precheck::Skip) => return (self.default_interval, Ok(())),
            Ok(Precheck::Ready { resource, interval }) => (resource, interval),
            Err(e) => return (self.default_interval, Err(e)),
        };

        let lock = match self
            .db
            .acquire_resource_checking_lock(resource.id, interval, false)
            .await
        {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                debug!(resource = name, "did not get lock");
                return (interval, Err(HangarError::FailedToAcquireLock));
            }
            Err(e) => {
                error!(resource = name, error = %e, "failed to get lock");
                return (interval, Err(HangarError::FailedToAcquireLock));
            }
        };

        let result = self
            .check(&resource, CheckStart::Latest, false, &CancellationToken::new())
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
