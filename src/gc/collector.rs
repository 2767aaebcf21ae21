//! Collector seam used by the `gc` command and any periodic scheduler

use super::{BuildCollector, CacheSweeper};
use crate::error::HangarResult;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> HangarResult<()>;
}

#[async_trait]
impl Collector for BuildCollector {
    fn name(&self) -> &'static str {
        "builds"
    }

    async fn run(&self) -> HangarResult<()> {
        self.release_finished_builds().await.map(|_| ())
    }
}

/// The four use sweeps, in order
pub struct ResourceCacheUseCollector {
    sweeper: Arc<CacheSweeper>,
}

impl ResourceCacheUseCollector {
    pub fn new(sweeper: Arc<CacheSweeper>) -> Self {
        Self { sweeper }
    }
}

#[async_trait]
impl Collector for ResourceCacheUseCollector {
    fn name(&self) -> &'static str {
        "resource-cache-uses"
    }

    async fn run(&self) -> HangarResult<()> {
        let deleted = self.sweeper.clean_uses_for_finished_builds().await?
            + self.sweeper.clean_uses_for_inactive_resource_types().await?
            + self.sweeper.clean_uses_for_inactive_resources().await?
            + self.sweeper.clean_uses_for_paused_pipeline_resources().await?;
        debug!(deleted, "collected uses");
        Ok(())
    }
}

/// Cache sweep followed by the config sweep
pub struct ResourceCacheCollector {
    sweeper: Arc<CacheSweeper>,
}

impl ResourceCacheCollector {
    pub fn new(sweeper: Arc<CacheSweeper>) -> Self {
        Self { sweeper }
    }
}

#[async_trait]
impl Collector for ResourceCacheCollector {
    fn name(&self) -> &'static str {
        "resource-caches"
    }

    async fn run(&self) -> HangarResult<()> {
        self.sweeper.clean_up_invalid_caches().await?;
        self.sweeper.clean_up_unused_configs().await?;
        Ok(())
    }
}

/// Runs every collector even when one fails; the first failure is returned
pub struct AggregateCollector {
    collectors: Vec<Box<dyn Collector>>,
}

impl AggregateCollector {
    pub fn new(collectors: Vec<Box<dyn Collector>>) -> Self {
        Self { collectors }
    }
}

#[async_trait]
impl Collector for AggregateCollector {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    async fn run(&self) -> HangarResult<()> {
        let mut first_error = None;
        for collector in &self.collectors {
            if let Err(err) = collector.run().await {
                error!(collector = collector.name(), error = %err, "collector failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
