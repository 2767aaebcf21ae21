//! Check command - check one resource or resource type now

use super::open_store;
use crate::cache::DbResourceCacheFactory;
use crate::cli::args::CheckArgs;
use crate::config::Config;
use crate::db::LockFactory;
use crate::error::{HangarError, HangarResult};
use crate::radar::{PipelineDb, ResourceScanner, ResourceTypeScanner, Scanner};
use crate::resource::types::Version;
use crate::resource::WorkerResourceFactory;
use crate::ui::{self, UiContext};
use crate::worker::{ContainerRuntime, DbWorker, PodmanRuntime};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Execute the check command
pub async fn execute(args: CheckArgs, config: &Config) -> HangarResult<()> {
    let ctx = UiContext::detect();
    let from = parse_version(&args.from)?;

    let store = open_store(config).await?;
    let pipeline = store
        .find_pipeline(&args.pipeline)
        .await?
        .ok_or_else(|| HangarError::PipelineNotFound(args.pipeline.clone()))?;

    let runtime = Arc::new(PodmanRuntime::new());
    runtime.ensure_ready().await?;
    debug!(runtime = runtime.runtime_name(), worker = %config.worker.name, "runtime ready");

    let worker = DbWorker::new(config.worker.name.clone(), store.clone(), runtime);
    worker
        .register_base_resource_types(&config.worker.base_resource_types)
        .await?;

    let db = Arc::new(PipelineDb::new(
        store.clone(),
        LockFactory::new(store.clone()),
        pipeline,
        config.radar.lock_lease(),
    ));
    let resource_factory = Arc::new(WorkerResourceFactory::new(Arc::new(worker)));
    let config_factory = Arc::new(DbResourceCacheFactory::new(store.clone()));
    let scanner: Box<dyn Scanner> = if args.resource_type {
        Box::new(ResourceTypeScanner::new(
            resource_factory,
            config_factory,
            db,
            &config.radar,
        ))
    } else {
        Box::new(ResourceScanner::new(
            resource_factory,
            config_factory,
            db,
            &config.radar,
        ))
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling check");
            on_interrupt.cancel();
        }
    });

    let result = if args.from.is_empty() {
        scanner.scan(&args.name, &cancel).await
    } else {
        scanner
            .scan_from_version(&args.name, from.as_ref(), &cancel)
            .await
    };
    store.close().await;
    result?;

    ui::step_ok(&ctx, &format!("Checked {}/{}", args.pipeline, args.name));
    Ok(())
}

/// `KEY=VALUE` pairs into a version; no pairs means no starting version
fn parse_version(pairs: &[String]) -> HangarResult<Option<Version>> {
    if pairs.is_empty() {
        return Ok(None);
    }

    let mut version = Version::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            HangarError::User(format!("Invalid version field '{}': expected KEY=VALUE", pair))
        })?;
        version.insert(key.to_string(), value.to_string());
    }
    Ok(Some(version))
}
