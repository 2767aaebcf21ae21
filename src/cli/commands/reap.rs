//! Reap command - destroy eligible containers and volumes

use super::open_store;
use crate::cli::args::ReapArgs;
use crate::config::Config;
use crate::error::HangarResult;
use crate::lifecycle::{ContainerRepository, Reaper, VolumeRepository};
use crate::ui::{self, UiContext};
use crate::worker::{ContainerRuntime, PodmanRuntime};
use std::sync::Arc;

/// Execute the reap command
pub async fn execute(args: ReapArgs, config: &Config) -> HangarResult<()> {
    let ctx = UiContext::detect();
    let store = open_store(config).await?;

    if args.gc {
        let (summary, result) = super::gc::collect(&store, config).await;
        if let Err(e) = result {
            ui::step_warn_hint(&ctx, "Garbage collection incomplete", &e.to_string());
        }
        ui::step_ok(
            &ctx,
            &format!(
                "Collected {} cache(s) and {} config(s)",
                summary.caches, summary.configs
            ),
        );
    }

    let runtime = Arc::new(PodmanRuntime::new());
    runtime.ensure_ready().await?;

    let reaper = Reaper::new(
        ContainerRepository::new(store.clone()),
        VolumeRepository::new(store.clone()),
        runtime,
    );
    let result = reaper.reap().await;
    store.close().await;
    let summary = result?;

    ui::step_ok(
        &ctx,
        &format!(
            "Destroyed {} container(s) and {} volume(s)",
            summary.containers, summary.volumes
        ),
    );
    if summary.skipped > 0 {
        ui::remark(
            &ctx,
            &format!("{} left for the next pass", summary.skipped),
        );
    }
    Ok(())
}
