//! Gc command - one collection pass over builds, uses, caches and configs

use super::open_store;
use crate::cli::args::{GcArgs, OutputFormat};
use crate::config::Config;
use crate::db::Store;
use crate::error::HangarResult;
use crate::gc::{
    AggregateCollector, BuildCollector, CacheSweeper, Collector, GcSummary, RecordingObserver,
    ResourceCacheCollector, ResourceCacheUseCollector,
};
use crate::ui::{self, UiContext};
use std::sync::Arc;
use std::time::Duration;

/// Execute the gc command
pub async fn execute(args: GcArgs, config: &Config) -> HangarResult<()> {
    let store = open_store(config).await?;
    let (summary, result) = collect(&store, config).await;
    store.close().await;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Plain => print_plain(&summary),
        OutputFormat::Table => print_table(&summary),
    }
    result
}

/// Run every collector once. The summary covers whatever was deleted
/// even when a collector failed.
pub(crate) async fn collect(store: &Store, config: &Config) -> (GcSummary, HangarResult<()>) {
    let observer = Arc::new(RecordingObserver::new());
    let grace = Duration::from_secs(u64::from(config.gc.one_off_build_grace_hours) * 3600);
    let sweeper = Arc::new(CacheSweeper::new(store.clone(), observer.clone(), grace));

    // Builds first so their uses are collectable in the same pass
    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(BuildCollector::new(store.clone(), observer.clone())),
        Box::new(ResourceCacheUseCollector::new(sweeper.clone())),
        Box::new(ResourceCacheCollector::new(sweeper)),
    ];
    let result = AggregateCollector::new(collectors).run().await;
    (GcSummary::from_events(&observer.events()), result)
}

fn print_table(summary: &GcSummary) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "Garbage collection");
    ui::key_value(&ctx, "builds released", &summary.builds_released.to_string());
    ui::key_value(&ctx, "cache uses", &summary.cache_uses.to_string());
    ui::key_value(&ctx, "config uses", &summary.config_uses.to_string());
    ui::key_value(&ctx, "caches", &summary.caches.to_string());
    ui::key_value(&ctx, "configs", &summary.configs.to_string());
}

fn print_plain(summary: &GcSummary) {
    println!("builds_released={}", summary.builds_released);
    println!("cache_uses={}", summary.cache_uses);
    println!("config_uses={}", summary.config_uses);
    println!("caches={}", summary.caches);
    println!("configs={}", summary.configs);
}
