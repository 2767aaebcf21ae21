//! Garbage collection of uses, caches and configs
//!
//! Every sweep is a single predicate-gated statement: rows are only
//! deleted if they are still eligible when the statement runs, so sweeps
//! may overlap with each other and with scanners in other processes.
//! Deleted rows are reported to a [`GcObserver`] rather than logged
//! inline.

pub mod build_collector;
pub mod collector;
pub mod sweeps;

pub use build_collector::BuildCollector;
pub use collector::{AggregateCollector, Collector, ResourceCacheCollector, ResourceCacheUseCollector};
pub use sweeps::CacheSweeper;

use crate::cache::ResourceUser;
use crate::resource::types::Version;
use std::sync::Mutex;
use tracing::debug;

/// Which use table a deleted use came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseKind {
    Cache,
    Config,
}

/// Something a sweep removed
#[derive(Debug, Clone, PartialEq)]
pub enum GcEvent {
    UseDeleted {
        kind: UseKind,
        target_id: i64,
        owner: ResourceUser,
    },
    CacheDeleted {
        id: i64,
        resource_config_id: i64,
        version: Version,
    },
    ConfigDeleted {
        id: i64,
    },
    BuildReleased {
        build_id: i64,
    },
}

/// Receives every deletion made by the collectors
pub trait GcObserver: Send + Sync {
    fn on_event(&self, event: GcEvent);
}

/// Default observer: one debug line per event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl GcObserver for TracingObserver {
    fn on_event(&self, event: GcEvent) {
        match event {
            GcEvent::UseDeleted {
                kind: UseKind::Cache,
                target_id,
                owner,
            } => debug!(resource_cache_id = target_id, %owner, "deleted resource cache use"),
            GcEvent::UseDeleted {
                kind: UseKind::Config,
                target_id,
                owner,
            } => debug!(resource_config_id = target_id, %owner, "deleted resource config use"),
            GcEvent::CacheDeleted {
                id,
                resource_config_id,
                version,
            } => debug!(id, resource_config_id, ?version, "deleted resource cache"),
            GcEvent::ConfigDeleted { id } => debug!(id, "deleted resource config"),
            GcEvent::BuildReleased { build_id } => {
                debug!(build_id, "build no longer interceptible")
            }
        }
    }
}

/// Keeps events in memory; used by the CLI summary and in tests
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<GcEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GcEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl GcObserver for RecordingObserver {
    fn on_event(&self, event: GcEvent) {
        TracingObserver.on_event(event.clone());
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Counts of deleted rows, by kind
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct GcSummary {
    pub cache_uses: usize,
    pub config_uses: usize,
    pub caches: usize,
    pub configs: usize,
    pub builds_released: usize,
}

impl GcSummary {
    pub fn from_events(events: &[GcEvent]) -> Self {
        let mut summary = Self::default();
        for event in events {
            match event {
                GcEvent::UseDeleted {
                    kind: UseKind::Cache,
                    ..
                } => summary.cache_uses += 1,
                GcEvent::UseDeleted {
                    kind: UseKind::Config,
                    ..
                } => summary.config_uses += 1,
                GcEvent::CacheDeleted { .. } => summary.caches += 1,
                GcEvent::ConfigDeleted { .. } => summary.configs += 1,
                GcEvent::BuildReleased { .. } => summary.builds_released += 1,
            }
        }
        summary
    }
}
