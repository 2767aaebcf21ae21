//! Container and volume lifecycle
//!
//! Rows move `creating -> created -> destroying -> deleted`. Every move is
//! a compare-and-set on the current state, so two reapers racing on the
//! same row cannot both act on it: the loser gets `None` back.

pub mod container;
pub mod eligibility;
pub mod reaper;
pub mod state;
pub mod volume;

pub use container::{
    ContainerMetadata, ContainerOwner, ContainerRecord, ContainerRepository, ContainerType,
    ContainersForDeletion, CreatedContainer, CreatingContainer, DestroyingContainer,
};
pub use eligibility::{ContainerFacts, DeletionReason, VolumeFacts};
pub use reaper::{ReapSummary, Reaper};
pub use state::{ContainerState, VolumeState};
pub use volume::{
    CreatedVolume, CreatingVolume, DestroyingVolume, VolumeOwner, VolumeRecord, VolumeRepository,
    VolumesForDeletion,
};

use crate::error::HangarResult;
use sqlx::SqliteConnection;

/// Id of the worker's mapping for a resource cache, created on first use
pub(crate) async fn worker_resource_cache_id(
    conn: &mut SqliteConnection,
    worker_name: &str,
    resource_cache_id: i64,
) -> HangarResult<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO worker_resource_caches (worker_name, resource_cache_id) VALUES (?, ?) \
         ON CONFLICT (worker_name, resource_cache_id) DO UPDATE SET worker_name = excluded.worker_name \
         RETURNING id",
    )
    .bind(worker_name)
    .bind(resource_cache_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}
