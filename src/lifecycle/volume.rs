//! Volume rows and their state machine

use super::eligibility::{volume_deletion_reasons, ContainerFacts, DeletionReason, VolumeFacts};
use super::state::{ContainerState, VolumeState};
use super::worker_resource_cache_id;
use crate::db::{from_millis, now_millis, Store};
use crate::error::{HangarError, HangarResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use tracing::{debug, info};
use uuid::Uuid;

/// What a volume belongs to
#[derive(Debug, Clone, PartialEq)]
pub enum VolumeOwner {
    /// Mounted into a container at `mount_path`
    ContainerMount { container_id: i64, mount_path: String },
    /// Holds a resource cache on its worker
    ResourceCache { resource_cache_id: i64 },
    /// Holds the rootfs of a worker's base resource type
    BaseResourceType { worker_base_resource_type_id: i64 },
}

/// A volume row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeRecord {
    pub id: i64,
    pub handle: String,
    pub worker_name: String,
    pub state: VolumeState,
    pub container_id: Option<i64>,
    pub mount_path: Option<String>,
    pub parent_id: Option<i64>,
    pub worker_resource_cache_id: Option<i64>,
    pub worker_base_resource_type_id: Option<i64>,
    pub initialized: bool,
    pub privileged: bool,
    pub best_if_used_by: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct VolumeRow {
    id: i64,
    handle: String,
    worker_name: String,
    state: String,
    container_id: Option<i64>,
    mount_path: Option<String>,
    parent_id: Option<i64>,
    worker_resource_cache_id: Option<i64>,
    worker_base_resource_type_id: Option<i64>,
    initialized: bool,
    privileged: bool,
    best_if_used_by: Option<i64>,
}

impl TryFrom<VolumeRow> for VolumeRecord {
    type Error = HangarError;

    fn try_from(row: VolumeRow) -> HangarResult<Self> {
        Ok(Self {
            id: row.id,
            handle: row.handle,
            worker_name: row.worker_name,
            state: VolumeState::from_label(&row.state)?,
            container_id: row.container_id,
            mount_path: row.mount_path,
            parent_id: row.parent_id,
            worker_resource_cache_id: row.worker_resource_cache_id,
            worker_base_resource_type_id: row.worker_base_resource_type_id,
            initialized: row.initialized,
            privileged: row.privileged,
            best_if_used_by: row.best_if_used_by.and_then(from_millis),
        })
    }
}

/// Volume columns plus what the owning container contributes
#[derive(FromRow)]
struct CandidateRow {
    #[sqlx(flatten)]
    volume: VolumeRow,
    container_state: Option<String>,
    container_build_id: Option<i64>,
    build_interceptible: Option<bool>,
    container_resource_config_id: Option<i64>,
    container_worker_base_resource_type_id: Option<i64>,
    container_worker_resource_cache_id: Option<i64>,
    container_best_if_used_by: Option<i64>,
    cache_uses: i64,
}

impl CandidateRow {
    fn facts(&self) -> HangarResult<VolumeFacts> {
        let container = match &self.container_state {
            Some(state) => Some(ContainerFacts {
                state: ContainerState::from_label(state)?,
                build_id: self.container_build_id,
                build_interceptible: self.build_interceptible,
                resource_config_id: self.container_resource_config_id,
                worker_base_resource_type_id: self.container_worker_base_resource_type_id,
                worker_resource_cache_id: self.container_worker_resource_cache_id,
                best_if_used_by: self.container_best_if_used_by.and_then(from_millis),
                cache_volume_initialized: false,
                cache_uses: 0,
            }),
            None => None,
        };
        Ok(VolumeFacts {
            state: VolumeState::from_label(&self.volume.state)?,
            container_id: self.volume.container_id,
            container,
            worker_resource_cache_id: self.volume.worker_resource_cache_id,
            worker_base_resource_type_id: self.volume.worker_base_resource_type_id,
            best_if_used_by: self.volume.best_if_used_by.and_then(from_millis),
            cache_uses: self.cache_uses,
        })
    }
}

const VOLUME_COLUMNS: &str = "v.id, v.handle, v.worker_name, v.state, v.container_id, \
     v.mount_path, v.parent_id, v.worker_resource_cache_id, v.worker_base_resource_type_id, \
     v.initialized, v.privileged, v.best_if_used_by";

/// Eligible volumes split by state
#[derive(Debug, Default)]
pub struct VolumesForDeletion {
    pub creating: Vec<CreatingVolume>,
    pub created: Vec<CreatedVolume>,
    pub destroying: Vec<DestroyingVolume>,
}

#[derive(Debug, Clone)]
pub struct VolumeRepository {
    store: Store,
}

impl VolumeRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Insert a new volume in the creating state
    pub async fn create_volume(
        &self,
        worker_name: &str,
        owner: &VolumeOwner,
    ) -> HangarResult<CreatingVolume> {
        let mut tx = self.store.pool().begin().await?;
        let (container_id, mount_path, wrc_id, wbrt_id) = match owner {
            VolumeOwner::ContainerMount {
                container_id,
                mount_path,
            } => (Some(*container_id), Some(mount_path.as_str()), None, None),
            VolumeOwner::ResourceCache { resource_cache_id } => {
                let wrc = worker_resource_cache_id(&mut tx, worker_name, *resource_cache_id).await?;
                (None, None, Some(wrc), None)
            }
            VolumeOwner::BaseResourceType {
                worker_base_resource_type_id,
            } => (None, None, None, Some(*worker_base_resource_type_id)),
        };

        let row = insert_volume(
            &mut tx,
            NewVolume {
                worker_name,
                container_id,
                mount_path,
                parent_id: None,
                wrc_id,
                wbrt_id,
                privileged: false,
            },
        )
        .await?;
        tx.commit().await?;

        Ok(CreatingVolume {
            record: row.try_into()?,
            store: self.store.clone(),
        })
    }

    /// The worker's volume for a resource cache, created if it has none
    pub async fn create_resource_cache_volume(
        &self,
        worker_name: &str,
        resource_cache_id: i64,
    ) -> HangarResult<VolumeRecord> {
        crate::db::retry_find_or_create("resource cache volume", || {
            self.try_create_resource_cache_volume(worker_name, resource_cache_id)
        })
        .await
    }

    async fn try_create_resource_cache_volume(
        &self,
        worker_name: &str,
        resource_cache_id: i64,
    ) -> HangarResult<VolumeRecord> {
        let mut tx = self.store.pool().begin().await?;
        let wrc = worker_resource_cache_id(&mut tx, worker_name, resource_cache_id).await?;
        let existing: Option<VolumeRow> = sqlx::query_as(&format!(
            "SELECT {VOLUME_COLUMNS} FROM volumes v WHERE v.worker_resource_cache_id = ?"
        ))
        .bind(wrc)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match existing {
            Some(row) => row,
            None => {
                insert_volume(
                    &mut tx,
                    NewVolume {
                        worker_name,
                        container_id: None,
                        mount_path: None,
                        parent_id: None,
                        wrc_id: Some(wrc),
                        wbrt_id: None,
                        privileged: false,
                    },
                )
                .await?
            }
        };
        tx.commit().await?;
        row.try_into()
    }

    fn created_volume(&self, row: VolumeRow) -> HangarResult<CreatedVolume> {
        Ok(CreatedVolume {
            record: row.try_into()?,
            store: self.store.clone(),
        })
    }

    /// The worker's created, initialized volume holding the cache
    pub async fn find_initialized_volume_for_resource_cache(
        &self,
        worker_name: &str,
        resource_cache_id: i64,
    ) -> HangarResult<Option<CreatedVolume>> {
        let row: Option<VolumeRow> = sqlx::query_as(&format!(
            "SELECT {VOLUME_COLUMNS} FROM volumes v \
             JOIN worker_resource_caches wrc ON wrc.id = v.worker_resource_cache_id \
             WHERE wrc.worker_name = ?1 AND wrc.resource_cache_id = ?2 \
               AND v.state = 'created' AND v.initialized = 1"
        ))
        .bind(worker_name)
        .bind(resource_cache_id)
        .fetch_optional(self.store.pool())
        .await?;

        row.map(|row| self.created_volume(row)).transpose()
    }

    pub async fn find_by_handle(&self, handle: &str) -> HangarResult<Option<VolumeRecord>> {
        let row: Option<VolumeRow> = sqlx::query_as(&format!(
            "SELECT {VOLUME_COLUMNS} FROM volumes v WHERE v.handle = ?"
        ))
        .bind(handle)
        .fetch_optional(self.store.pool())
        .await?;
        row.map(VolumeRecord::try_from).transpose()
    }

    /// Typed handle on a volume in the creating state
    pub async fn creating(&self, handle: &str) -> HangarResult<Option<CreatingVolume>> {
        Ok(self
            .find_by_handle(handle)
            .await?
            .filter(|record| record.state == VolumeState::Creating)
            .map(|record| CreatingVolume {
                record,
                store: self.store.clone(),
            }))
    }

    /// Typed handle on a volume in the created state
    pub async fn created(&self, handle: &str) -> HangarResult<Option<CreatedVolume>> {
        Ok(self
            .find_by_handle(handle)
            .await?
            .filter(|record| record.state == VolumeState::Created)
            .map(|record| CreatedVolume {
                record,
                store: self.store.clone(),
            }))
    }

    /// Ids of the copy-on-write children of a volume, in any state
    pub async fn child_ids(&self, parent_id: i64) -> HangarResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM volumes WHERE parent_id = ? ORDER BY id")
            .bind(parent_id)
            .fetch_all(self.store.pool())
            .await?;
        Ok(ids)
    }

    /// Created volumes mounted into a container
    pub async fn container_volumes(&self, container_id: i64) -> HangarResult<Vec<CreatedVolume>> {
        let rows: Vec<VolumeRow> = sqlx::query_as(&format!(
            "SELECT {VOLUME_COLUMNS} FROM volumes v \
             WHERE v.container_id = ? AND v.state = 'created' ORDER BY v.id"
        ))
        .bind(container_id)
        .fetch_all(self.store.pool())
        .await?;

        rows.into_iter().map(|row| self.created_volume(row)).collect()
    }

    /// Every volume some rule makes eligible, with the reasons
    pub async fn deletion_candidates(&self) -> HangarResult<Vec<(VolumeRecord, Vec<DeletionReason>)>> {
        let rows: Vec<CandidateRow> = sqlx::query_as(&format!(
            "SELECT {VOLUME_COLUMNS}, \
               c.state AS container_state, c.build_id AS container_build_id, \
               b.interceptible AS build_interceptible, \
               c.resource_config_id AS container_resource_config_id, \
               c.worker_base_resource_type_id AS container_worker_base_resource_type_id, \
               c.worker_resource_cache_id AS container_worker_resource_cache_id, \
               c.best_if_used_by AS container_best_if_used_by, \
               (SELECT COUNT(*) FROM resource_cache_uses u \
                JOIN worker_resource_caches wrc ON wrc.resource_cache_id = u.resource_cache_id \
                WHERE wrc.id = v.worker_resource_cache_id) AS cache_uses \
             FROM volumes v \
             LEFT JOIN containers c ON c.id = v.container_id \
             LEFT JOIN builds b ON b.id = c.build_id \
             ORDER BY v.id"
        ))
        .fetch_all(self.store.pool())
        .await?;

        let now = Utc::now();
        let mut candidates = Vec::new();
        for row in rows {
            let reasons = volume_deletion_reasons(&row.facts()?, now);
            if reasons.is_empty() {
                continue;
            }
            candidates.push((VolumeRecord::try_from(row.volume)?, reasons));
        }
        Ok(candidates)
    }

    /// Eligible volumes by state, in id order. Nothing is transitioned here.
    pub async fn find_volumes_for_deletion(&self) -> HangarResult<VolumesForDeletion> {
        let mut found = VolumesForDeletion::default();
        for (record, reasons) in self.deletion_candidates().await? {
            debug!(handle = %record.handle, state = %record.state, ?reasons, "volume eligible for deletion");
            let store = self.store.clone();
            match record.state {
                VolumeState::Creating => found.creating.push(CreatingVolume { record, store }),
                VolumeState::Created => found.created.push(CreatedVolume { record, store }),
                VolumeState::Destroying => found.destroying.push(DestroyingVolume { record, store }),
            }
        }
        Ok(found)
    }
}

struct NewVolume<'a> {
    worker_name: &'a str,
    container_id: Option<i64>,
    mount_path: Option<&'a str>,
    parent_id: Option<i64>,
    wrc_id: Option<i64>,
    wbrt_id: Option<i64>,
    privileged: bool,
}

async fn insert_volume(
    conn: &mut sqlx::SqliteConnection,
    volume: NewVolume<'_>,
) -> HangarResult<VolumeRow> {
    let handle = Uuid::new_v4().to_string();
    let row: VolumeRow = sqlx::query_as(&format!(
        "INSERT INTO volumes (handle, worker_name, container_id, mount_path, parent_id, \
           worker_resource_cache_id, worker_base_resource_type_id, privileged, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {}",
        VOLUME_COLUMNS.replace("v.", "")
    ))
    .bind(&handle)
    .bind(volume.worker_name)
    .bind(volume.container_id)
    .bind(volume.mount_path)
    .bind(volume.parent_id)
    .bind(volume.wrc_id)
    .bind(volume.wbrt_id)
    .bind(volume.privileged)
    .bind(now_millis())
    .fetch_one(&mut *conn)
    .await?;
    debug!(handle = %handle, worker = volume.worker_name, "created volume row");
    Ok(row)
}

async fn transition(store: &Store, id: i64, from: VolumeState, to: VolumeState) -> HangarResult<bool> {
    let result = sqlx::query("UPDATE volumes SET state = ?1 WHERE id = ?2 AND state = ?3")
        .bind(to.as_label())
        .bind(id)
        .bind(from.as_label())
        .execute(store.pool())
        .await?;

    let moved = result.rows_affected() == 1;
    if !moved {
        debug!(volume = id, %from, %to, "volume moved concurrently");
    }
    Ok(moved)
}

macro_rules! volume_handle {
    ($name:ident) => {
        #[derive(Debug, Clone)]
        pub struct $name {
            record: VolumeRecord,
            store: Store,
        }

        impl $name {
            pub fn record(&self) -> &VolumeRecord {
                &self.record
            }

            pub fn handle(&self) -> &str {
                &self.record.handle
            }

            pub fn id(&self) -> i64 {
                self.record.id
            }
        }
    };
}

volume_handle!(CreatingVolume);
volume_handle!(CreatedVolume);
volume_handle!(DestroyingVolume);

impl CreatingVolume {
    pub async fn created(self) -> HangarResult<Option<CreatedVolume>> {
        let moved =
            transition(&self.store, self.record.id, VolumeState::Creating, VolumeState::Created).await?;
        Ok(moved.then(|| CreatedVolume {
            record: VolumeRecord {
                state: VolumeState::Created,
                ..self.record
            },
            store: self.store,
        }))
    }

    pub async fn destroying(self) -> HangarResult<Option<DestroyingVolume>> {
        let moved = transition(
            &self.store,
            self.record.id,
            VolumeState::Creating,
            VolumeState::Destroying,
        )
        .await?;
        Ok(moved.then(|| DestroyingVolume {
            record: VolumeRecord {
                state: VolumeState::Destroying,
                ..self.record
            },
            store: self.store,
        }))
    }
}

impl CreatedVolume {
    pub async fn destroying(self) -> HangarResult<Option<DestroyingVolume>> {
        let moved = transition(
            &self.store,
            self.record.id,
            VolumeState::Created,
            VolumeState::Destroying,
        )
        .await?;
        Ok(moved.then(|| DestroyingVolume {
            record: VolumeRecord {
                state: VolumeState::Destroying,
                ..self.record
            },
            store: self.store,
        }))
    }

    /// Mark the contents as populated
    pub async fn initialize(&mut self) -> HangarResult<bool> {
        let result =
            sqlx::query("UPDATE volumes SET initialized = 1 WHERE id = ? AND state = 'created'")
                .bind(self.record.id)
                .execute(self.store.pool())
                .await?;
        let updated = result.rows_affected() == 1;
        if updated {
            self.record.initialized = true;
        }
        Ok(updated)
    }

    pub async fn set_privileged(&mut self, privileged: bool) -> HangarResult<bool> {
        let result =
            sqlx::query("UPDATE volumes SET privileged = ?1 WHERE id = ?2 AND state = 'created'")
                .bind(privileged)
                .bind(self.record.id)
                .execute(self.store.pool())
                .await?;
        let updated = result.rows_affected() == 1;
        if updated {
            self.record.privileged = privileged;
        }
        Ok(updated)
    }

    /// Claim this volume as the worker's copy of a resource cache.
    ///
    /// Returns `false` when another volume on the worker already holds the
    /// cache; that volume wins and this one stays with its container.
    pub async fn initialize_resource_cache(&mut self, resource_cache_id: i64) -> HangarResult<bool> {
        let mut tx = self.store.pool().begin().await?;
        let wrc = worker_resource_cache_id(&mut tx, &self.record.worker_name, resource_cache_id).await?;

        let updated = sqlx::query(
            "UPDATE volumes SET worker_resource_cache_id = ?1, initialized = 1 \
             WHERE id = ?2 AND state = 'created'",
        )
        .bind(wrc)
        .bind(self.record.id)
        .execute(&mut *tx)
        .await;

        match updated {
            Ok(result) => {
                tx.commit().await?;
                let claimed = result.rows_affected() == 1;
                if claimed {
                    self.record.worker_resource_cache_id = Some(wrc);
                    self.record.initialized = true;
                    info!(handle = %self.record.handle, resource_cache_id, "volume holds resource cache");
                }
                Ok(claimed)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                let reason = db_err.message();
                debug!(handle = %self.record.handle, %reason, "resource cache already held by another volume");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// A copy-on-write child mounted into another container
    pub async fn create_child_for_container(
        &self,
        container_id: i64,
        mount_path: &str,
    ) -> HangarResult<CreatingVolume> {
        let mut conn = self.store.pool().acquire().await?;
        let row = insert_volume(
            &mut conn,
            NewVolume {
                worker_name: &self.record.worker_name,
                container_id: Some(container_id),
                mount_path: Some(mount_path),
                parent_id: Some(self.record.id),
                wrc_id: None,
                wbrt_id: None,
                privileged: self.record.privileged,
            },
        )
        .await?;

        Ok(CreatingVolume {
            record: row.try_into()?,
            store: self.store.clone(),
        })
    }
}

impl DestroyingVolume {
    /// Delete the row.
    ///
    /// `false` when it was already gone or still has children; the
    /// children go first and the next pass retries.
    pub async fn destroy(self) -> HangarResult<bool> {
        let result = sqlx::query("DELETE FROM volumes WHERE id = ? AND state = 'destroying'")
            .bind(self.record.id)
            .execute(self.store.pool())
            .await
            .map_err(HangarError::from);

        match result {
            Ok(result) => {
                let deleted = result.rows_affected() == 1;
                if deleted {
                    info!(handle = %self.record.handle, "destroyed volume");
                }
                Ok(deleted)
            }
            Err(HangarError::IntegrityConflict(reason)) => {
                debug!(handle = %self.record.handle, %reason, "volume still has children");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}
