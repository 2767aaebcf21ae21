//! Container rows and their state machine

use super::eligibility::{container_deletion_reasons, ContainerFacts, DeletionReason};
use super::state::ContainerState;
use super::worker_resource_cache_id;
use crate::db::{from_millis, now_millis, to_millis, Store};
use crate::error::{HangarError, HangarResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

/// What a container exists for
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerOwner {
    /// A step of a build
    BuildStep { build_id: i64, plan_id: String },
    /// Checking a resource config, on a given worker base type
    CheckSession {
        resource_config_id: i64,
        worker_base_resource_type_id: i64,
        expires_at: DateTime<Utc>,
    },
    /// Fetching a resource cache onto this worker
    CacheFetch { resource_cache_id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Check,
    Get,
    Put,
    Task,
}

/// Descriptive metadata stored alongside the container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerMetadata {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub container_type: Option<ContainerType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

/// A container row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerRecord {
    pub id: i64,
    pub handle: String,
    pub worker_name: String,
    pub state: ContainerState,
    pub hijacked: bool,
    pub discontinued: bool,
    pub build_id: Option<i64>,
    pub plan_id: Option<String>,
    pub resource_config_id: Option<i64>,
    pub worker_base_resource_type_id: Option<i64>,
    pub worker_resource_cache_id: Option<i64>,
    pub best_if_used_by: Option<DateTime<Utc>>,
    pub metadata: ContainerMetadata,
}

#[derive(FromRow)]
struct ContainerRow {
    id: i64,
    handle: String,
    worker_name: String,
    state: String,
    hijacked: bool,
    discontinued: bool,
    build_id: Option<i64>,
    plan_id: Option<String>,
    resource_config_id: Option<i64>,
    worker_base_resource_type_id: Option<i64>,
    worker_resource_cache_id: Option<i64>,
    best_if_used_by: Option<i64>,
    metadata: String,
}

impl TryFrom<ContainerRow> for ContainerRecord {
    type Error = HangarError;

    fn try_from(row: ContainerRow) -> HangarResult<Self> {
        Ok(Self {
            id: row.id,
            handle: row.handle,
            worker_name: row.worker_name,
            state: ContainerState::from_label(&row.state)?,
            hijacked: row.hijacked,
            discontinued: row.discontinued,
            build_id: row.build_id,
            plan_id: row.plan_id,
            resource_config_id: row.resource_config_id,
            worker_base_resource_type_id: row.worker_base_resource_type_id,
            worker_resource_cache_id: row.worker_resource_cache_id,
            best_if_used_by: row.best_if_used_by.and_then(from_millis),
            metadata: serde_json::from_str(&row.metadata)?,
        })
    }
}

#[derive(FromRow)]
struct CandidateRow {
    #[sqlx(flatten)]
    container: ContainerRow,
    build_interceptible: Option<bool>,
    cache_volume_initialized: bool,
    cache_uses: i64,
}

const CONTAINER_COLUMNS: &str = "c.id, c.handle, c.worker_name, c.state, c.hijacked, \
     c.discontinued, c.build_id, c.plan_id, c.resource_config_id, \
     c.worker_base_resource_type_id, c.worker_resource_cache_id, c.best_if_used_by, c.metadata";

/// Eligible containers split by state
#[derive(Debug, Default)]
pub struct ContainersForDeletion {
    pub creating: Vec<CreatingContainer>,
    pub created: Vec<CreatedContainer>,
    pub destroying: Vec<DestroyingContainer>,
}

#[derive(Debug, Clone)]
pub struct ContainerRepository {
    store: Store,
}

impl ContainerRepository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Reuse the worker's live container for `owner`, or start a new one in
    /// the creating state
    pub async fn find_or_create(
        &self,
        worker_name: &str,
        owner: &ContainerOwner,
        metadata: &ContainerMetadata,
    ) -> HangarResult<ContainerRecord> {
        let (record, _) = self.find_or_insert(worker_name, owner, metadata).await?;
        Ok(record)
    }

    /// Like [`find_or_create`](Self::find_or_create), also telling whether
    /// this call inserted the row. Only the inserting caller may build a
    /// creating container.
    pub async fn find_or_insert(
        &self,
        worker_name: &str,
        owner: &ContainerOwner,
        metadata: &ContainerMetadata,
    ) -> HangarResult<(ContainerRecord, bool)> {
        let mut tx = self.store.pool().begin().await?;
        let now = now_millis();

        let (build_id, plan_id, config_id, wbrt_id, wrc_id, best_if_used_by) = match owner {
            ContainerOwner::BuildStep { build_id, plan_id } => {
                (Some(*build_id), Some(plan_id.as_str()), None, None, None, None)
            }
            ContainerOwner::CheckSession {
                resource_config_id,
                worker_base_resource_type_id,
                expires_at,
            } => (
                None,
                None,
                Some(*resource_config_id),
                Some(*worker_base_resource_type_id),
                None,
                Some(to_millis(*expires_at)),
            ),
            ContainerOwner::CacheFetch { resource_cache_id } => {
                let wrc = worker_resource_cache_id(&mut tx, worker_name, *resource_cache_id).await?;
                (None, None, None, None, Some(wrc), None)
            }
        };

        let existing: Option<ContainerRow> = sqlx::query_as(&format!(
            "SELECT {CONTAINER_COLUMNS} FROM containers c \
             WHERE c.worker_name = ?1 AND c.state != 'destroying' \
               AND c.build_id IS ?2 AND c.plan_id IS ?3 \
               AND c.resource_config_id IS ?4 AND c.worker_base_resource_type_id IS ?5 \
               AND c.worker_resource_cache_id IS ?6 \
               AND (c.best_if_used_by IS NULL OR c.best_if_used_by > ?7) \
             ORDER BY c.id LIMIT 1"
        ))
        .bind(worker_name)
        .bind(build_id)
        .bind(plan_id)
        .bind(config_id)
        .bind(wbrt_id)
        .bind(wrc_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let (row, inserted) = match existing {
            Some(row) => (row, false),
            None => {
                let handle = Uuid::new_v4().to_string();
                let row: ContainerRow = sqlx::query_as(&format!(
                    "INSERT INTO containers (handle, worker_name, build_id, plan_id, resource_config_id, \
                       worker_base_resource_type_id, worker_resource_cache_id, best_if_used_by, metadata, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                     RETURNING {}",
                    CONTAINER_COLUMNS.replace("c.", "")
                ))
                .bind(&handle)
                .bind(worker_name)
                .bind(build_id)
                .bind(plan_id)
                .bind(config_id)
                .bind(wbrt_id)
                .bind(wrc_id)
                .bind(best_if_used_by)
                .bind(serde_json::to_string(metadata)?)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?;
                debug!(handle = %handle, worker = worker_name, "created container row");
                (row, true)
            }
        };

        tx.commit().await?;
        Ok((row.try_into()?, inserted))
    }

    pub async fn find_by_handle(&self, handle: &str) -> HangarResult<Option<ContainerRecord>> {
        let row: Option<ContainerRow> = sqlx::query_as(&format!(
            "SELECT {CONTAINER_COLUMNS} FROM containers c WHERE c.handle = ?"
        ))
        .bind(handle)
        .fetch_optional(self.store.pool())
        .await?;
        row.map(ContainerRecord::try_from).transpose()
    }

    /// Every container some rule makes eligible, with the reasons
    pub async fn deletion_candidates(
        &self,
    ) -> HangarResult<Vec<(ContainerRecord, Vec<DeletionReason>)>> {
        let rows: Vec<CandidateRow> = sqlx::query_as(&format!(
            "SELECT {CONTAINER_COLUMNS}, b.interceptible AS build_interceptible, \
               COALESCE((SELECT MAX(v.initialized) FROM volumes v \
                         WHERE v.worker_resource_cache_id = c.worker_resource_cache_id), 0) \
                 AS cache_volume_initialized, \
               (SELECT COUNT(*) FROM resource_cache_uses u \
                JOIN worker_resource_caches wrc ON wrc.resource_cache_id = u.resource_cache_id \
                WHERE wrc.id = c.worker_resource_cache_id) AS cache_uses \
             FROM containers c LEFT JOIN builds b ON b.id = c.build_id \
             ORDER BY c.id"
        ))
        .fetch_all(self.store.pool())
        .await?;

        let now = Utc::now();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for row in rows {
            let facts = ContainerFacts {
                state: ContainerState::from_label(&row.container.state)?,
                build_id: row.container.build_id,
                build_interceptible: row.build_interceptible,
                resource_config_id: row.container.resource_config_id,
                worker_base_resource_type_id: row.container.worker_base_resource_type_id,
                worker_resource_cache_id: row.container.worker_resource_cache_id,
                best_if_used_by: row.container.best_if_used_by.and_then(from_millis),
                cache_volume_initialized: row.cache_volume_initialized,
                cache_uses: row.cache_uses,
            };
            let reasons = container_deletion_reasons(&facts, now);
            if reasons.is_empty() || !seen.insert(row.container.id) {
                continue;
            }
            candidates.push((ContainerRecord::try_from(row.container)?, reasons));
        }
        Ok(candidates)
    }

    /// Eligible containers by state. Nothing is transitioned here.
    pub async fn find_containers_for_deletion(&self) -> HangarResult<ContainersForDeletion> {
        let mut found = ContainersForDeletion::default();
        for (record, reasons) in self.deletion_candidates().await? {
            debug!(handle = %record.handle, state = %record.state, ?reasons, "container eligible for deletion");
            let store = self.store.clone();
            match record.state {
                ContainerState::Creating => found.creating.push(CreatingContainer { record, store }),
                ContainerState::Created => found.created.push(CreatedContainer { record, store }),
                ContainerState::Destroying => {
                    found.destroying.push(DestroyingContainer { record, store })
                }
            }
        }
        Ok(found)
    }

    /// Typed handle on a container in the created state
    pub async fn created(&self, handle: &str) -> HangarResult<Option<CreatedContainer>> {
        Ok(self
            .find_by_handle(handle)
            .await?
            .filter(|record| record.state == ContainerState::Created)
            .map(|record| CreatedContainer {
                record,
                store: self.store.clone(),
            }))
    }

    /// Typed handle on a container in the creating state
    pub async fn creating(&self, handle: &str) -> HangarResult<Option<CreatingContainer>> {
        Ok(self
            .find_by_handle(handle)
            .await?
            .filter(|record| record.state == ContainerState::Creating)
            .map(|record| CreatingContainer {
                record,
                store: self.store.clone(),
            }))
    }
}

/// Move `id` from one state to another; `false` if it was not in `from`
async fn transition(
    store: &Store,
    id: i64,
    from: ContainerState,
    to: ContainerState,
    discontinue: bool,
) -> HangarResult<bool> {
    let result = sqlx::query(
        "UPDATE containers SET state = ?1, discontinued = discontinued OR ?2 \
         WHERE id = ?3 AND state = ?4",
    )
    .bind(to.as_label())
    .bind(discontinue)
    .bind(id)
    .bind(from.as_label())
    .execute(store.pool())
    .await?;

    let moved = result.rows_affected() == 1;
    if moved {
        debug!(container = id, %from, %to, "container transitioned");
    } else {
        debug!(container = id, %from, %to, "container moved concurrently");
    }
    Ok(moved)
}

macro_rules! container_handle {
    ($name:ident) => {
        #[derive(Debug, Clone)]
        pub struct $name {
            record: ContainerRecord,
            store: Store,
        }

        impl $name {
            pub fn record(&self) -> &ContainerRecord {
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

container_handle!(CreatingContainer);
container_handle!(CreatedContainer);
container_handle!(DestroyingContainer);

impl CreatingContainer {
    pub async fn created(self) -> HangarResult<Option<CreatedContainer>> {
        let moved = transition(
            &self.store,
            self.record.id,
            ContainerState::Creating,
            ContainerState::Created,
            false,
        )
        .await?;
        Ok(moved.then(|| CreatedContainer {
            record: ContainerRecord {
                state: ContainerState::Created,
                ..self.record
            },
            store: self.store,
        }))
    }

    pub async fn destroying(self) -> HangarResult<Option<DestroyingContainer>> {
        let moved = transition(
            &self.store,
            self.record.id,
            ContainerState::Creating,
            ContainerState::Destroying,
            false,
        )
        .await?;
        Ok(moved.then(|| DestroyingContainer {
            record: ContainerRecord {
                state: ContainerState::Destroying,
                ..self.record
            },
            store: self.store,
        }))
    }
}

impl CreatedContainer {
    pub async fn destroying(self) -> HangarResult<Option<DestroyingContainer>> {
        self.to_destroying(false).await
    }

    /// Destroy on the next reap even if it still looks useful
    pub async fn discontinue(self) -> HangarResult<Option<DestroyingContainer>> {
        self.to_destroying(true).await
    }

    async fn to_destroying(self, discontinue: bool) -> HangarResult<Option<DestroyingContainer>> {
        let moved = transition(
            &self.store,
            self.record.id,
            ContainerState::Created,
            ContainerState::Destroying,
            discontinue,
        )
        .await?;
        Ok(moved.then(|| DestroyingContainer {
            record: ContainerRecord {
                state: ContainerState::Destroying,
                discontinued: self.record.discontinued || discontinue,
                ..self.record
            },
            store: self.store,
        }))
    }

    /// Someone attached to the container interactively
    pub async fn mark_hijacked(&mut self) -> HangarResult<bool> {
        let result =
            sqlx::query("UPDATE containers SET hijacked = 1 WHERE id = ? AND state = 'created'")
                .bind(self.record.id)
                .execute(self.store.pool())
                .await?;
        let marked = result.rows_affected() == 1;
        if marked {
            self.record.hijacked = true;
        }
        Ok(marked)
    }
}

impl DestroyingContainer {
    pub fn is_discontinued(&self) -> bool {
        self.record.discontinued
    }

    /// Delete the row. `false` if it was already gone.
    pub async fn destroy(self) -> HangarResult<bool> {
        let result = sqlx::query("DELETE FROM containers WHERE id = ? AND state = 'destroying'")
            .bind(self.record.id)
            .execute(self.store.pool())
            .await?;
        let deleted = result.rows_affected() == 1;
        if deleted {
            info!(handle = %self.record.handle, "destroyed container");
        }
        Ok(deleted)
    }
}
