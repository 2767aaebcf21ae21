//! The individual deletion sweeps

use super::{GcEvent, GcObserver, UseKind};
use crate::cache::ResourceUser;
use crate::db::{duration_millis, now_millis, Store};
use crate::error::{HangarError, HangarResult};
use crate::resource::types::empty_params_hash;
use sqlx::FromRow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Builds that are done and no longer kept around for inspection
const RELEASED_BUILDS: &str =
    "SELECT id FROM builds WHERE completed = 1 AND interceptible = 0";

/// Caches holding the image a build ran with, when that build is either the
/// latest image-using build of its job or a recent one-off.
/// Binds: ?1 empty params hash, ?2 one-off cutoff millis.
const REPRODUCIBLE_IMAGE_CACHES: &str = "\
    SELECT rc.id FROM image_resource_versions irv \
    JOIN resource_caches rc ON rc.version = irv.version \
    JOIN resource_cache_uses keep ON keep.resource_cache_id = rc.id AND keep.build_id = irv.build_id \
    WHERE rc.params_hash = ?1 AND ( \
        irv.build_id IN ( \
            SELECT MAX(b.id) FROM image_resource_versions i \
            JOIN builds b ON b.id = i.build_id \
            WHERE b.job_id IS NOT NULL GROUP BY b.job_id) \
        OR irv.build_id IN ( \
            SELECT b.id FROM image_resource_versions i \
            JOIN builds b ON b.id = i.build_id \
            WHERE b.job_id IS NULL AND b.end_time > ?2))";

#[derive(FromRow)]
struct DeletedUse {
    target_id: i64,
    build_id: Option<i64>,
    resource_id: Option<i64>,
    resource_type_id: Option<i64>,
}

#[derive(FromRow)]
struct DeletedCache {
    id: i64,
    resource_config_id: i64,
    version: String,
}

fn delete_uses_sql(kind: UseKind, predicate: &str) -> String {
    let (table, column) = match kind {
        UseKind::Cache => ("resource_cache_uses", "resource_cache_id"),
        UseKind::Config => ("resource_config_uses", "resource_config_id"),
    };
    format!(
        "DELETE FROM {table} WHERE {predicate} \
         RETURNING {column} AS target_id, build_id, resource_id, resource_type_id"
    )
}

/// Deletes uses whose owners are done with them, then whatever became
/// unreferenced
pub struct CacheSweeper {
    store: Store,
    observer: Arc<dyn GcObserver>,
    one_off_grace: Duration,
}

impl CacheSweeper {
    pub fn new(store: Store, observer: Arc<dyn GcObserver>, one_off_grace: Duration) -> Self {
        Self {
            store,
            observer,
            one_off_grace,
        }
    }

    fn report_uses(&self, kind: UseKind, rows: Vec<DeletedUse>) -> HangarResult<usize> {
        let deleted = rows.len();
        for row in rows {
            let owner = ResourceUser::from_columns(row.build_id, row.resource_id, row.resource_type_id)?;
            self.observer.on_event(GcEvent::UseDeleted {
                kind,
                target_id: row.target_id,
                owner,
            });
        }
        Ok(deleted)
    }

    /// Run one use-deleting predicate against both use tables
    async fn delete_uses(&self, owner_predicate: &str) -> HangarResult<usize> {
        let mut tx = self.store.pool().begin().await?;
        let caches: Vec<DeletedUse> =
            sqlx::query_as(&delete_uses_sql(UseKind::Cache, owner_predicate))
                .fetch_all(&mut *tx)
                .await?;
        let configs: Vec<DeletedUse> =
            sqlx::query_as(&delete_uses_sql(UseKind::Config, owner_predicate))
                .fetch_all(&mut *tx)
                .await?;
        tx.commit().await?;

        Ok(self.report_uses(UseKind::Cache, caches)? + self.report_uses(UseKind::Config, configs)?)
    }

    /// Drop uses held by finished, non-interceptible builds, except the
    /// image caches needed to reproduce recent builds
    pub async fn clean_uses_for_finished_builds(&self) -> HangarResult<usize> {
        let cutoff = now_millis().saturating_sub(duration_millis(self.one_off_grace));
        let mut tx = self.store.pool().begin().await?;

        let caches: Vec<DeletedUse> = sqlx::query_as(&delete_uses_sql(
            UseKind::Cache,
            &format!(
                "build_id IN ({RELEASED_BUILDS}) \
                 AND resource_cache_id NOT IN ({REPRODUCIBLE_IMAGE_CACHES})"
            ),
        ))
        .bind(empty_params_hash())
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let configs: Vec<DeletedUse> = sqlx::query_as(&delete_uses_sql(
            UseKind::Config,
            &format!("build_id IN ({RELEASED_BUILDS})"),
        ))
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(self.report_uses(UseKind::Cache, caches)? + self.report_uses(UseKind::Config, configs)?)
    }

    pub async fn clean_uses_for_inactive_resource_types(&self) -> HangarResult<usize> {
        self.delete_uses("resource_type_id IN (SELECT id FROM resource_types WHERE active = 0)")
            .await
    }

    pub async fn clean_uses_for_inactive_resources(&self) -> HangarResult<usize> {
        self.delete_uses("resource_id IN (SELECT id FROM resources WHERE active = 0)")
            .await
    }

    pub async fn clean_uses_for_paused_pipeline_resources(&self) -> HangarResult<usize> {
        self.delete_uses(
            "resource_id IN (SELECT r.id FROM resources r \
             JOIN pipelines p ON p.id = r.pipeline_id WHERE p.paused = 1)",
        )
        .await
    }

    /// Delete caches nothing refers to any more.
    ///
    /// A cache survives while it has uses, while a volume is still being
    /// created for it, while it is the image of some config, or while an
    /// unpaused pipeline has picked its version as a next build input.
    pub async fn clean_up_invalid_caches(&self) -> HangarResult<usize> {
        let result: Result<Vec<DeletedCache>, sqlx::Error> = sqlx::query_as(
            "DELETE FROM resource_caches \
             WHERE id NOT IN (SELECT resource_cache_id FROM resource_cache_uses) \
               AND id NOT IN ( \
                 SELECT wrc.resource_cache_id FROM volumes v \
                 JOIN worker_resource_caches wrc ON wrc.id = v.worker_resource_cache_id \
                 WHERE v.state = 'creating') \
               AND id NOT IN ( \
                 SELECT resource_cache_id FROM resource_configs WHERE resource_cache_id IS NOT NULL) \
               AND id NOT IN ( \
                 SELECT rc.id FROM next_build_inputs nbi \
                 JOIN versioned_resources vr ON vr.id = nbi.version_id \
                 JOIN resources r ON r.id = vr.resource_id \
                 JOIN resource_caches rc ON rc.version = vr.version \
                 JOIN resource_configs rf ON rf.id = rc.resource_config_id \
                 JOIN jobs j ON j.id = nbi.job_id \
                 JOIN pipelines p ON p.id = j.pipeline_id \
                 WHERE r.source_hash = rf.source_hash AND p.paused = 0) \
             RETURNING id, resource_config_id, version",
        )
        .fetch_all(self.store.pool())
        .await;

        let rows = match result.map_err(HangarError::from) {
            Ok(rows) => rows,
            Err(HangarError::IntegrityConflict(reason)) => {
                // A use appeared after the subqueries ran; next sweep decides
                debug!(%reason, "cache sweep raced a new use");
                return Ok(0);
            }
            Err(err) => return Err(err),
        };

        let deleted = rows.len();
        for row in rows {
            self.observer.on_event(GcEvent::CacheDeleted {
                id: row.id,
                resource_config_id: row.resource_config_id,
                version: serde_json::from_str(&row.version)?,
            });
        }
        if deleted > 0 {
            info!(deleted, "deleted resource caches");
        }
        Ok(deleted)
    }

    /// Delete configs with no caches, no uses and no check containers
    pub async fn clean_up_unused_configs(&self) -> HangarResult<usize> {
        let result: Result<Vec<i64>, sqlx::Error> = sqlx::query_scalar(
            "DELETE FROM resource_configs \
             WHERE id NOT IN (SELECT resource_config_id FROM resource_caches) \
               AND id NOT IN (SELECT resource_config_id FROM resource_config_uses) \
               AND id NOT IN ( \
                 SELECT resource_config_id FROM containers WHERE resource_config_id IS NOT NULL) \
             RETURNING id",
        )
        .fetch_all(self.store.pool())
        .await;

        let ids = match result.map_err(HangarError::from) {
            Ok(ids) => ids,
            Err(HangarError::IntegrityConflict(reason)) => {
                debug!(%reason, "config sweep raced a new reference");
                return Ok(0);
            }
            Err(err) => return Err(err),
        };

        let deleted = ids.len();
        for id in ids {
            self.observer.on_event(GcEvent::ConfigDeleted { id });
        }
        if deleted > 0 {
            info!(deleted, "deleted resource configs");
        }
        Ok(deleted)
    }
}
