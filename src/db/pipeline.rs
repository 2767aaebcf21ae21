//! Pipelines, resources, resource types and their versions

use super::{now_millis, Store};
use crate::error::{HangarError, HangarResult};
use crate::resource::types::{
    canonical_json, hash_json, PipelineDefinition, Source, Version, VersionedResourceType,
    VersionedResourceTypes,
};
use serde::Serialize;
use sqlx::FromRow;
use tracing::{debug, info};

/// A saved pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct PipelineRecord {
    pub id: i64,
    pub name: String,
    pub paused: bool,
}

/// A resource as last saved with its pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct SavedResource {
    pub id: i64,
    pub pipeline_id: i64,
    pub pipeline_name: String,
    pub name: String,
    pub type_: String,
    pub source: Source,
    pub source_hash: String,
    pub tags: Vec<String>,
    pub check_every: Option<String>,
    pub paused: bool,
    pub active: bool,
    pub check_error: Option<String>,
}

/// A pipeline-defined resource type as saved
#[derive(Debug, Clone, PartialEq)]
pub struct SavedResourceType {
    pub id: i64,
    pub pipeline_id: i64,
    pub name: String,
    pub type_: String,
    pub source: Source,
    pub privileged: bool,
    pub tags: Vec<String>,
    pub check_every: Option<String>,
    pub version: Option<Version>,
    pub active: bool,
    pub check_error: Option<String>,
}

impl SavedResourceType {
    pub fn to_versioned(&self) -> VersionedResourceType {
        VersionedResourceType {
            name: self.name.clone(),
            type_: self.type_.clone(),
            source: self.source.clone(),
            privileged: self.privileged,
            tags: self.tags.clone(),
            version: self.version.clone(),
        }
    }
}

#[derive(FromRow)]
struct ResourceRow {
    id: i64,
    pipeline_id: i64,
    pipeline_name: String,
    name: String,
    resource_type: String,
    source: String,
    source_hash: String,
    tags: String,
    check_every: Option<String>,
    paused: bool,
    active: bool,
    check_error: Option<String>,
}

impl TryFrom<ResourceRow> for SavedResource {
    type Error = HangarError;

    fn try_from(row: ResourceRow) -> HangarResult<Self> {
        Ok(Self {
            id: row.id,
            pipeline_id: row.pipeline_id,
            pipeline_name: row.pipeline_name,
            name: row.name,
            type_: row.resource_type,
            source: serde_json::from_str(&row.source)?,
            source_hash: row.source_hash,
            tags: serde_json::from_str(&row.tags)?,
            check_every: row.check_every,
            paused: row.paused,
            active: row.active,
            check_error: row.check_error,
        })
    }
}

#[derive(FromRow)]
struct ResourceTypeRow {
    id: i64,
    pipeline_id: i64,
    name: String,
    resource_type: String,
    source: String,
    privileged: bool,
    tags: String,
    check_every: Option<String>,
    version: Option<String>,
    active: bool,
    check_error: Option<String>,
}

impl TryFrom<ResourceTypeRow> for SavedResourceType {
    type Error = HangarError;

    fn try_from(row: ResourceTypeRow) -> HangarResult<Self> {
        let version = match row.version {
            Some(v) => Some(serde_json::from_str(&v)?),
            None => None,
        };
        Ok(Self {
            id: row.id,
            pipeline_id: row.pipeline_id,
            name: row.name,
            type_: row.resource_type,
            source: serde_json::from_str(&row.source)?,
            privileged: row.privileged,
            tags: serde_json::from_str(&row.tags)?,
            check_every: row.check_every,
            version,
            active: row.active,
            check_error: row.check_error,
        })
    }
}

const RESOURCE_COLUMNS: &str = "r.id, r.pipeline_id, p.name AS pipeline_name, r.name, \
     r.type AS resource_type, r.source, r.source_hash, r.tags, r.check_every, r.paused, \
     r.active, r.check_error";

const RESOURCE_TYPE_COLUMNS: &str = "id, pipeline_id, name, type AS resource_type, source, \
     privileged, tags, check_every, version, active, check_error";

impl Store {
    /// Save a pipeline definition. Resources, types and jobs missing from
    /// the new definition stay in the store but become inactive.
    pub async fn save_pipeline(
        &self,
        name: &str,
        definition: &PipelineDefinition,
    ) -> HangarResult<PipelineRecord> {
        let mut tx = self.pool().begin().await?;

        let pipeline: PipelineRecord = sqlx::query_as(
            "INSERT INTO pipelines (name) VALUES (?) \
             ON CONFLICT (name) DO UPDATE SET name = excluded.name \
             RETURNING id, name, paused",
        )
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;

        for table in ["resources", "resource_types", "jobs"] {
            sqlx::query(&format!(
                "UPDATE {table} SET active = 0 WHERE pipeline_id = ?"
            ))
            .bind(pipeline.id)
            .execute(&mut *tx)
            .await?;
        }

        for resource in &definition.resources {
            sqlx::query(
                "INSERT INTO resources (pipeline_id, name, type, source, source_hash, tags, check_every, active) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, 1) \
                 ON CONFLICT (pipeline_id, name) DO UPDATE SET \
                   type = excluded.type, source = excluded.source, source_hash = excluded.source_hash, \
                   tags = excluded.tags, check_every = excluded.check_every, active = 1",
            )
            .bind(pipeline.id)
            .bind(&resource.name)
            .bind(&resource.type_)
            .bind(canonical_json(&resource.source)?)
            .bind(hash_json(&resource.source)?)
            .bind(serde_json::to_string(&resource.tags)?)
            .bind(&resource.check_every)
            .execute(&mut *tx)
            .await?;
        }

        for resource_type in &definition.resource_types {
            sqlx::query(
                "INSERT INTO resource_types (pipeline_id, name, type, source, privileged, tags, check_every, active) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, 1) \
                 ON CONFLICT (pipeline_id, name) DO UPDATE SET \
                   type = excluded.type, source = excluded.source, privileged = excluded.privileged, \
                   tags = excluded.tags, check_every = excluded.check_every, active = 1",
            )
            .bind(pipeline.id)
            .bind(&resource_type.name)
            .bind(&resource_type.type_)
            .bind(canonical_json(&resource_type.source)?)
            .bind(resource_type.privileged)
            .bind(serde_json::to_string(&resource_type.tags)?)
            .bind(&resource_type.check_every)
            .execute(&mut *tx)
            .await?;
        }

        for job in &definition.jobs {
            sqlx::query(
                "INSERT INTO jobs (pipeline_id, name, active) VALUES (?, ?, 1) \
                 ON CONFLICT (pipeline_id, name) DO UPDATE SET active = 1",
            )
            .bind(pipeline.id)
            .bind(&job.name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            pipeline = %pipeline.name,
            resources = definition.resources.len(),
            resource_types = definition.resource_types.len(),
            "saved pipeline"
        );
        Ok(pipeline)
    }

    pub async fn find_pipeline(&self, name: &str) -> HangarResult<Option<PipelineRecord>> {
        Ok(
            sqlx::query_as("SELECT id, name, paused FROM pipelines WHERE name = ?")
                .bind(name)
                .fetch_optional(self.pool())
                .await?,
        )
    }

    pub async fn list_pipelines(&self) -> HangarResult<Vec<PipelineRecord>> {
        Ok(
            sqlx::query_as("SELECT id, name, paused FROM pipelines ORDER BY name")
                .fetch_all(self.pool())
                .await?,
        )
    }

    pub async fn is_pipeline_paused(&self, pipeline_id: i64) -> HangarResult<bool> {
        let paused: Option<bool> = sqlx::query_scalar("SELECT paused FROM pipelines WHERE id = ?")
            .bind(pipeline_id)
            .fetch_optional(self.pool())
            .await?;
        paused.ok_or_else(|| HangarError::PipelineNotFound(pipeline_id.to_string()))
    }

    pub async fn set_pipeline_paused(&self, name: &str, paused: bool) -> HangarResult<()> {
        let result = sqlx::query("UPDATE pipelines SET paused = ? WHERE name = ?")
            .bind(paused)
            .bind(name)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(HangarError::PipelineNotFound(name.to_string()));
        }
        debug!(pipeline = name, paused, "pipeline pause state changed");
        Ok(())
    }

    pub async fn resource(
        &self,
        pipeline_id: i64,
        name: &str,
    ) -> HangarResult<Option<SavedResource>> {
        let row: Option<ResourceRow> = sqlx::query_as(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources r JOIN pipelines p ON p.id = r.pipeline_id \
             WHERE r.pipeline_id = ? AND r.name = ?"
        ))
        .bind(pipeline_id)
        .bind(name)
        .fetch_optional(self.pool())
        .await?;
        row.map(SavedResource::try_from).transpose()
    }

    pub async fn resources(&self, pipeline_id: i64) -> HangarResult<Vec<SavedResource>> {
        let rows: Vec<ResourceRow> = sqlx::query_as(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources r JOIN pipelines p ON p.id = r.pipeline_id \
             WHERE r.pipeline_id = ? AND r.active = 1 ORDER BY r.name"
        ))
        .bind(pipeline_id)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(SavedResource::try_from).collect()
    }

    pub async fn set_resource_paused(&self, resource_id: i64, paused: bool) -> HangarResult<()> {
        sqlx::query("UPDATE resources SET paused = ? WHERE id = ?")
            .bind(paused)
            .bind(resource_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_resource_check_error(
        &self,
        resource_id: i64,
        check_error: Option<&str>,
    ) -> HangarResult<()> {
        sqlx::query("UPDATE resources SET check_error = ? WHERE id = ?")
            .bind(check_error)
            .bind(resource_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Record versions in the order given; later entries are newer.
    /// A version seen before moves to the front again.
    pub async fn save_resource_versions(
        &self,
        resource_id: i64,
        versions: &[Version],
    ) -> HangarResult<()> {
        let mut tx = self.pool().begin().await?;

        let mut next_order: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(check_order), 0) FROM versioned_resources WHERE resource_id = ?",
        )
        .bind(resource_id)
        .fetch_one(&mut *tx)
        .await?;

        for version in versions {
            next_order += 1;
            sqlx::query(
                "INSERT INTO versioned_resources (resource_id, version, check_order) VALUES (?, ?, ?) \
                 ON CONFLICT (resource_id, version) DO UPDATE SET check_order = excluded.check_order",
            )
            .bind(resource_id)
            .bind(canonical_json(version)?)
            .bind(next_order)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn latest_resource_version(&self, resource_id: i64) -> HangarResult<Option<Version>> {
        let version: Option<String> = sqlx::query_scalar(
            "SELECT version FROM versioned_resources WHERE resource_id = ? \
             ORDER BY check_order DESC LIMIT 1",
        )
        .bind(resource_id)
        .fetch_optional(self.pool())
        .await?;
        version.map(|v| serde_json::from_str(&v)).transpose().map_err(Into::into)
    }

    pub async fn resource_versions(&self, resource_id: i64) -> HangarResult<Vec<Version>> {
        let versions: Vec<String> = sqlx::query_scalar(
            "SELECT version FROM versioned_resources WHERE resource_id = ? ORDER BY check_order",
        )
        .bind(resource_id)
        .fetch_all(self.pool())
        .await?;
        versions
            .iter()
            .map(|v| serde_json::from_str(v).map_err(Into::into))
            .collect()
    }

    pub async fn versioned_resource_id(
        &self,
        resource_id: i64,
        version: &Version,
    ) -> HangarResult<Option<i64>> {
        Ok(sqlx::query_scalar(
            "SELECT id FROM versioned_resources WHERE resource_id = ? AND version = ?",
        )
        .bind(resource_id)
        .bind(canonical_json(version)?)
        .fetch_optional(self.pool())
        .await?)
    }

    pub async fn resource_type(
        &self,
        pipeline_id: i64,
        name: &str,
    ) -> HangarResult<Option<SavedResourceType>> {
        let row: Option<ResourceTypeRow> = sqlx::query_as(&format!(
            "SELECT {RESOURCE_TYPE_COLUMNS} FROM resource_types WHERE pipeline_id = ? AND name = ?"
        ))
        .bind(pipeline_id)
        .bind(name)
        .fetch_optional(self.pool())
        .await?;
        row.map(SavedResourceType::try_from).transpose()
    }

    /// Active pipeline-defined types with their current versions
    pub async fn resource_types(&self, pipeline_id: i64) -> HangarResult<VersionedResourceTypes> {
        let rows: Vec<ResourceTypeRow> = sqlx::query_as(&format!(
            "SELECT {RESOURCE_TYPE_COLUMNS} FROM resource_types \
             WHERE pipeline_id = ? AND active = 1 ORDER BY name"
        ))
        .bind(pipeline_id)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| SavedResourceType::try_from(row).map(|t| t.to_versioned()))
            .collect()
    }

    pub async fn save_resource_type_version(
        &self,
        resource_type_id: i64,
        version: &Version,
    ) -> HangarResult<()> {
        sqlx::query("UPDATE resource_types SET version = ? WHERE id = ?")
            .bind(canonical_json(version)?)
            .bind(resource_type_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_resource_type_check_error(
        &self,
        resource_type_id: i64,
        check_error: Option<&str>,
    ) -> HangarResult<()> {
        sqlx::query("UPDATE resource_types SET check_error = ? WHERE id = ?")
            .bind(check_error)
            .bind(resource_type_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn job_id(&self, pipeline_id: i64, name: &str) -> HangarResult<Option<i64>> {
        Ok(
            sqlx::query_scalar("SELECT id FROM jobs WHERE pipeline_id = ? AND name = ?")
                .bind(pipeline_id)
                .bind(name)
                .fetch_optional(self.pool())
                .await?,
        )
    }

    /// Pin the version the scheduler picked for a job's next build
    pub async fn set_next_build_input(
        &self,
        job_id: i64,
        input_name: &str,
        versioned_resource_id: i64,
    ) -> HangarResult<()> {
        sqlx::query(
            "INSERT INTO next_build_inputs (job_id, input_name, version_id) VALUES (?, ?, ?) \
             ON CONFLICT (job_id, input_name) DO UPDATE SET version_id = excluded.version_id",
        )
        .bind(job_id)
        .bind(input_name)
        .bind(versioned_resource_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn clear_next_build_inputs(&self, job_id: i64) -> HangarResult<()> {
        sqlx::query("DELETE FROM next_build_inputs WHERE job_id = ?")
            .bind(job_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Stamp `last_checked` if the interval has elapsed (or `immediate`).
    /// Returns whether the stamp happened.
    pub(crate) async fn stamp_last_checked(
        &self,
        table: CheckedTable,
        id: i64,
        interval_ms: i64,
        immediate: bool,
    ) -> HangarResult<bool> {
        let now = now_millis();
        let result = sqlx::query(&format!(
            "UPDATE {} SET last_checked = ?1 \
             WHERE id = ?2 AND (?3 OR last_checked + ?4 <= ?1)",
            table.as_str()
        ))
        .bind(now)
        .bind(id)
        .bind(immediate)
        .bind(interval_ms)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

/// Tables whose rows carry a `last_checked` stamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckedTable {
    Resources,
    ResourceTypes,
}

impl CheckedTable {
    fn as_str(self) -> &'static str {
        match self {
            Self::Resources => "resources",
            Self::ResourceTypes => "resource_types",
        }
    }
}
