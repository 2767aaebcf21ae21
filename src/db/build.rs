//! Builds and the image versions they ran with

use super::{from_millis, now_millis, Store};
use crate::error::{HangarError, HangarResult};
use crate::resource::types::{canonical_json, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use tracing::debug;

/// Build status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Started,
    Succeeded,
    Failed,
    Errored,
    Aborted,
}

impl BuildStatus {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::Aborted => "aborted",
        }
    }

    pub fn from_label(s: &str) -> HangarResult<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "started" => Ok(Self::Started),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "errored" => Ok(Self::Errored),
            "aborted" => Ok(Self::Aborted),
            other => Err(HangarError::UnknownState {
                entity: "build",
                value: other.to_string(),
            }),
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Pending | Self::Started)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A build row
#[derive(Debug, Clone, PartialEq)]
pub struct SavedBuild {
    pub id: i64,
    pub name: String,
    pub job_id: Option<i64>,
    pub status: BuildStatus,
    pub completed: bool,
    pub interceptible: bool,
    pub end_time: Option<DateTime<Utc>>,
}

impl SavedBuild {
    pub fn is_one_off(&self) -> bool {
        self.job_id.is_none()
    }
}

#[derive(FromRow)]
struct BuildRow {
    id: i64,
    name: String,
    job_id: Option<i64>,
    status: String,
    completed: bool,
    interceptible: bool,
    end_time: Option<i64>,
}

impl TryFrom<BuildRow> for SavedBuild {
    type Error = HangarError;

    fn try_from(row: BuildRow) -> HangarResult<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            job_id: row.job_id,
            status: BuildStatus::from_label(&row.status)?,
            completed: row.completed,
            interceptible: row.interceptible,
            end_time: row.end_time.and_then(from_millis),
        })
    }
}

const BUILD_COLUMNS: &str = "id, name, job_id, status, completed, interceptible, end_time";

impl Store {
    pub async fn create_one_off_build(&self, name: &str) -> HangarResult<SavedBuild> {
        let row: BuildRow = sqlx::query_as(&format!(
            "INSERT INTO builds (name, status, start_time, created_at) VALUES (?1, 'started', ?2, ?2) \
             RETURNING {BUILD_COLUMNS}"
        ))
        .bind(name)
        .bind(now_millis())
        .fetch_one(self.pool())
        .await?;
        row.try_into()
    }

    /// Create the next numbered build of a job
    pub async fn create_job_build(&self, job_id: i64) -> HangarResult<SavedBuild> {
        let mut tx = self.pool().begin().await?;

        let previous: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM builds WHERE job_id = ?")
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?;

        let row: BuildRow = sqlx::query_as(&format!(
            "INSERT INTO builds (name, job_id, status, start_time, created_at) \
             VALUES (?1, ?2, 'started', ?3, ?3) RETURNING {BUILD_COLUMNS}"
        ))
        .bind((previous + 1).to_string())
        .bind(job_id)
        .bind(now_millis())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    pub async fn build(&self, id: i64) -> HangarResult<Option<SavedBuild>> {
        let row: Option<BuildRow> =
            sqlx::query_as(&format!("SELECT {BUILD_COLUMNS} FROM builds WHERE id = ?"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        row.map(SavedBuild::try_from).transpose()
    }

    /// Mark a build finished with the given status
    pub async fn finish_build(&self, id: i64, status: BuildStatus) -> HangarResult<()> {
        let result = sqlx::query(
            "UPDATE builds SET status = ?, completed = 1, end_time = ? WHERE id = ?",
        )
        .bind(status.as_label())
        .bind(now_millis())
        .bind(id)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(HangarError::BuildNotFound(id));
        }
        debug!(build = id, %status, "build finished");
        Ok(())
    }

    pub async fn set_build_interceptible(&self, id: i64, interceptible: bool) -> HangarResult<()> {
        sqlx::query("UPDATE builds SET interceptible = ? WHERE id = ?")
            .bind(interceptible)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn delete_build(&self, id: i64) -> HangarResult<()> {
        sqlx::query("DELETE FROM builds WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Remember which image version a build step ran with
    pub async fn save_image_resource_version(
        &self,
        build_id: i64,
        plan_id: &str,
        version: &Version,
    ) -> HangarResult<()> {
        sqlx::query(
            "INSERT INTO image_resource_versions (build_id, plan_id, version) VALUES (?, ?, ?) \
             ON CONFLICT (build_id, plan_id) DO UPDATE SET version = excluded.version",
        )
        .bind(build_id)
        .bind(plan_id)
        .bind(canonical_json(version)?)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
