//! Shared store
//!
//! Every orchestrator process works against the same SQLite database.
//! Coordination happens through constraint-backed writes: find-or-create
//! retries on unique conflicts, deletes are predicate-gated and state
//! transitions are compare-and-set.

pub mod build;
pub mod lock;
pub mod pipeline;

pub use build::{BuildStatus, SavedBuild};
pub use lock::{Lock, LockFactory, LockName};
pub use pipeline::{PipelineRecord, SavedResource, SavedResourceType};

use crate::config::DatabaseConfig;
use crate::error::HangarResult;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts for a find-or-create before the conflict is surfaced
pub(crate) const MAX_FIND_OR_CREATE_ATTEMPTS: usize = 5;

/// Handle to the shared database
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database file and apply migrations
    pub async fn open(path: impl AsRef<Path>, config: &DatabaseConfig) -> HangarResult<Self> {
        let path = path.as_ref();
        info!("Opening store: {}", path.display());

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
            .pragma("synchronous", "NORMAL")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Open a private in-memory database
    pub async fn open_in_memory() -> HangarResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        // One connection: every connection to ":memory:" is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> HangarResult<()> {
        debug!("Running store migrations");
        sqlx::migrate!("./migrations").run(pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn health_check(&self) -> HangarResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Run `attempt` again while it fails with a transient conflict.
/// The last error is surfaced once the attempts run out.
pub(crate) async fn retry_find_or_create<T, F, Fut>(what: &str, mut attempt: F) -> HangarResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HangarResult<T>>,
{
    let mut tries = 1;
    loop {
        match attempt().await {
            Err(err) if err.is_transient() && tries < MAX_FIND_OR_CREATE_ATTEMPTS => {
                debug!(what, attempt = tries, error = %err, "retrying find-or-create");
                tokio::time::sleep(Duration::from_millis(5 * tries as u64)).await;
                tries += 1;
            }
            Err(err) if err.is_transient() => {
                warn!(what, error = %err, "find-or-create kept conflicting");
                return Err(err);
            }
            other => return other,
        }
    }
}

/// Current time as stored in the database
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

pub(crate) fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn in_memory_store_is_migrated() {
        let store = Store::open_in_memory().await.unwrap();
        store.health_check().await.unwrap();

        let (tables,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('resource_configs', 'resource_caches', 'resource_cache_uses', 'containers', 'volumes', 'locks')",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(tables, 6);
    }

    #[tokio::test]
    async fn file_store_reopens() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hangar.db");
        let config = DatabaseConfig::default();

        let store = Store::open(&path, &config).await.unwrap();
        sqlx::query("INSERT INTO pipelines (name) VALUES ('main')")
            .execute(store.pool())
            .await
            .unwrap();
        store.close().await;

        let store = Store::open(&path, &config).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pipelines")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let store = Store::open_in_memory().await.unwrap();
        let err = sqlx::query("INSERT INTO jobs (pipeline_id, name) VALUES (42, 'orphan')")
            .execute(store.pool())
            .await
            .unwrap_err();
        let err = crate::error::HangarError::from(err);
        assert!(matches!(err, crate::error::HangarError::IntegrityConflict(_)));
    }

    #[tokio::test]
    async fn retries_transient_conflicts_only() {
        let mut calls = 0;
        let value = retry_find_or_create("thing", || {
            calls += 1;
            let call = calls;
            async move {
                if call < 3 {
                    Err(crate::error::HangarError::Conflict("busy".into()))
                } else {
                    Ok(call)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);

        let mut calls = 0;
        let err = retry_find_or_create::<(), _, _>("thing", || {
            calls += 1;
            async { Err(crate::error::HangarError::BaseResourceTypeNotFound("x".into())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, crate::error::HangarError::BaseResourceTypeNotFound(_)));
        assert_eq!(calls, 1);

        let mut calls = 0;
        let err = retry_find_or_create::<(), _, _>("thing", || {
            calls += 1;
            async { Err(crate::error::HangarError::Conflict("busy".into())) }
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls, MAX_FIND_OR_CREATE_ATTEMPTS);
    }

    #[test]
    fn millis_conversions() {
        let at = from_millis(1_700_000_000_123).unwrap();
        assert_eq!(to_millis(at), 1_700_000_000_123);
        assert_eq!(duration_millis(Duration::from_secs(2)), 2000);
    }
}
