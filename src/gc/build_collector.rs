//! Releases finished builds for collection

use super::{GcEvent, GcObserver};
use crate::db::Store;
use crate::error::HangarResult;
use std::sync::Arc;
use tracing::info;

/// Marks completed builds as no longer interceptible.
///
/// The latest completed build of a job stays interceptible when it failed
/// or errored, so its containers and caches remain for debugging until a
/// newer build of the job completes.
pub struct BuildCollector {
    store: Store,
    observer: Arc<dyn GcObserver>,
}

impl BuildCollector {
    pub fn new(store: Store, observer: Arc<dyn GcObserver>) -> Self {
        Self { store, observer }
    }

    pub async fn release_finished_builds(&self) -> HangarResult<usize> {
        let released: Vec<i64> = sqlx::query_scalar(
            "UPDATE builds SET interceptible = 0 \
             WHERE completed = 1 AND interceptible = 1 \
               AND NOT ( \
                 job_id IS NOT NULL \
                 AND status IN ('failed', 'errored') \
                 AND id IN (SELECT MAX(id) FROM builds WHERE job_id IS NOT NULL AND completed = 1 GROUP BY job_id)) \
             RETURNING id",
        )
        .fetch_all(self.store.pool())
        .await?;

        if !released.is_empty() {
            info!(builds = released.len(), "released finished builds");
        }
        let count = released.len();
        for build_id in released {
            self.observer.on_event(GcEvent::BuildReleased { build_id });
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::BuildStatus;
    use crate::gc::TracingObserver;
    use crate::testing::pipeline_with_resource;

    #[tokio::test]
    async fn running_builds_stay_interceptible() {
        let store = Store::open_in_memory().await.unwrap();
        let build = store.create_one_off_build("one-off").await.unwrap();
        let collector = BuildCollector::new(store.clone(), Arc::new(TracingObserver));

        assert_eq!(collector.release_finished_builds().await.unwrap(), 0);
        assert!(store.build(build.id).await.unwrap().unwrap().interceptible);

        store
            .finish_build(build.id, BuildStatus::Errored)
            .await
            .unwrap();
        assert_eq!(collector.release_finished_builds().await.unwrap(), 1);
        assert!(!store.build(build.id).await.unwrap().unwrap().interceptible);
    }

    #[tokio::test]
    async fn failed_latest_job_build_is_kept() {
        let store = Store::open_in_memory().await.unwrap();
        let seeded = pipeline_with_resource(&store, "main", "git").await;
        let collector = BuildCollector::new(store.clone(), Arc::new(TracingObserver));

        let succeeded = store.create_job_build(seeded.job_id).await.unwrap();
        store
            .finish_build(succeeded.id, BuildStatus::Succeeded)
            .await
            .unwrap();
        let failed = store.create_job_build(seeded.job_id).await.unwrap();
        store
            .finish_build(failed.id, BuildStatus::Failed)
            .await
            .unwrap();
        // Still running, so it does not supersede the failure
        let running = store.create_job_build(seeded.job_id).await.unwrap();

        assert_eq!(collector.release_finished_builds().await.unwrap(), 1);
        assert!(!store.build(succeeded.id).await.unwrap().unwrap().interceptible);
        assert!(store.build(failed.id).await.unwrap().unwrap().interceptible);
        assert!(store.build(running.id).await.unwrap().unwrap().interceptible);
    }
}
