//! One pass of container and volume removal

use super::container::{ContainerRepository, DestroyingContainer};
use super::volume::{DestroyingVolume, VolumeRepository};
use crate::error::HangarResult;
use crate::worker::ContainerRuntime;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapSummary {
    pub containers: usize,
    pub volumes: usize,
    /// Left for the next pass: runtime failures, lost races, volumes with children
    pub skipped: usize,
}

/// Moves eligible rows to destroying, removes the runtime objects, then
/// deletes the rows.
///
/// Containers go first so their volumes lose the owner they were waiting
/// on. Destroying volumes are handled newest first, which puts
/// copy-on-write children ahead of their parents. A parent whose children
/// are not being reaped in the same pass is left alone entirely.
pub struct Reaper {
    containers: ContainerRepository,
    volumes: VolumeRepository,
    runtime: Arc<dyn ContainerRuntime>,
}

impl Reaper {
    pub fn new(
        containers: ContainerRepository,
        volumes: VolumeRepository,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            containers,
            volumes,
            runtime,
        }
    }

    pub async fn reap(&self) -> HangarResult<ReapSummary> {
        let mut summary = ReapSummary::default();
        self.reap_containers(&mut summary).await?;
        self.reap_volumes(&mut summary).await?;

        if summary.containers + summary.volumes > 0 {
            info!(
                containers = summary.containers,
                volumes = summary.volumes,
                skipped = summary.skipped,
                "reaped"
            );
        }
        Ok(summary)
    }

    async fn reap_containers(&self, summary: &mut ReapSummary) -> HangarResult<()> {
        let found = self.containers.find_containers_for_deletion().await?;

        let mut destroying = found.destroying;
        for container in found.creating {
            match container.destroying().await? {
                Some(container) => destroying.push(container),
                None => summary.skipped += 1,
            }
        }
        for container in found.created {
            match container.destroying().await? {
                Some(container) => destroying.push(container),
                None => summary.skipped += 1,
            }
        }

        for container in destroying {
            if self.destroy_container(container).await? {
                summary.containers += 1;
            } else {
                summary.skipped += 1;
            }
        }
        Ok(())
    }

    async fn destroy_container(&self, container: DestroyingContainer) -> HangarResult<bool> {
        if let Err(e) = self.runtime.destroy_container(container.handle()).await {
            warn!(handle = container.handle(), error = %e, "failed to remove container");
            return Ok(false);
        }
        container.destroy().await
    }

    async fn reap_volumes(&self, summary: &mut ReapSummary) -> HangarResult<()> {
        let found = self.volumes.find_volumes_for_deletion().await?;
        let candidates: HashSet<i64> = found
            .creating
            .iter()
            .map(|volume| volume.id())
            .chain(found.created.iter().map(|volume| volume.id()))
            .chain(found.destroying.iter().map(|volume| volume.id()))
            .collect();

        let mut destroying = found.destroying;
        for volume in found.creating {
            if self.held_by_live_child(volume.id(), &candidates).await? {
                summary.skipped += 1;
                continue;
            }
            match volume.destroying().await? {
                Some(volume) => destroying.push(volume),
                None => summary.skipped += 1,
            }
        }
        for volume in found.created {
            if self.held_by_live_child(volume.id(), &candidates).await? {
                summary.skipped += 1;
                continue;
            }
            match volume.destroying().await? {
                Some(volume) => destroying.push(volume),
                None => summary.skipped += 1,
            }
        }

        destroying.sort_by_key(|volume| std::cmp::Reverse(volume.id()));
        for volume in destroying {
            if self.destroy_volume(volume).await? {
                summary.volumes += 1;
            } else {
                summary.skipped += 1;
            }
        }
        Ok(())
    }

    /// A child outside this pass still reads through the parent
    async fn held_by_live_child(&self, id: i64, candidates: &HashSet<i64>) -> HangarResult<bool> {
        let children = self.volumes.child_ids(id).await?;
        Ok(children.iter().any(|child| !candidates.contains(child)))
    }

    async fn destroy_volume(&self, volume: DestroyingVolume) -> HangarResult<bool> {
        // Children that failed earlier in this pass keep the parent on the runtime
        if !self.volumes.child_ids(volume.id()).await?.is_empty() {
            debug!(handle = volume.handle(), "volume still has children");
            return Ok(false);
        }
        if let Err(e) = self.runtime.destroy_volume(volume.handle()).await {
            warn!(handle = volume.handle(), error = %e, "failed to remove volume");
            return Ok(false);
        }
        volume.destroy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{BuildStatus, Store};
    use crate::lifecycle::{ContainerOwner, VolumeOwner, VolumeState};
    use crate::testing::{count, FakeRuntime};

    struct Fixture {
        store: Store,
        containers: ContainerRepository,
        volumes: VolumeRepository,
        runtime: Arc<FakeRuntime>,
        reaper: Reaper,
    }

    async fn fixture() -> Fixture {
        let store = Store::open_in_memory().await.unwrap();
        let containers = ContainerRepository::new(store.clone());
        let volumes = VolumeRepository::new(store.clone());
        let runtime = Arc::new(FakeRuntime::default());
        let reaper = Reaper::new(containers.clone(), volumes.clone(), runtime.clone());
        Fixture {
            store,
            containers,
            volumes,
            runtime,
            reaper,
        }
    }

    impl Fixture {
        /// A created container for `build_id` with one created volume
        async fn step(&self, build_id: i64, plan: &str) -> (String, String) {
            let record = self
                .containers
                .find_or_create(
                    "local",
                    &ContainerOwner::BuildStep {
                        build_id,
                        plan_id: plan.to_string(),
                    },
                    &Default::default(),
                )
                .await
                .unwrap();
            let container = self
                .containers
                .creating(&record.handle)
                .await
                .unwrap()
                .unwrap()
                .created()
                .await
                .unwrap()
                .unwrap();
            let volume = self
                .volumes
                .create_volume(
                    "local",
                    &VolumeOwner::ContainerMount {
                        container_id: container.id(),
                        mount_path: "/tmp/build/get".to_string(),
                    },
                )
                .await
                .unwrap()
                .created()
                .await
                .unwrap()
                .unwrap();
            (container.handle().to_string(), volume.handle().to_string())
        }

        async fn finish(&self, build_id: i64) {
            self.store.finish_build(build_id, BuildStatus::Succeeded).await.unwrap();
            self.store.set_build_interceptible(build_id, false).await.unwrap();
        }
    }

    #[tokio::test]
    async fn finished_build_is_reaped_with_its_volumes() {
        let fx = fixture().await;
        let running = fx.store.create_one_off_build("running").await.unwrap();
        let finished = fx.store.create_one_off_build("finished").await.unwrap();
        let (kept, kept_volume) = fx.step(running.id, "a").await;
        let (gone, gone_volume) = fx.step(finished.id, "a").await;
        fx.finish(finished.id).await;

        let summary = fx.reaper.reap().await.unwrap();
        assert_eq!(
            summary,
            ReapSummary {
                containers: 1,
                volumes: 1,
                skipped: 0
            }
        );
        assert_eq!(fx.runtime.destroyed_containers(), vec![gone]);
        assert_eq!(fx.runtime.destroyed_volumes(), vec![gone_volume]);
        assert!(fx.containers.find_by_handle(&kept).await.unwrap().is_some());
        assert!(fx.volumes.find_by_handle(&kept_volume).await.unwrap().is_some());

        // Nothing left to do
        assert_eq!(fx.reaper.reap().await.unwrap(), ReapSummary::default());
    }

    #[tokio::test]
    async fn runtime_failure_leaves_row_for_next_pass() {
        let fx = fixture().await;
        let build = fx.store.create_one_off_build("b").await.unwrap();
        let (handle, _) = fx.step(build.id, "a").await;
        fx.finish(build.id).await;
        fx.runtime.fail_on(&handle);

        // The volume follows the finished build even while its container lingers
        let summary = fx.reaper.reap().await.unwrap();
        assert_eq!(summary.containers, 0);
        assert_eq!(summary.volumes, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(count(&fx.store, "containers").await, 1);

        fx.runtime.clear_failures();
        let summary = fx.reaper.reap().await.unwrap();
        assert_eq!(summary.containers, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(count(&fx.store, "containers").await, 0);
        assert_eq!(count(&fx.store, "volumes").await, 0);
    }

    #[tokio::test]
    async fn children_go_before_parents() {
        let fx = fixture().await;
        let build = fx.store.create_one_off_build("b").await.unwrap();
        let (first, _) = fx.step(build.id, "a").await;
        let (second, _) = fx.step(build.id, "b").await;

        let parent = fx
            .volumes
            .create_volume(
                "local",
                &VolumeOwner::ContainerMount {
                    container_id: fx.containers.find_by_handle(&first).await.unwrap().unwrap().id,
                    mount_path: "/tmp/build/put".to_string(),
                },
            )
            .await
            .unwrap()
            .created()
            .await
            .unwrap()
            .unwrap();
        let second_id = fx.containers.find_by_handle(&second).await.unwrap().unwrap().id;
        parent
            .create_child_for_container(second_id, "/tmp/build/input")
            .await
            .unwrap()
            .created()
            .await
            .unwrap()
            .unwrap();

        fx.finish(build.id).await;
        let summary = fx.reaper.reap().await.unwrap();
        assert_eq!(summary.containers, 2);
        assert_eq!(summary.volumes, 4);
        assert_eq!(summary.skipped, 0);
        assert_eq!(count(&fx.store, "volumes").await, 0);
    }

    #[tokio::test]
    async fn parent_with_live_child_stays_on_the_runtime() {
        let fx = fixture().await;
        let running = fx.store.create_one_off_build("running").await.unwrap();
        let finished = fx.store.create_one_off_build("finished").await.unwrap();
        let (done, _) = fx.step(finished.id, "a").await;
        let (live, _) = fx.step(running.id, "a").await;

        let parent = fx
            .volumes
            .create_volume(
                "local",
                &VolumeOwner::ContainerMount {
                    container_id: fx.containers.find_by_handle(&done).await.unwrap().unwrap().id,
                    mount_path: "/tmp/build/put".to_string(),
                },
            )
            .await
            .unwrap()
            .created()
            .await
            .unwrap()
            .unwrap();
        let parent_handle = parent.handle().to_string();
        let live_id = fx.containers.find_by_handle(&live).await.unwrap().unwrap().id;
        parent
            .create_child_for_container(live_id, "/tmp/build/input")
            .await
            .unwrap()
            .created()
            .await
            .unwrap()
            .unwrap();
        fx.finish(finished.id).await;

        let summary = fx.reaper.reap().await.unwrap();
        assert!(summary.skipped >= 1);
        assert!(!fx.runtime.destroyed_volumes().contains(&parent_handle));
        let record = fx.volumes.find_by_handle(&parent_handle).await.unwrap().unwrap();
        assert_eq!(record.state, VolumeState::Created);

        // Once the child's build is done the whole chain goes
        fx.finish(running.id).await;
        fx.reaper.reap().await.unwrap();
        assert!(fx.runtime.destroyed_volumes().contains(&parent_handle));
        assert_eq!(count(&fx.store, "volumes").await, 0);
        assert_eq!(count(&fx.store, "containers").await, 0);
    }
}
