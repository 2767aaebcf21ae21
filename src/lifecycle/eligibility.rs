//! Deletion eligibility
//!
//! Each rule is a plain predicate over the facts gathered for one row. A
//! row is eligible when any rule holds; the reasons are kept so the reaper
//! and the CLI can say why something is going away.

use super::state::{ContainerState, VolumeState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletionReason {
    /// The owning build is completed and no longer interceptible
    BuildFinished,
    /// `best_if_used_by` has passed
    Expired,
    /// Never got attached to anything and is still being created
    Abandoned,
    /// Check session whose worker base resource type is gone
    StaleCheckSession,
    /// The cache it was fetching for is already on a volume
    CacheInitialized,
    /// The cache it belongs to has no uses left
    CacheUnused,
    /// Created, but every association has since been removed
    Orphaned,
}

impl DeletionReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::BuildFinished => "build-finished",
            Self::Expired => "expired",
            Self::Abandoned => "abandoned",
            Self::StaleCheckSession => "stale-check-session",
            Self::CacheInitialized => "cache-initialized",
            Self::CacheUnused => "cache-unused",
            Self::Orphaned => "orphaned",
        }
    }
}

impl fmt::Display for DeletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// What a container's deletion depends on
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerFacts {
    pub state: ContainerState,
    pub build_id: Option<i64>,
    /// `None` when there is no build row to join
    pub build_interceptible: Option<bool>,
    pub resource_config_id: Option<i64>,
    pub worker_base_resource_type_id: Option<i64>,
    pub worker_resource_cache_id: Option<i64>,
    pub best_if_used_by: Option<DateTime<Utc>>,
    /// Some volume for the same worker cache has been initialized
    pub cache_volume_initialized: bool,
    pub cache_uses: i64,
}

impl ContainerFacts {
    fn unattached(&self) -> bool {
        self.build_id.is_none()
            && self.resource_config_id.is_none()
            && self.worker_resource_cache_id.is_none()
    }
}

/// What a volume's deletion depends on
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeFacts {
    pub state: VolumeState,
    pub container_id: Option<i64>,
    /// Facts of the owning container, when there is one
    pub container: Option<ContainerFacts>,
    pub worker_resource_cache_id: Option<i64>,
    pub worker_base_resource_type_id: Option<i64>,
    pub best_if_used_by: Option<DateTime<Utc>>,
    pub cache_uses: i64,
}

impl VolumeFacts {
    fn unattached(&self) -> bool {
        self.container_id.is_none()
            && self.worker_resource_cache_id.is_none()
            && self.worker_base_resource_type_id.is_none()
    }
}

type Rule<F> = (DeletionReason, fn(&F, DateTime<Utc>) -> bool);

const CONTAINER_RULES: &[Rule<ContainerFacts>] = &[
    (DeletionReason::BuildFinished, container_build_finished),
    (DeletionReason::Expired, container_expired),
    (DeletionReason::Abandoned, container_abandoned),
    (DeletionReason::StaleCheckSession, stale_check_session),
    (DeletionReason::CacheInitialized, container_cache_initialized),
    (DeletionReason::CacheUnused, container_cache_unused),
    (DeletionReason::Orphaned, container_orphaned),
];

const VOLUME_RULES: &[Rule<VolumeFacts>] = &[
    (DeletionReason::BuildFinished, volume_build_finished),
    (DeletionReason::Expired, volume_expired),
    (DeletionReason::Abandoned, volume_abandoned),
    (DeletionReason::StaleCheckSession, volume_stale_check_session),
    (DeletionReason::CacheUnused, volume_cache_unused),
    (DeletionReason::Orphaned, volume_orphaned),
];

fn reasons<F>(rules: &[Rule<F>], facts: &F, now: DateTime<Utc>) -> Vec<DeletionReason> {
    rules
        .iter()
        .filter(|(_, holds)| holds(facts, now))
        .map(|(reason, _)| *reason)
        .collect()
}

/// Every rule that makes the container eligible; empty means keep it
pub fn container_deletion_reasons(facts: &ContainerFacts, now: DateTime<Utc>) -> Vec<DeletionReason> {
    reasons(CONTAINER_RULES, facts, now)
}

pub fn volume_deletion_reasons(facts: &VolumeFacts, now: DateTime<Utc>) -> Vec<DeletionReason> {
    reasons(VOLUME_RULES, facts, now)
}

pub fn container_build_finished(facts: &ContainerFacts, _now: DateTime<Utc>) -> bool {
    facts.build_id.is_some() && facts.build_interceptible == Some(false)
}

pub fn container_expired(facts: &ContainerFacts, now: DateTime<Utc>) -> bool {
    facts.best_if_used_by.is_some_and(|at| at < now)
}

pub fn container_abandoned(facts: &ContainerFacts, _now: DateTime<Utc>) -> bool {
    facts.state == ContainerState::Creating && facts.unattached()
}

pub fn stale_check_session(facts: &ContainerFacts, _now: DateTime<Utc>) -> bool {
    facts.resource_config_id.is_some() && facts.worker_base_resource_type_id.is_none()
}

pub fn container_cache_initialized(facts: &ContainerFacts, _now: DateTime<Utc>) -> bool {
    facts.worker_resource_cache_id.is_some() && facts.cache_volume_initialized
}

pub fn container_cache_unused(facts: &ContainerFacts, _now: DateTime<Utc>) -> bool {
    facts.worker_resource_cache_id.is_some() && facts.cache_uses == 0
}

pub fn container_orphaned(facts: &ContainerFacts, _now: DateTime<Utc>) -> bool {
    facts.state == ContainerState::Created && facts.unattached()
}

fn volume_build_finished(facts: &VolumeFacts, now: DateTime<Utc>) -> bool {
    facts
        .container
        .as_ref()
        .is_some_and(|container| container_build_finished(container, now))
}

fn volume_expired(facts: &VolumeFacts, now: DateTime<Utc>) -> bool {
    facts.best_if_used_by.is_some_and(|at| at < now)
}

fn volume_abandoned(facts: &VolumeFacts, _now: DateTime<Utc>) -> bool {
    facts.state == VolumeState::Creating && facts.unattached()
}

fn volume_stale_check_session(facts: &VolumeFacts, now: DateTime<Utc>) -> bool {
    facts
        .container
        .as_ref()
        .is_some_and(|container| stale_check_session(container, now))
}

fn volume_cache_unused(facts: &VolumeFacts, _now: DateTime<Utc>) -> bool {
    facts.worker_resource_cache_id.is_some() && facts.cache_uses == 0
}

fn volume_orphaned(facts: &VolumeFacts, _now: DateTime<Utc>) -> bool {
    facts.state == VolumeState::Created && facts.unattached()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn container() -> ContainerFacts {
        ContainerFacts {
            state: ContainerState::Created,
            build_id: Some(1),
            build_interceptible: Some(true),
            resource_config_id: None,
            worker_base_resource_type_id: None,
            worker_resource_cache_id: None,
            best_if_used_by: None,
            cache_volume_initialized: false,
            cache_uses: 0,
        }
    }

    fn volume() -> VolumeFacts {
        VolumeFacts {
            state: VolumeState::Created,
            container_id: Some(1),
            container: Some(container()),
            worker_resource_cache_id: None,
            worker_base_resource_type_id: None,
            best_if_used_by: None,
            cache_uses: 0,
        }
    }

    #[test]
    fn interceptible_build_container_is_kept() {
        assert!(container_deletion_reasons(&container(), Utc::now()).is_empty());
    }

    #[test]
    fn finished_build_container_is_eligible() {
        let facts = ContainerFacts {
            build_interceptible: Some(false),
            ..container()
        };
        assert_eq!(
            container_deletion_reasons(&facts, Utc::now()),
            vec![DeletionReason::BuildFinished]
        );
    }

    #[test]
    fn expiry_is_strict() {
        let now = Utc::now();
        let facts = ContainerFacts {
            best_if_used_by: Some(now),
            ..container()
        };
        assert!(!container_expired(&facts, now));
        assert!(container_expired(&facts, now + Duration::milliseconds(1)));
    }

    #[test]
    fn unattached_container_depends_on_state() {
        let creating = ContainerFacts {
            state: ContainerState::Creating,
            build_id: None,
            build_interceptible: None,
            ..container()
        };
        assert_eq!(
            container_deletion_reasons(&creating, Utc::now()),
            vec![DeletionReason::Abandoned]
        );

        let created = ContainerFacts {
            state: ContainerState::Created,
            ..creating.clone()
        };
        assert_eq!(
            container_deletion_reasons(&created, Utc::now()),
            vec![DeletionReason::Orphaned]
        );

        let destroying = ContainerFacts {
            state: ContainerState::Destroying,
            ..creating
        };
        assert!(container_deletion_reasons(&destroying, Utc::now()).is_empty());
    }

    #[test]
    fn check_session_goes_stale_without_base_type() {
        let live = ContainerFacts {
            build_id: None,
            build_interceptible: None,
            resource_config_id: Some(3),
            worker_base_resource_type_id: Some(4),
            best_if_used_by: Some(Utc::now() + Duration::minutes(5)),
            ..container()
        };
        assert!(container_deletion_reasons(&live, Utc::now()).is_empty());

        let stale = ContainerFacts {
            worker_base_resource_type_id: None,
            ..live
        };
        assert_eq!(
            container_deletion_reasons(&stale, Utc::now()),
            vec![DeletionReason::StaleCheckSession]
        );
    }

    #[test]
    fn cache_fetch_container_rules() {
        let fetching = ContainerFacts {
            build_id: None,
            build_interceptible: None,
            worker_resource_cache_id: Some(9),
            cache_uses: 2,
            ..container()
        };
        assert!(container_deletion_reasons(&fetching, Utc::now()).is_empty());

        let done = ContainerFacts {
            cache_volume_initialized: true,
            ..fetching.clone()
        };
        assert_eq!(
            container_deletion_reasons(&done, Utc::now()),
            vec![DeletionReason::CacheInitialized]
        );

        let unused = ContainerFacts {
            cache_uses: 0,
            ..done
        };
        assert_eq!(
            container_deletion_reasons(&unused, Utc::now()),
            vec![DeletionReason::CacheInitialized, DeletionReason::CacheUnused]
        );
    }

    #[test]
    fn volume_follows_its_container() {
        assert!(volume_deletion_reasons(&volume(), Utc::now()).is_empty());

        let facts = VolumeFacts {
            container: Some(ContainerFacts {
                build_interceptible: Some(false),
                ..container()
            }),
            ..volume()
        };
        assert_eq!(
            volume_deletion_reasons(&facts, Utc::now()),
            vec![DeletionReason::BuildFinished]
        );
    }

    #[test]
    fn initialized_cache_volume_is_kept_while_used() {
        let facts = VolumeFacts {
            container_id: None,
            container: None,
            worker_resource_cache_id: Some(1),
            cache_uses: 1,
            ..volume()
        };
        assert!(volume_deletion_reasons(&facts, Utc::now()).is_empty());

        let unused = VolumeFacts {
            cache_uses: 0,
            ..facts
        };
        assert_eq!(
            volume_deletion_reasons(&unused, Utc::now()),
            vec![DeletionReason::CacheUnused]
        );
    }

    #[test]
    fn volume_left_without_owner_is_orphaned() {
        let facts = VolumeFacts {
            container_id: None,
            container: None,
            ..volume()
        };
        assert_eq!(
            volume_deletion_reasons(&facts, Utc::now()),
            vec![DeletionReason::Orphaned]
        );
        let creating = VolumeFacts {
            state: VolumeState::Creating,
            ..facts
        };
        assert_eq!(
            volume_deletion_reasons(&creating, Utc::now()),
            vec![DeletionReason::Abandoned]
        );
    }
}
