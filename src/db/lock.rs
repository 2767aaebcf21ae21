//! Named leases shared through the store
//!
//! A lock row is owned by one `LockFactory` (one per process) until it is
//! released or its lease runs out. An expired lease may be taken over by
//! anyone, so a crashed holder never blocks others for longer than the lease.

use super::{duration_millis, now_millis, Store};
use crate::error::HangarResult;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity of a lock
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockName {
    ResourceChecking { pipeline_id: i64, resource_id: i64 },
    ResourceTypeChecking { pipeline_id: i64, resource_type_id: i64 },
    Named(String),
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceChecking {
                pipeline_id,
                resource_id,
            } => write!(f, "resource-checking:{pipeline_id}:{resource_id}"),
            Self::ResourceTypeChecking {
                pipeline_id,
                resource_type_id,
            } => write!(f, "resource-type-checking:{pipeline_id}:{resource_type_id}"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Acquires leases on behalf of this process
#[derive(Debug, Clone)]
pub struct LockFactory {
    store: Store,
    owner: Uuid,
    released: Arc<Notify>,
}

impl LockFactory {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            owner: Uuid::new_v4(),
            released: Arc::new(Notify::new()),
        }
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    /// Try once to take the lock. `None` means someone else holds it.
    pub async fn acquire(&self, name: &LockName, lease: Duration) -> HangarResult<Option<Lock>> {
        let key = name.to_string();
        let now = now_millis();
        let expires_at = now.saturating_add(duration_millis(lease));

        let result = sqlx::query(
            "INSERT INTO locks (name, owner, expires_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT (name) DO UPDATE SET owner = excluded.owner, expires_at = excluded.expires_at \
             WHERE locks.expires_at <= ?4",
        )
        .bind(&key)
        .bind(self.owner.to_string())
        .bind(expires_at)
        .bind(now)
        .execute(self.store.pool())
        .await?;

        if result.rows_affected() == 0 {
            debug!(lock = %key, "lock held elsewhere");
            return Ok(None);
        }

        debug!(lock = %key, "acquired lock");
        Ok(Some(Lock {
            name: key,
            factory: self.clone(),
        }))
    }

    /// Resolves the next time any lock from this process is released
    pub fn released(&self) -> Notified<'_> {
        self.released.notified()
    }
}

/// A held lease
#[derive(Debug)]
pub struct Lock {
    name: String,
    factory: LockFactory,
}

impl Lock {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Give the lock up. Only deletes the row if we still own it.
    pub async fn release(&self) -> HangarResult<()> {
        let result = sqlx::query("DELETE FROM locks WHERE name = ? AND owner = ?")
            .bind(&self.name)
            .bind(self.factory.owner.to_string())
            .execute(self.factory.store.pool())
            .await?;

        if result.rows_affected() == 0 {
            warn!(lock = %self.name, "lock lease expired before release");
        } else {
            debug!(lock = %self.name, "released lock");
        }
        self.factory.released.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> LockName {
        LockName::ResourceChecking {
            pipeline_id: 1,
            resource_id: 2,
        }
    }

    #[test]
    fn lock_names() {
        assert_eq!(name().to_string(), "resource-checking:1:2");
        assert_eq!(
            LockName::ResourceTypeChecking {
                pipeline_id: 3,
                resource_type_id: 4
            }
            .to_string(),
            "resource-type-checking:3:4"
        );
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let store = Store::open_in_memory().await.unwrap();
        let ours = LockFactory::new(store.clone());
        let theirs = LockFactory::new(store);

        let lock = ours
            .acquire(&name(), Duration::from_secs(60))
            .await
            .unwrap()
            .expect("first acquire succeeds");
        assert!(theirs
            .acquire(&name(), Duration::from_secs(60))
            .await
            .unwrap()
            .is_none());
        assert!(ours
            .acquire(&name(), Duration::from_secs(60))
            .await
            .unwrap()
            .is_none());

        lock.release().await.unwrap();
        assert!(theirs
            .acquire(&name(), Duration::from_secs(60))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() {
        let store = Store::open_in_memory().await.unwrap();
        let ours = LockFactory::new(store.clone());
        let theirs = LockFactory::new(store);

        let stale = ours
            .acquire(&name(), Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        let fresh = theirs
            .acquire(&name(), Duration::from_secs(60))
            .await
            .unwrap()
            .expect("expired lease is free");

        // The stale holder must not delete the new owner's row
        stale.release().await.unwrap();
        assert!(ours
            .acquire(&name(), Duration::from_secs(60))
            .await
            .unwrap()
            .is_none());
        fresh.release().await.unwrap();
    }

    #[tokio::test]
    async fn release_wakes_waiters() {
        let store = Store::open_in_memory().await.unwrap();
        let factory = LockFactory::new(store);
        let lock = factory
            .acquire(&name(), Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        let released = factory.released();
        tokio::pin!(released);
        released.as_mut().enable();

        lock.release().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), released)
            .await
            .expect("waiter woke");
    }
}
