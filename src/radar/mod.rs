//! Radar: periodic and on-demand checking for new versions
//!
//! A scanner holds no state of its own between calls. Everything it needs
//! (pause flags, last versions, check errors, the checking lock) lives in
//! the store behind [`RadarDb`].

pub mod db;
pub mod resource_scanner;
pub mod resource_type_scanner;

pub use db::{PipelineDb, RadarDb};
pub use resource_scanner::ResourceScanner;
pub use resource_type_scanner::ResourceTypeScanner;

use crate::db::Lock;
use crate::error::{HangarError, HangarResult};
use crate::resource::types::Version;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// How often an immediate scan retries a held lock
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// A held checking lock
#[async_trait]
pub trait CheckLock: Send + Sync {
    async fn release(&self) -> HangarResult<()>;
}

#[async_trait]
impl CheckLock for Lock {
    async fn release(&self) -> HangarResult<()> {
        Lock::release(self).await
    }
}

#[async_trait]
pub trait Scanner: Send + Sync {
    /// One periodic tick. Returns when to run again, with the tick's outcome.
    async fn run(&self, name: &str) -> (Duration, HangarResult<()>);

    /// Check now from the latest known version, waiting for the lock
    async fn scan(&self, name: &str, cancel: &CancellationToken) -> HangarResult<()>;

    /// Check now from `from` (`None` checks from scratch), waiting for the
    /// lock. Script failures are returned to the caller.
    async fn scan_from_version(
        &self,
        name: &str,
        from: Option<&Version>,
        cancel: &CancellationToken,
    ) -> HangarResult<()>;
}

/// Where a check starts
#[derive(Debug, Clone, Copy)]
pub(crate) enum CheckStart<'a> {
    Latest,
    From(Option<&'a Version>),
}

/// `check_every` if set, else the default
pub fn check_interval(check_every: Option<&str>, default: Duration) -> HangarResult<Duration> {
    match check_every {
        None => Ok(default),
        Some(value) => {
            humantime::parse_duration(value).map_err(|e| HangarError::InvalidCheckInterval {
                value: value.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

/// Retry `acquire` every second until it yields a lock. A lock release in
/// this process wakes the loop early. A store error while acquiring ends
/// the wait with [`HangarError::FailedToAcquireLock`].
pub(crate) async fn wait_for_lock<F, Fut>(
    db: &dyn RadarDb,
    cancel: &CancellationToken,
    mut acquire: F,
) -> HangarResult<Box<dyn CheckLock>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HangarResult<Option<Box<dyn CheckLock>>>>,
{
    loop {
        let released = db.lock_released();
        tokio::pin!(released);
        released.as_mut().enable();

        match acquire().await {
            Ok(Some(lock)) => return Ok(lock),
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "failed to get lock");
                return Err(HangarError::FailedToAcquireLock);
            }
        }

        debug!("lock held elsewhere, waiting");
        tokio::select! {
            _ = cancel.cancelled() => return Err(HangarError::Cancelled),
            _ = &mut released => {}
            _ = tokio::time::sleep(LOCK_RETRY_INTERVAL) => {}
        }
    }
}

pub(crate) async fn release(lock: Box<dyn CheckLock>) {
    if let Err(e) = lock.release().await {
        warn!(error = %e, "failed to release checking lock");
    }
}
