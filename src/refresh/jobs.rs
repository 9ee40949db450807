//! Periodic maintenance jobs and the lock shared by batch jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};

use crate::db::Database;
use crate::feed::FeedRepository;
use crate::item::ItemRepository;
use crate::{Result, SemaphoreError};

/// Process-wide gate between batch jobs that rewrite feed rows.
///
/// The refresh cycle and the follower recount each hold it for their whole
/// run. Row-level races are left to the version check.
#[derive(Clone, Default)]
pub struct BatchJobLock {
    inner: Arc<Mutex<()>>,
}

impl BatchJobLock {
    /// Create a new lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock.
    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        self.inner.clone().lock_owned().await
    }

    /// Take the lock if no job holds it.
    pub fn try_acquire(&self) -> Option<OwnedMutexGuard<()>> {
        self.inner.clone().try_lock_owned().ok()
    }
}

impl std::fmt::Debug for BatchJobLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchJobLock").finish_non_exhaustive()
    }
}

/// Sleep for `period` unless shutdown is signalled first.
///
/// Returns true when the caller should stop. A dropped sender counts as
/// shutdown.
pub(crate) async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, period: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    let changed = tokio::select! {
        changed = shutdown.changed() => Some(changed.is_ok()),
        _ = tokio::time::sleep(period) => None,
    };
    match changed {
        None => false,
        Some(false) => true,
        Some(true) => *shutdown.borrow(),
    }
}

/// Recomputes `feeds.follower_count` from `feed_follows`.
#[derive(Debug, Clone)]
pub struct FollowerCountJob {
    db: Database,
    lock: BatchJobLock,
    period: Duration,
}

impl FollowerCountJob {
    /// Create a new job.
    pub fn new(db: Database, lock: BatchJobLock, period: Duration) -> Self {
        Self { db, lock, period }
    }

    /// Run one recount under the batch job lock. Returns the feeds changed.
    pub async fn run_once(&self) -> Result<u64> {
        let _guard = self.lock.acquire().await;
        FeedRepository::new(self.db.pool())
            .recompute_follower_counts()
            .await
    }

    /// Run until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Follower recount started (period: {} seconds)",
            self.period.as_secs()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_once().await {
                Ok(0) => debug!("follower counts up to date"),
                Ok(changed) => info!(changed, "recomputed follower counts"),
                Err(e) => error!(error = %e, "follower recount failed"),
            }
            if wait_or_shutdown(&mut shutdown, self.period).await {
                break;
            }
        }

        info!("Follower recount stopped");
    }
}

/// Deletes items ingested longer ago than the retention window.
///
/// Saved items are never deleted.
#[derive(Debug, Clone)]
pub struct ItemCleanupJob {
    db: Database,
    period: Duration,
    max_age: Duration,
}

impl ItemCleanupJob {
    /// Create a new job.
    pub fn new(db: Database, period: Duration, max_age: Duration) -> Self {
        Self {
            db,
            period,
            max_age,
        }
    }

    /// Run one cleanup pass. Returns the number of items deleted.
    pub async fn run_once(&self) -> Result<u64> {
        let max_age = chrono::Duration::from_std(self.max_age)
            .map_err(|e| SemaphoreError::Config(format!("item retention out of range: {e}")))?;
        let cutoff = Utc::now() - max_age;
        ItemRepository::new(self.db.pool())
            .delete_ingested_before(cutoff)
            .await
    }

    /// Run until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Item cleanup started (period: {} seconds, max age: {} days)",
            self.period.as_secs(),
            self.max_age.as_secs() / 86_400
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_once().await {
                Ok(0) => debug!("no expired items"),
                Ok(deleted) => info!(deleted, "deleted expired items"),
                Err(e) => error!(error = %e, "item cleanup failed"),
            }
            if wait_or_shutdown(&mut shutdown, self.period).await {
                break;
            }
        }

        info!("Item cleanup stopped");
    }
}
