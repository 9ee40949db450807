//! Refresh scheduler for Semaphore.
//!
//! Each cycle selects stale feeds and fans them out to a fixed number of
//! workers over a bounded channel, then waits for every worker to drain it.
//! Cycles hold the [`BatchJobLock`] from selection until the last worker
//! finishes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::jobs::{wait_or_shutdown, BatchJobLock};
use crate::config::Config;
use crate::db::{with_timeout, Database};
use crate::feed::{Feed, FeedContent, FeedHealthTracker, FeedRepository, FeedSource};
use crate::item::{ItemService, UpsertReport};
use crate::{Result, SemaphoreError};

/// Scheduler limits.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Time between cycles.
    pub period: Duration,
    /// A feed checked more recently than this is skipped.
    pub stale_after: Duration,
    /// Number of workers per cycle.
    pub workers: usize,
    /// Bound on each feed fetch.
    pub fetch_timeout: Duration,
    pub max_items_per_feed: usize,
    /// Bound on each storage call.
    pub statement_timeout: Duration,
}

impl RefreshSettings {
    /// Build settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            period: config.refresher.refresh_period(),
            stale_after: config.refresher.stale_after(),
            workers: config.refresher.max_concurrent_refreshes,
            fetch_timeout: config.refresher.fetch_timeout(),
            max_items_per_feed: config.refresher.max_items_per_feed,
            statement_timeout: config.database.statement_timeout(),
        }
    }
}

/// Totals of one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Stale feeds selected.
    pub feeds: usize,
    /// Feeds that went through the success transition.
    pub refreshed: usize,
    /// Feeds that went through the failure transition.
    pub failed: usize,
    /// Feeds skipped because another writer advanced their version.
    pub conflicts: usize,
    /// Feeds whose transition could not be written at all.
    pub errors: usize,
    pub items_inserted: u64,
    pub items_updated: u64,
}

impl CycleReport {
    fn record(&mut self, outcome: FeedOutcome) {
        match outcome {
            FeedOutcome::Refreshed(report) => {
                self.refreshed += 1;
                self.items_inserted += report.inserted;
                self.items_updated += report.updated;
            }
            FeedOutcome::Failed => self.failed += 1,
            FeedOutcome::Conflict => self.conflicts += 1,
            FeedOutcome::Error => self.errors += 1,
        }
    }

    fn merge(&mut self, other: CycleReport) {
        self.refreshed += other.refreshed;
        self.failed += other.failed;
        self.conflicts += other.conflicts;
        self.errors += other.errors;
        self.items_inserted += other.items_inserted;
        self.items_updated += other.items_updated;
    }
}

enum FeedOutcome {
    Refreshed(UpsertReport),
    Failed,
    Conflict,
    Error,
}

/// Periodically refreshes stale feeds.
#[derive(Clone)]
pub struct RefreshScheduler {
    db: Database,
    source: Arc<dyn FeedSource>,
    lock: BatchJobLock,
    settings: RefreshSettings,
}

impl RefreshScheduler {
    /// Create a new scheduler.
    pub fn new(
        db: Database,
        source: Arc<dyn FeedSource>,
        lock: BatchJobLock,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            db,
            source,
            lock,
            settings,
        }
    }

    /// Run cycles until shutdown.
    ///
    /// Shutdown is observed before each cycle and while waiting for the next
    /// one. In-flight fetches are bounded by the fetch timeout.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Refresh scheduler started (period: {} seconds, workers: {})",
            self.settings.period.as_secs(),
            self.settings.workers
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_cycle().await {
                Ok(report) if report.feeds > 0 => info!(
                    feeds = report.feeds,
                    refreshed = report.refreshed,
                    failed = report.failed,
                    conflicts = report.conflicts,
                    errors = report.errors,
                    inserted = report.items_inserted,
                    updated = report.items_updated,
                    "refresh cycle complete"
                ),
                Ok(_) => debug!("no stale feeds"),
                Err(e) => error!(error = %e, "refresh cycle failed"),
            }

            if wait_or_shutdown(&mut shutdown, self.settings.period).await {
                break;
            }
        }

        info!("Refresh scheduler stopped");
    }

    /// Run one cycle: select stale feeds, refresh them, wait for all workers.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _guard = self.lock.acquire().await;

        let stale_after = chrono::Duration::from_std(self.settings.stale_after)
            .map_err(|e| SemaphoreError::Config(format!("stale_after out of range: {e}")))?;
        let cutoff = Utc::now() - stale_after;

        let feeds = with_timeout(
            self.settings.statement_timeout,
            "stale feed query",
            FeedRepository::new(self.db.pool()).list_stale(cutoff),
        )
        .await?;

        let mut report = CycleReport {
            feeds: feeds.len(),
            ..CycleReport::default()
        };
        if feeds.is_empty() {
            return Ok(report);
        }

        let workers = self.settings.workers.max(1).min(feeds.len());
        debug!(feeds = feeds.len(), workers, "starting refresh cycle");

        let (tx, rx) = mpsc::channel::<Feed>(workers);
        let rx = Arc::new(Mutex::new(rx));

        let mut set = JoinSet::new();
        for _ in 0..workers {
            let worker = self.clone();
            let rx = rx.clone();
            set.spawn(async move {
                let mut local = CycleReport::default();
                loop {
                    let next = rx.lock().await.recv().await;
                    match next {
                        Some(feed) => local.record(worker.refresh_feed(feed).await),
                        None => break,
                    }
                }
                local
            });
        }

        for feed in feeds {
            if tx.send(feed).await.is_err() {
                break;
            }
        }
        drop(tx);

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(local) => report.merge(local),
                Err(e) => error!(error = %e, "refresh worker panicked"),
            }
        }

        Ok(report)
    }

    /// Fetch, normalize and merge one feed, then record its health.
    async fn refresh_feed(&self, feed: Feed) -> FeedOutcome {
        let timeout = self.settings.fetch_timeout;
        let fetched = match tokio::time::timeout(timeout, self.source.fetch(&feed.feed_link, timeout))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SemaphoreError::Timeout(format!(
                "fetch exceeded {} ms",
                timeout.as_millis()
            ))),
        };

        let ingested = match fetched {
            Ok(parsed) => ItemService::new(&self.db)
                .ingest(
                    feed.id,
                    &parsed,
                    self.settings.max_items_per_feed,
                    self.settings.statement_timeout,
                )
                .await
                .map(|report| (FeedContent::from_parsed(&parsed), report)),
            Err(e) => Err(e),
        };

        let tracker = FeedHealthTracker::new(self.db.pool());
        let limit = self.settings.statement_timeout;
        match ingested {
            Ok((content, report)) => {
                let written =
                    with_timeout(limit, "feed success", tracker.record_success(&feed, &content))
                        .await;
                match written {
                    Ok(_) => {
                        debug!(
                            feed_id = feed.id,
                            inserted = report.inserted,
                            updated = report.updated,
                            "refreshed feed"
                        );
                        FeedOutcome::Refreshed(report)
                    }
                    Err(e) => self.transition_error(&feed, e),
                }
            }
            Err(reason) => {
                warn!(
                    feed_id = feed.id,
                    feed_link = %feed.feed_link,
                    error = %reason,
                    "feed refresh failed"
                );
                let written = with_timeout(
                    limit,
                    "feed failure",
                    tracker.record_failure(&feed, &reason.to_string()),
                )
                .await;
                match written {
                    Ok(_) => FeedOutcome::Failed,
                    Err(e) => self.transition_error(&feed, e),
                }
            }
        }
    }

    fn transition_error(&self, feed: &Feed, e: SemaphoreError) -> FeedOutcome {
        match e {
            SemaphoreError::EditConflict => {
                warn!(
                    feed_id = feed.id,
                    version = feed.version,
                    "feed changed concurrently, skipping until next cycle"
                );
                FeedOutcome::Conflict
            }
            e => {
                error!(feed_id = feed.id, error = %e, "failed to record feed health");
                FeedOutcome::Error
            }
        }
    }
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
