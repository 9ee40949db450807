//! Background refresh of the feed catalog and its maintenance jobs.

mod jobs;
mod scheduler;

pub use jobs::{BatchJobLock, FollowerCountJob, ItemCleanupJob};
pub use scheduler::{CycleReport, RefreshScheduler, RefreshSettings};
