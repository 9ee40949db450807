use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use semaphore::feed::HttpFeedSource;
use semaphore::refresh::{
    BatchJobLock, FollowerCountJob, ItemCleanupJob, RefreshScheduler, RefreshSettings,
};
use semaphore::{Config, Database};

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = semaphore::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        semaphore::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    info!("Semaphore feed service starting");

    let db = match Database::open(&config.database.path, config.database.max_connections).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {e}");
            return ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let lock = BatchJobLock::new();
    let mut tasks = Vec::new();

    if config.refresher.enabled {
        let source = match HttpFeedSource::new(&config.refresher) {
            Ok(source) => source,
            Err(e) => {
                error!("Failed to create feed source: {e}");
                return ExitCode::FAILURE;
            }
        };
        let scheduler = RefreshScheduler::new(
            db.clone(),
            Arc::new(source),
            lock.clone(),
            RefreshSettings::from_config(&config),
        );
        tasks.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));
    } else {
        warn!("Feed refresher is disabled");
    }

    let recount = FollowerCountJob::new(
        db.clone(),
        lock.clone(),
        config.cleanup.follower_recount_period(),
    );
    tasks.push(tokio::spawn(recount.run(shutdown_rx.clone())));

    let cleanup = ItemCleanupJob::new(
        db.clone(),
        config.cleanup.items_cleanup_period(),
        config.cleanup.items_max_age(),
    );
    tasks.push(tokio::spawn(cleanup.run(shutdown_rx)));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutting down");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            error!("Background task failed: {e}");
        }
    }

    db.pool().close().await;
    info!("Semaphore stopped");
    ExitCode::SUCCESS
}
