use anyhow::Result;
use dotenvy::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use medminder::core::SchedulerConfig;
use medminder::scheduler::ReminderService;
use medminder::storage::{CoordinatedStore, SqliteKeyValueStore};
use medminder::triggers::LocalTriggerBackend;

/// How often the daemon re-runs the recovery pass
const RECONCILE_INTERVAL_SECS: u64 = 15 * 60;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let db_path =
        std::env::var("MEDMINDER_DB").unwrap_or_else(|_| "medminder.sqlite".to_string());
    let config = SchedulerConfig::from_env();
    info!("Starting medminderd with store {}", db_path);

    let store = Arc::new(CoordinatedStore::new(Arc::new(SqliteKeyValueStore::open(
        &db_path,
    )?)));
    let (backend, mut fired_events) = LocalTriggerBackend::new();
    let service = Arc::new(ReminderService::start(store, backend, config).await?);

    // Periodic recovery sweep: picks up triggers a failed backend call
    // left unregistered and ages out overdue records.
    let sweeper = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(RECONCILE_INTERVAL_SECS));
            ticker.tick().await; // immediate first tick; startup already reconciled
            loop {
                ticker.tick().await;
                match service.reconcile().await {
                    Ok(report) => {
                        if !report.pruned.is_empty() || !report.repaired.is_empty() {
                            info!(
                                "Periodic recovery: {} pruned, {} repaired",
                                report.pruned.len(),
                                report.repaired.len()
                            );
                        }
                    }
                    Err(err) => warn!("Periodic recovery failed: {}", err),
                }
            }
        })
    };

    info!("medminderd ready");
    loop {
        tokio::select! {
            event = fired_events.recv() => {
                match event {
                    Some(fired) => {
                        if let Err(err) = service.handle_fired(fired).await {
                            error!("Failed to handle fired trigger: {}", err);
                        }
                    }
                    None => {
                        warn!("Trigger event channel closed, shutting down");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received ctrl-c, shutting down");
                break;
            }
        }
    }

    sweeper.abort();
    Ok(())
}
