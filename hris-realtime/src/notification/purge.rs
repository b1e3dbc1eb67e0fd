//! Periodic removal of old read notifications

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use hris_common::config::NotificationConfig;

use super::NotificationService;

/// Start the purge task; the first run happens one interval after startup
pub fn spawn_purge_task(
    service: NotificationService,
    config: NotificationConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = config.purge_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(?period, retention_days = config.retention_days, "Notification purge task started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match service.purge_read_older_than(config.retention_days).await {
                Ok(removed) => info!(removed, "Removed old read notifications"),
                Err(e) => error!(error = %e, "Notification purge failed"),
            }
        }

        info!("Notification purge task stopped");
    })
}
