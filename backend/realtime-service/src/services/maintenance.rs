use super::notification_service::NotificationService;
use super::rate_limit::ListRateLimiter;
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Periodic retention purge for notifications, plus housekeeping of the
/// in-process dedupe and rate-limit maps.
pub fn spawn_notification_cleanup(
    notifications: Arc<NotificationService>,
    limiter: Arc<ListRateLimiter>,
    retention_days: i64,
    every: Duration,
) -> JoinHandle<()> {
    info!(
        retention_days,
        interval_secs = every.as_secs(),
        "notification cleanup scheduled"
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = notifications.cleanup(retention_days).await {
                error!(error = %e, "notification cleanup failed");
                metrics::BACKGROUND_FAILURES_TOTAL
                    .with_label_values(&["notification_cleanup"])
                    .inc();
            }
            limiter.shrink();
        }
    })
}
