use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::sampler::Sample;
use crate::config::ServerConfig;
use crate::notifications::models::NotificationPayload;
use crate::notifications::service::NotificationService;

/// Turns a WARNING sample into a log line and, when enabled, a push broadcast.
pub struct WarningDetector {
    notifier: Arc<NotificationService>,
    notifications_enabled: bool,
    alert_title: String,
}

impl WarningDetector {
    pub fn new(
        notifier: Arc<NotificationService>,
        notifications_enabled: bool,
        alert_title: impl Into<String>,
    ) -> Self {
        Self {
            notifier,
            notifications_enabled,
            alert_title: alert_title.into(),
        }
    }

    pub fn from_config(config: &ServerConfig, notifier: Arc<NotificationService>) -> Self {
        Self::new(
            notifier,
            config.notifications.enable_notifications,
            config.notifications.alert_title.clone(),
        )
    }

    /// Returns true when the sample crossed its threshold. Notification
    /// failures are logged and never reach the caller.
    pub async fn evaluate(&self, sample: &Sample) -> bool {
        if sample.percent_used() < f64::from(sample.threshold_percent) {
            return false;
        }

        let payload = NotificationPayload {
            title: self.alert_title.clone(),
            body: format!(
                "Disk usage on '{}' is at {:.2}%.",
                sample.path,
                sample.percent_used()
            ),
        };
        warn!(
            path = %sample.path,
            percent = sample.percent_used(),
            "Disk usage WARNING: {}",
            payload.body
        );

        if !self.notifications_enabled {
            debug!("Notifications are disabled. Skipping push broadcast.");
            return true;
        }

        match self.notifier.broadcast(&payload).await {
            Ok(report) => {
                info!(
                    delivered = report.delivered,
                    attempted = report.attempted,
                    "Disk warning notification sent."
                );
            }
            Err(e) => {
                error!(error = %e, details = ?e, "Failed to send disk warning notification.");
            }
        }
        true
    }
}
