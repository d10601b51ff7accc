//! Best-effort user alerts for newly delivered notifications.
//!
//! Alerts never feed back into the store: every failure is logged and dropped.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::Notification;

/// Whether the platform lets us show persistent alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertPermission {
    Granted,
    Denied,
    /// Not asked yet
    #[default]
    Prompt,
}

/// Sink for the audible cue and the platform alert.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Play a short sound.
    async fn play_sound(&self) -> Result<()>;

    /// Current permission for persistent alerts.
    fn permission(&self) -> AlertPermission {
        AlertPermission::Denied
    }

    /// Ask the user for permission. Only called while the permission is `Prompt`.
    async fn request_permission(&self) -> AlertPermission {
        AlertPermission::Denied
    }

    /// Show a persistent alert. `urgent` notifications should stay on screen
    /// until dismissed (see [`crate::Priority::requires_interaction`]).
    async fn show_alert(&self, notification: &Notification) -> Result<()>;
}

/// Sink that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAlertSink;

#[async_trait]
impl AlertSink for NoopAlertSink {
    async fn play_sound(&self) -> Result<()> {
        Ok(())
    }

    async fn show_alert(&self, _notification: &Notification) -> Result<()> {
        Ok(())
    }
}

/// Sink that reports alerts through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn play_sound(&self) -> Result<()> {
        debug!("Notification sound");
        Ok(())
    }

    fn permission(&self) -> AlertPermission {
        AlertPermission::Granted
    }

    async fn show_alert(&self, notification: &Notification) -> Result<()> {
        info!(
            id = %notification.id,
            priority = ?notification.priority,
            sticky = notification.priority.requires_interaction(),
            "{}: {}",
            notification.title,
            notification.message
        );
        Ok(())
    }
}

/// Run the sound cue and platform alert for `notification` in the background.
pub fn dispatch_alerts(sink: Arc<dyn AlertSink>, notification: Notification) {
    tokio::spawn(async move {
        if let Err(e) = sink.play_sound().await {
            warn!(error = %e, "Failed to play notification sound");
        }

        let permission = match sink.permission() {
            AlertPermission::Prompt => sink.request_permission().await,
            other => other,
        };
        if permission != AlertPermission::Granted {
            debug!(?permission, "Persistent alerts not permitted");
            return;
        }

        if let Err(e) = sink.show_alert(&notification).await {
            warn!(id = %notification.id, error = %e, "Failed to show notification alert");
        }
    });
}
