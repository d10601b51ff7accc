use async_trait::async_trait;
use notify_sync::{AlertPermission, AlertSink, Notification, Result};
use std::io::Write;

/// Rings the terminal bell for new notifications.
///
/// The watch loop already prints every arrival, so the platform alert only
/// adds a second bell for notifications that need interaction.
pub struct TerminalAlertSink {
    bell: bool,
}

impl TerminalAlertSink {
    pub fn new(bell: bool) -> Self {
        Self { bell }
    }

    fn ring(&self) -> Result<()> {
        if !self.bell {
            return Ok(());
        }
        let mut stderr = std::io::stderr();
        stderr
            .write_all(b"\x07")
            .and_then(|_| stderr.flush())
            .map_err(|e| notify_sync::SyncError::other(format!("terminal bell: {e}")))
    }
}

#[async_trait]
impl AlertSink for TerminalAlertSink {
    async fn play_sound(&self) -> Result<()> {
        self.ring()
    }

    fn permission(&self) -> AlertPermission {
        if self.bell {
            AlertPermission::Granted
        } else {
            AlertPermission::Denied
        }
    }

    async fn show_alert(&self, notification: &Notification) -> Result<()> {
        if notification.priority.requires_interaction() {
            self.ring()?;
        }
        Ok(())
    }
}
