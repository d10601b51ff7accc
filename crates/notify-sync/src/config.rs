//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::channel::ChannelConfig;
use crate::error::{Result, SyncError};

/// Settings for a [`crate::NotificationService`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Push server base URL
    pub server_url: String,
    /// REST API base URL
    pub api_base_url: String,
    /// Automatic reconnect attempts after a failure
    pub reconnect_attempts: u32,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay_ms: u64,
    /// Delay after (re)connecting before asking for the unread count
    pub count_refresh_delay_ms: u64,
    /// Upper bound for the channel handshake
    pub handshake_timeout_ms: u64,
    /// REST request timeout
    pub request_timeout_secs: u64,
    /// Default page size for list fetches
    pub page_size: u32,
    /// Capacity of the channel and store event streams
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:5000".to_string(),
            api_base_url: "http://localhost:5000/api".to_string(),
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            count_refresh_delay_ms: 1000,
            handshake_timeout_ms: 10_000,
            request_timeout_secs: 30,
            page_size: 20,
            event_buffer: 256,
        }
    }
}

impl SyncConfig {
    /// Check values that would otherwise fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        self.server_url()?;
        self.api_base_url()?;
        if self.page_size == 0 {
            return Err(SyncError::other("page_size must be greater than zero"));
        }
        if self.event_buffer == 0 {
            return Err(SyncError::other("event_buffer must be greater than zero"));
        }
        Ok(())
    }

    pub fn server_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.server_url)?)
    }

    pub fn api_base_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.api_base_url)?)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn count_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.count_refresh_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Transport settings for the push channel.
    pub fn channel_config(&self) -> Result<ChannelConfig> {
        Ok(ChannelConfig {
            reconnect_attempts: self.reconnect_attempts,
            reconnect_delay: self.reconnect_delay(),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            event_buffer: self.event_buffer,
            ..ChannelConfig::new(self.server_url()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        config.validate().unwrap();
        assert_eq!(config.reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.count_refresh_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"server_url":"https://school.example.org","page_size":50}"#)
                .unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.reconnect_attempts, 5);
        let channel = config.channel_config().unwrap();
        assert_eq!(channel.server_url.host_str(), Some("school.example.org"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_url = SyncConfig {
            server_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(bad_url.validate().is_err());

        let zero_page = SyncConfig {
            page_size: 0,
            ..Default::default()
        };
        assert!(zero_page.validate().is_err());
    }
}
