//! Config file loading.
//!
//! ```toml
//! token = "..."            # optional, NOTIFY_TOKEN / --token win
//! server_url = "https://school.example.org"
//! api_base_url = "https://school.example.org/api"
//! reconnect_attempts = 5
//! ```

use notify_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cli::Args;
use crate::error::{CliError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub token: Option<String>,
    #[serde(flatten)]
    pub sync: SyncConfig,
}

impl AppConfig {
    /// `<config dir>/notify/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("notify").join("config.toml"))
    }

    /// Load `path`, or the default location when `path` is `None`. A missing
    /// default file yields the built-in defaults; a missing explicit file is an
    /// error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config = Self::parse(&content).map_err(|source| CliError::ConfigParse {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Command line flags and `NOTIFY_*` variables override the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(url) = &args.server_url {
            self.sync.server_url = url.clone();
        }
        if let Some(url) = &args.api_url {
            self.sync.api_base_url = url.clone();
        }
        if let Some(token) = &args.token {
            self.token = Some(token.clone());
        }
    }

    pub fn token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(CliError::MissingToken)
    }
}
