use notify_sync::SyncError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No token given; pass --token or set NOTIFY_TOKEN")]
    MissingToken,

    #[error("Notification channel rejected: {0}")]
    Rejected(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}
