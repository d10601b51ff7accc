use clap::{Parser, Subcommand, ValueEnum};
use notify_sync::NotificationFilter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "notify",
    version,
    about = "Watch and manage real-time notifications from the command line"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to <config dir>/notify/config.toml)
    #[arg(short, long, global = true, env = "NOTIFY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Push server base URL
    #[arg(long, global = true, env = "NOTIFY_SERVER_URL")]
    pub server_url: Option<String>,

    /// REST API base URL
    #[arg(long, global = true, env = "NOTIFY_API_URL")]
    pub api_url: Option<String>,

    /// Bearer token for the current user
    #[arg(long, global = true, env = "NOTIFY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "pretty")]
    pub output: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stay connected and print notifications as they arrive
    Watch {
        /// Do not ring the terminal bell for new notifications
        #[arg(long)]
        no_bell: bool,
    },

    /// List one page of notifications
    List {
        #[arg(short, long, default_value_t = 1)]
        page: u32,

        /// Page size (defaults to the configured page size)
        #[arg(short, long)]
        limit: Option<u32>,

        #[arg(short, long, value_enum, default_value = "all")]
        filter: FilterArg,
    },

    /// Print the unread count
    Count,

    /// Show a single notification
    Show { id: String },

    /// Mark a notification read
    Read { id: String },

    /// Mark every notification read
    ReadAll,

    /// Delete a notification
    Delete { id: String },

    /// Delete every read notification
    DeleteRead,

    /// Ask the server for a test notification
    Test,

    /// Print the effective configuration
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text
    Pretty,
    /// One JSON document per result
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterArg {
    All,
    Unread,
    Read,
}

impl From<FilterArg> for NotificationFilter {
    fn from(value: FilterArg) -> Self {
        match value {
            FilterArg::All => NotificationFilter::All,
            FilterArg::Unread => NotificationFilter::Unread,
            FilterArg::Read => NotificationFilter::Read,
        }
    }
}
