mod alert;
mod cli;
mod config;
mod error;
mod output;

use crate::{
    alert::TerminalAlertSink,
    cli::{Args, Commands, OutputFormat},
    config::AppConfig,
    error::{CliError, Result},
    output::OutputManager,
};
use clap::Parser;
use notify_sync::{
    AlertSink, ChannelState, NoopAlertSink, NotificationService, PageQuery, StoreEvent,
};
use std::{io::IsTerminal, path::Path, process, sync::Arc};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let output = OutputManager::new(args.output, std::io::stdout().is_terminal());

    if let Err(e) = run(args, &output).await {
        error!("Application error: {}", e);
        eprintln!("{}", output.format_error(&e.to_string()));
        process::exit(1);
    }
}

async fn run(args: Args, output: &OutputManager) -> Result<()> {
    init_logging(args.verbose, args.quiet, args.log_json)?;

    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_args(&args);
    config.sync.validate()?;

    if matches!(args.command, Commands::Config) {
        return show_config(&config, args.config.as_deref(), args.output);
    }

    let token = config.token()?.to_string();
    let alerts: Arc<dyn AlertSink> = match &args.command {
        Commands::Watch { no_bell } => Arc::new(TerminalAlertSink::new(!no_bell)),
        _ => Arc::new(NoopAlertSink),
    };
    let service = NotificationService::with_rest(config.sync.clone(), alerts)?;

    let result = match args.command {
        Commands::Watch { .. } => watch(&service, &token, output).await,
        command => {
            service.set_token(token)?;
            one_shot(&service, command, output).await
        }
    };
    service.dispose();
    result
}

async fn one_shot(service: &NotificationService, command: Commands, output: &OutputManager) -> Result<()> {
    let text = match command {
        Commands::List {
            page,
            limit,
            filter,
        } => {
            let mut query = PageQuery {
                filter: filter.into(),
                ..service.page_query(page)
            };
            if let Some(limit) = limit {
                query.limit = limit;
            }
            let pagination = service.fetch_page(query).await?;
            output.format_page(&service.snapshot().notifications, &pagination)?
        }
        Commands::Count => output.format_count(service.refresh_unread_count().await?)?,
        Commands::Show { id } => output.format_notification(&service.get_notification(&id).await?)?,
        Commands::Read { id } => {
            service.mark_read(&id).await?;
            refreshed_done(service, output, "Marked read").await?
        }
        Commands::ReadAll => {
            service.mark_all_read().await?;
            output.format_done("Marked all read", service.unread_count())?
        }
        Commands::Delete { id } => {
            service.delete(&id).await?;
            refreshed_done(service, output, "Deleted").await?
        }
        Commands::DeleteRead => {
            let deleted = service.delete_read().await?;
            refreshed_done(service, output, &format!("Deleted {deleted} read notifications")).await?
        }
        Commands::Test => match service.create_test_notification().await? {
            Some(notification) => output.format_notification(&notification)?,
            None => output.format_done("Test notification requested", service.unread_count())?,
        },
        Commands::Watch { .. } | Commands::Config => return Ok(()),
    };
    println!("{text}");
    Ok(())
}

/// One-shot commands start from an empty store, so the count comes from the
/// server when the action response did not carry one.
async fn refreshed_done(
    service: &NotificationService,
    output: &OutputManager,
    action: &str,
) -> Result<String> {
    let count = service.refresh_unread_count().await?;
    output.format_done(action, count)
}

async fn watch(service: &NotificationService, token: &str, output: &OutputManager) -> Result<()> {
    let mut events = service.subscribe();
    service.connect(token)?;

    match service.fetch_page(service.page_query(1)).await {
        Ok(pagination) => print!(
            "{}",
            output.format_page(&service.snapshot().notifications, &pagination)?
        ),
        Err(e) => warn!(error = %e, "Initial fetch failed, waiting for push events"),
    }
    if let Err(e) = service.refresh_unread_count().await {
        warn!(error = %e, "Failed to fetch unread count");
    }

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing notification channel");
                return Ok(());
            }
            event = events.recv() => event,
        };

        match event {
            Ok(StoreEvent::NewNotification(notification)) => {
                println!("{}", output.format_notification(&notification)?);
            }
            Ok(StoreEvent::ChannelStateChanged(state)) => {
                info!(?state, "Channel state");
                if state == ChannelState::Disconnected {
                    warn!("Notification channel is down; restart to reconnect");
                    return Ok(());
                }
            }
            Ok(StoreEvent::ChannelRejected { reason }) => return Err(CliError::Rejected(reason)),
            Ok(StoreEvent::Changed(snapshot)) => {
                debug!(unread = snapshot.unread_count, "Store changed");
            }
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "Output lagged behind store events"),
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

fn show_config(config: &AppConfig, path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let mut shown = config.clone();
    if shown.token.is_some() {
        shown.token = Some("********".to_string());
    }
    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&shown)?,
        OutputFormat::Pretty => {
            let mut text = format!(
                "config file: {}\n",
                path.map(Path::to_path_buf)
                    .or_else(AppConfig::default_path)
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            text.push_str(&serde_json::to_string_pretty(&shown)?);
            text
        }
    };
    println!("{text}");
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool, json: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("notify_sync=debug,notify=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("notify_sync=info,notify=info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(verbose)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    result.map_err(|e| CliError::Logging(e.to_string()))
}
