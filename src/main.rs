//! CareLink Console - live dashboard client
//!
//! This is the main entry point for the console binary. The console
//! connects to the CareLink server's live event channel, keeps the
//! dashboard views synchronized, and recovers from connection loss on its
//! own.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use carelink_console::cli::{Cli, Commands, ConfigSubcommand};
use carelink_console::config::{self, ConsoleConfig};
use carelink_console::connection::{BaseEndpoint, ConnectionState, LiveClient, StateChange};
use carelink_console::error::{Error, Result};
use carelink_console::logging::{self, LogGuards};
use carelink_console::version;
use carelink_console::views::{AnalyticsPanel, CallLog, ConnectionBanner, TicketBoard};

fn main() -> Result<()> {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    // For commands that don't need full logging, use simple setup
    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            // Config commands use minimal logging
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand.clone());
        }
        _ => {}
    }

    // Load configuration for the run command
    let (config_path, server_override) = match &cli.command {
        Commands::Run { config, server } => (config.clone(), server.clone()),
        _ => (None, None),
    };

    // Load config (or use defaults)
    let config = match load_run_config(config_path.as_deref(), server_override) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Use formatted error for terminal
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };

    // Initialize logging with config settings
    // The guards must be kept alive for the lifetime of the program
    let _log_guards = init_logging_from_config(&config, cli.verbose, cli.quiet)?;

    // Log version info at startup
    let build = version::build_info();
    info!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting CareLink Console"
    );

    run_console(config)
}

/// Load the run configuration, applying the CLI server override
fn load_run_config(config_path: Option<&str>, server: Option<String>) -> Result<ConsoleConfig> {
    let mut config = ConsoleConfig::load(config_path)?;
    if let Some(url) = server {
        config.server.url = url;
        config.validate()?;
    }
    Ok(config)
}

/// Initialize logging from configuration
fn init_logging_from_config(config: &ConsoleConfig, verbose: u8, quiet: bool) -> Result<LogGuards> {
    logging::init_logging(&config.logging, verbose, quiet)
}

/// Run the console in normal operation mode
fn run_console(config: ConsoleConfig) -> Result<()> {
    info!(
        console = %config.console_name(),
        server_url = %config.server.url,
        events_path = %config.server.events_path,
        "Configuration loaded"
    );

    // Build and run the tokio runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("carelink-console")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    runtime.block_on(async_console_main(config))
}

/// Async console main loop
async fn async_console_main(config: ConsoleConfig) -> Result<()> {
    // The manager and its collaborators are constructed here and passed
    // by reference; nothing lives in module-level state.
    let resolver = Arc::new(BaseEndpoint::new(&config.server.url)?);
    let client = LiveClient::new(config.server.client_config(), resolver);

    let banner = ConnectionBanner::new();
    banner.attach(&client);

    let analytics = AnalyticsPanel::new();
    if config.views.analytics {
        analytics.attach(&client);
    }

    let calls = CallLog::new(config.views.recent_call_limit);
    if config.views.calls {
        calls.attach(&client);
    }

    let tickets = TicketBoard::new();
    if config.views.tickets {
        tickets.attach(&client);
    }

    // Forward state transitions into the main loop
    let (state_tx, mut state_rx) = mpsc::channel::<StateChange>(64);
    client.add_state_listener(move |change| {
        let _ = state_tx.try_send(change.clone());
    });

    info!(
        analytics = config.views.analytics,
        calls = config.views.calls,
        tickets = config.views.tickets,
        "Dashboard views attached"
    );

    // First attempt; later recovery is the manager's job
    if let Err(e) = client.connect(&config.server.events_path).await {
        warn!(
            error = %e,
            "Initial connection failed; reconnecting in the background"
        );
    }

    // Set up graceful shutdown on Ctrl+C
    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    // Periodic dashboard summary
    let mut summary_timer = tokio::time::interval(Duration::from_secs(60));
    summary_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("Console event loop started");

    // Main event loop
    loop {
        tokio::select! {
            // Ctrl+C shutdown
            _ = &mut shutdown_signal => {
                info!("Shutdown signal received");
                client.disconnect().await;
                break;
            }

            // Connection state transitions
            change = state_rx.recv() => {
                match change {
                    Some(change) => {
                        match change.state {
                            ConnectionState::Connected => {
                                info!("Connected to live event channel");
                            }
                            ConnectionState::Connecting => {
                                debug!(attempt = change.attempt, "Connecting");
                            }
                            ConnectionState::Disconnected => {
                                warn!(reason = ?change.reason, "Disconnected from server");
                            }
                            ConnectionState::Error => {
                                warn!(reason = ?change.reason, "Connection error");
                            }
                            ConnectionState::Exhausted => {
                                error!(
                                    attempts = change.attempt,
                                    "Gave up reconnecting; exiting"
                                );
                                return Err(Error::ReconnectExhausted {
                                    attempts: change.attempt,
                                });
                            }
                        }
                    }
                    None => {
                        info!("State channel closed");
                        break;
                    }
                }
            }

            // Periodic dashboard summary
            _ = summary_timer.tick() => {
                let snapshot = analytics.snapshot();
                info!(
                    status = banner.current().label(),
                    total_calls = snapshot.total_calls,
                    active_calls = snapshot.active_calls,
                    recent_calls = calls.len(),
                    open_tickets = tickets.open_count(),
                    "Dashboard summary"
                );
            }
        }
    }

    info!("Console shut down");
    Ok(())
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = ConsoleConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            config::init_config(path.as_deref(), force)?;
        }
        ConfigSubcommand::Validate { config } => {
            let path = config.as_deref();
            match ConsoleConfig::load(path) {
                Ok(_) => {
                    println!("Configuration is valid.");
                }
                Err(e) => {
                    eprint!("{}", e.format_for_terminal());
                    std::process::exit(e.exit_code());
                }
            }
        }
    }

    Ok(())
}
