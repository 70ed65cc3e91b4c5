//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for the CareLink console.

use clap::{Parser, Subcommand};

/// CareLink Console - live dashboard client
///
/// Connects to the CareLink server's live event channel and keeps the
/// call-center dashboard state (analytics, call history, tickets)
/// synchronized, reconnecting automatically when the connection drops.
#[derive(Parser, Debug)]
#[command(name = "carelink-console")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the console
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the console (connects to the server and follows live events)
    Run {
        /// Path to configuration file
        #[arg(short, long, env = "CARELINK_CONFIG")]
        config: Option<String>,

        /// Override the server WebSocket base URL for this run
        #[arg(long)]
        server: Option<String>,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file with defaults
    Init {
        /// Path for the new configuration file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from(["carelink-console", "run", "--config", "/tmp/c.toml"])
            .unwrap();
        match cli.command {
            Commands::Run { config, server } => {
                assert_eq!(config.as_deref(), Some("/tmp/c.toml"));
                assert!(server.is_none());
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_verbosity() {
        let cli = Cli::try_parse_from(["carelink-console", "-vv", "version"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_parse_config_validate() {
        let cli = Cli::try_parse_from(["carelink-console", "config", "validate"]).unwrap();
        match cli.command {
            Commands::Config {
                subcommand: ConfigSubcommand::Validate { config },
            } => assert!(config.is_none()),
            _ => panic!("expected config validate"),
        }
    }
}
