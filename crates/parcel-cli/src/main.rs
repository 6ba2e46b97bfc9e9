//! Parcel CLI
//!
//! Command-line interface for Parcel - delivery tracking with offline address sync.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parcel_core::{App, StorageError};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "parcel")]
#[command(about = "Parcel - delivery tracking with offline address sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use a specific config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a parcel
    #[command(alias = "add")]
    Track {
        /// Carrier tracking number
        tracking_number: String,
    },
    /// List all deliveries
    #[command(alias = "ls")]
    List,
    /// Show delivery details and history
    Show {
        /// Delivery ID (full ID or prefix)
        id: String,
    },
    /// Move a delivery to its next status
    Advance {
        /// Delivery ID (full ID or prefix)
        id: String,
    },
    /// Cancel a delivery
    Cancel {
        /// Delivery ID (full ID or prefix)
        id: String,
    },
    /// Set the delivery address
    Address {
        /// Delivery ID (full ID or prefix)
        id: String,
        /// Address to deliver to
        address: String,
    },
    /// Rate a completed delivery
    Review {
        /// Delivery ID (full ID or prefix)
        id: String,
        /// Stars, 1 to 5
        #[arg(value_parser = clap::value_parser!(u8).range(1..=5))]
        rating: u8,
        /// Optional review text
        text: Option<String>,
    },
    /// Send queued addresses now
    Sync,
    /// Show network and sync status
    Status,
    /// List addresses waiting to be sent
    Queue,
    /// Follow deliveries and sync in the background until Ctrl-C
    Watch {
        /// Seconds between simulated delivery stages
        #[arg(long, default_value_t = 30)]
        stage_secs: u64,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, api_url, sync.enabled, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands don't need the database
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), &output);
    }

    let config = commands::config::load(cli.config.as_ref())?;
    let app = App::open(config).await?;

    // Inspection commands report the queue as it is
    let is_inspection = matches!(
        &cli.command,
        Commands::Sync | Commands::Status | Commands::Queue | Commands::Watch { .. }
    );
    if !is_inspection {
        commands::sync::auto_sync(&app, &output).await;
    }

    let result = match cli.command {
        Commands::Track { tracking_number } => {
            commands::delivery::track(&app, tracking_number, &output)
        }
        Commands::List => commands::delivery::list(&app, &output),
        Commands::Show { id } => commands::delivery::show(&app, id, &output),
        Commands::Advance { id } => commands::delivery::advance(&app, id, &output).await,
        Commands::Cancel { id } => commands::delivery::cancel(&app, id, &output).await,
        Commands::Address { id, address } => {
            commands::delivery::address(&app, id, address, &output).await
        }
        Commands::Review { id, rating, text } => {
            commands::delivery::review(&app, id, rating, text, &output)
        }
        Commands::Sync => commands::sync::sync(&app, &output).await,
        Commands::Status => commands::status::show(&app, &output).await,
        Commands::Queue => commands::sync::queue(&app, &output),
        Commands::Watch { stage_secs } => {
            commands::watch::watch(&app, Duration::from_secs(stage_secs), &output).await
        }
        Commands::Config { .. } => unreachable!(), // Handled above
    };

    if let Err(e) = &result {
        if let Some(hint) = e
            .downcast_ref::<StorageError>()
            .and_then(StorageError::recovery_suggestion)
        {
            eprintln!("hint: {}", hint);
        }
    }
    result
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Log to stderr, filtered by PARCEL_LOG (default: warnings only)
fn init_logging() {
    let env_filter = EnvFilter::try_from_env("PARCEL_LOG")
        .unwrap_or_else(|_| EnvFilter::new("parcel_core=warn,parcel_cli=warn"));

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_review() {
        let cli = Cli::try_parse_from(["parcel", "review", "abc", "5", "Fast"]).unwrap();
        match cli.command {
            Commands::Review { id, rating, text } => {
                assert_eq!(id, "abc");
                assert_eq!(rating, 5);
                assert_eq!(text.as_deref(), Some("Fast"));
            }
            _ => panic!("expected review"),
        }
        assert!(Cli::try_parse_from(["parcel", "review", "abc", "6"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["parcel", "sync", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Sync));
    }

    #[test]
    fn test_watch_default_stage() {
        let cli = Cli::try_parse_from(["parcel", "watch"]).unwrap();
        assert!(matches!(cli.command, Commands::Watch { stage_secs: 30 }));
    }
}
