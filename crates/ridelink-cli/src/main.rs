//! RideLink CLI
//!
//! Command-line interface for inspecting and driving the RideLink realtime
//! layer: the offline queue, the cache and the live channel.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ridelink_core::Config;

mod commands;
mod output;
mod probe;

use output::{Output, OutputFormat};

/// Environment variable holding the log filter
const LOG_ENV: &str = "RIDELINK_LOG";

#[derive(Parser)]
#[command(name = "ridelink")]
#[command(about = "RideLink - realtime connectivity and offline queue diagnostics")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configuration, pending actions and cached keys
    Status,
    /// Manage the offline action queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Inspect or seed the offline cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Connect to the live channel and print events until Ctrl-C
    Listen {
        /// Rooms to join
        #[arg(short, long)]
        room: Vec<String>,
        /// Inbound events to print (lifecycle events are always printed)
        #[arg(short, long)]
        event: Vec<String>,
        /// Access token (defaults to RIDELINK_TOKEN)
        #[arg(long)]
        token: Option<String>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List pending actions
    #[command(alias = "ls")]
    List,
    /// Queue an action for later delivery
    Add {
        /// Action type, e.g. cancel-ride
        #[arg(long = "type")]
        kind: String,
        /// Endpoint, relative to api_url or absolute
        #[arg(long)]
        endpoint: String,
        /// HTTP method
        #[arg(long, default_value = "POST")]
        method: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },
    /// Deliver pending actions now
    Flush {
        /// Access token (defaults to RIDELINK_TOKEN)
        #[arg(long)]
        token: Option<String>,
    },
    /// Drop every pending action
    Clear,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Print a cached value
    Get {
        key: String,
        /// Read as if offline, returning expired values
        #[arg(long)]
        offline: bool,
    },
    /// Cache a JSON value
    Set {
        key: String,
        /// JSON value
        value: String,
        /// Time to live in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
    },
    /// Remove every cached entry
    Clear,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, server_url, api_url, wire_format, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    match cli.command {
        // Config commands work even when the config file does not load
        Commands::Config { command } => {
            handle_config_command(command, cli.config.as_ref(), &output)
        }
        command => {
            let config = load_config(cli.config.as_ref())?;
            run(command, &config, &output).await
        }
    }
}

async fn run(command: Commands, config: &Config, output: &Output) -> Result<()> {
    match command {
        Commands::Status => commands::status::show(config, output),
        Commands::Queue { command } => handle_queue_command(command, config, output).await,
        Commands::Cache { command } => handle_cache_command(command, config, output),
        Commands::Listen { room, event, token } => {
            commands::listen::run(config, room, event, token, output).await
        }
        Commands::Config { .. } => unreachable!(), // Handled in main
    }
}

/// Log to stderr, filtered by RIDELINK_LOG (default: warnings only)
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")
}

async fn handle_queue_command(command: QueueCommands, config: &Config, output: &Output) -> Result<()> {
    match command {
        QueueCommands::List => commands::queue::list(config, output),
        QueueCommands::Add {
            kind,
            endpoint,
            method,
            body,
        } => commands::queue::add(config, kind, endpoint, method, body, output),
        QueueCommands::Flush { token } => commands::queue::flush(config, token, output).await,
        QueueCommands::Clear => commands::queue::clear(config, output),
    }
}

fn handle_cache_command(command: CacheCommands, config: &Config, output: &Output) -> Result<()> {
    match command {
        CacheCommands::Get { key, offline } => commands::cache::get(config, key, offline, output),
        CacheCommands::Set { key, value, ttl } => commands::cache::set(config, key, value, ttl, output),
        CacheCommands::Clear => commands::cache::clear(config, output),
    }
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
