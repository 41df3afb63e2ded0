//! Command-line interface and logging setup

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// tvlink command-line interface
#[derive(Parser, Debug)]
#[command(name = "tvlink-daemon")]
#[command(about = "Pair with and control smart TVs on the local network", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    /// Show timestamps in logs
    #[arg(long, default_value = "true")]
    pub timestamps: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Keep every paired device connected until interrupted
    Run,

    /// Pair with a new TV; the code shown on screen is read from stdin
    Pair {
        /// Display name for the device
        name: String,

        /// IPv4 address of the TV
        ip: String,
    },

    /// List registered devices
    ListDevices {
        /// Show ids, platforms and credential fingerprints
        #[arg(long)]
        verbose: bool,
    },

    /// Forget a device's credentials; `--remove` also drops it from the registry
    Forget {
        /// Device id or name
        device: String,

        #[arg(long)]
        remove: bool,
    },

    /// Send a key press, text or an app link to a paired device
    #[command(group(
        ArgGroup::new("payload")
            .required(true)
            .multiple(true)
            .args(["key", "text", "app_link"])
    ))]
    Send {
        /// Device id or name
        device: String,

        /// Key name, e.g. HOME or VOLUME_UP
        #[arg(short, long)]
        key: Option<String>,

        /// Text to type into the focused field
        #[arg(short, long)]
        text: Option<String>,

        /// Deep link to open, e.g. https://www.youtube.com/watch?v=...
        #[arg(short, long)]
        app_link: Option<String>,

        /// Seconds to wait for the session to become ready
        #[arg(long, default_value = "15")]
        timeout: u64,
    },

    /// Show current configuration
    DumpConfig,
}

/// Initialize logging based on CLI configuration
pub fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    match (cli.json_logs, cli.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    info!(
        "Logging initialized: level={}, json={}, timestamps={}",
        log_level, cli.json_logs, cli.timestamps
    );

    Ok(())
}
