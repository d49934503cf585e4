//! rds-channel - replicate one Redis store into another under a key prefix.
//!
//! ```text
//! rds-channel <source-host> [source-port=6379] [dest-host=127.0.0.1] [dest-port=6379] [prefix=""]
//! ```
//!
//! `--version` prints the bare version. Exits 0 after a clean shutdown
//! (Ctrl-C), 1 on any setup or run failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rds_channel::config::{DEFAULT_DESTINATION_HOST, DEFAULT_PORT};
use rds_channel::{Address, Channel, ChannelConfig, RedisSessionFactory};

/// Replicate every key of a source Redis into a destination Redis.
#[derive(Parser, Debug)]
#[command(name = "rds-channel")]
#[command(author, about, long_about = None, disable_version_flag = true)]
struct Cli {
    /// Source host
    #[arg(required_unless_present_any = ["config", "version"])]
    source_host: Option<String>,

    /// Source port (1-65535) [default: 6379]
    source_port: Option<String>,

    /// Destination host [default: 127.0.0.1]
    dest_host: Option<String>,

    /// Destination port (1-65535) [default: 6379]
    dest_port: Option<String>,

    /// Prefix prepended to every destination key [default: ""]
    prefix: Option<String>,

    /// JSON config file; positional arguments and flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Heartbeat interval; the watchdog fires after twice this [default: 10s]
    #[arg(long)]
    heartbeat_interval: Option<String>,

    /// SCAN COUNT hint for the initial snapshot [default: 10]
    #[arg(long)]
    scan_count: Option<usize>,

    /// Value for notify-keyspace-events on the source [default: EA]
    #[arg(long)]
    notify_flags: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the version and exit
    #[arg(short = 'V', long)]
    version: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help is not a failure
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    if cli.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match build_config(cli) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    println!("from: {}", config.source);
    println!("  to: {}", config.destination);
    println!("pref: {}", config.prefix);

    let factory = RedisSessionFactory::new(config.session.connect_timeout_duration());
    let mut channel = Channel::new(config, factory);

    let trigger = channel.shutdown_trigger();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            trigger.trigger();
        }
    });

    match channel.run().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Replication stopped");
            ExitCode::FAILURE
        }
    }
}

fn build_config(cli: Cli) -> Result<ChannelConfig, String> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
            ChannelConfig::from_json(&json).map_err(|e| e.to_string())?
        }
        None => ChannelConfig {
            source: Address::new("", DEFAULT_PORT),
            destination: Address::new(DEFAULT_DESTINATION_HOST, DEFAULT_PORT),
            ..Default::default()
        },
    };

    if let Some(host) = cli.source_host {
        config.source.host = host;
    }
    if let Some(raw) = cli.source_port {
        config.source.port = Address::parse_port(&raw).ok_or("source port out of range")?;
    }
    if let Some(host) = cli.dest_host {
        config.destination.host = host;
    }
    if let Some(raw) = cli.dest_port {
        config.destination.port =
            Address::parse_port(&raw).ok_or("destination port out of range")?;
    }
    if let Some(prefix) = cli.prefix {
        config.prefix = prefix;
    }
    if let Some(interval) = cli.heartbeat_interval {
        config.heartbeat.interval = interval;
    }
    if let Some(count) = cli.scan_count {
        config.snapshot.page_size = count;
    }
    if let Some(flags) = cli.notify_flags {
        config.notifications.flags = flags;
    }

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}
