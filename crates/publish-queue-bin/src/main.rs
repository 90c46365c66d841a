//! pubq - durable store-and-forward publish queue driver.

mod app;
mod config;
mod logging;
mod paths;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use publish_queue_core::PublishFlags;

use crate::app::RunOptions;
use crate::config::Config;
use crate::logging::init_logging;
use crate::paths::Paths;

/// pubq command-line interface.
#[derive(Parser)]
#[command(name = "pubq")]
#[command(about = "Durable store-and-forward publish queue")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for the queue database, config and logs. Defaults to ~/.pubq
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Config file. Defaults to <base-dir>/config.json
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Drain the queue to the cloud, publishing a counter event periodically
    Run {
        /// Counter publish period in milliseconds (0 disables the counter)
        #[arg(long, default_value_t = 15_000)]
        period_ms: u64,
        /// Publish the counter with WITH_ACK
        #[arg(long)]
        with_ack: bool,
        /// Cloud endpoint base URL
        #[arg(long, env = "PUBQ_ENDPOINT")]
        endpoint: Option<String>,
        /// Bearer token for the cloud endpoint
        #[arg(long, env = "PUBQ_AUTH_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Seconds between connectivity probes
        #[arg(long, default_value_t = 5)]
        probe_secs: u64,
    },
    /// Queue one event without publishing
    Enqueue {
        /// Event name
        name: String,
        /// Event data
        #[arg(default_value = "")]
        data: String,
        /// Require a cloud acknowledgement
        #[arg(long)]
        with_ack: bool,
        /// Ask the cloud not to acknowledge
        #[arg(long)]
        no_ack: bool,
    },
    /// Queue padded counter events as fast as possible
    Burst {
        /// Number of events
        #[arg(long, default_value_t = 10)]
        count: u32,
        /// Pad each payload to this many bytes
        #[arg(long, default_value_t = 0)]
        size: usize,
    },
    /// Show queue status
    Status,
    /// Erase every queued event
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths, cli.config.as_deref())?;

    let level = cli.log_level.unwrap_or_else(|| config.log_level.clone());
    init_logging(&level, Some(&paths.log_file()));

    match cli.command.unwrap_or(Commands::Run {
        period_ms: 15_000,
        with_ack: false,
        endpoint: None,
        token: None,
        probe_secs: 5,
    }) {
        Commands::Run {
            period_ms,
            with_ack,
            endpoint,
            token,
            probe_secs,
        } => {
            if let Some(endpoint) = endpoint {
                config.cloud.endpoint = endpoint;
            }
            if token.is_some() {
                config.cloud.auth_token = token;
            }
            let opts = RunOptions {
                period_ms,
                with_ack,
                probe_secs,
            };
            app::run(config, paths, opts).await?;
        }
        Commands::Enqueue {
            name,
            data,
            with_ack,
            no_ack,
        } => {
            let mut flags = PublishFlags::NONE;
            if with_ack {
                flags |= PublishFlags::WITH_ACK;
            }
            if no_ack {
                flags |= PublishFlags::NO_ACK;
            }
            app::enqueue(&config, &paths, &name, &data, flags)?;
        }
        Commands::Burst { count, size } => {
            app::burst(&config, &paths, count, size)?;
        }
        Commands::Status => {
            app::status(&config, &paths)?;
        }
        Commands::Clear => {
            app::clear(&config, &paths)?;
        }
    }

    Ok(())
}
