//! shellcached - operator CLI for the shellcache resource cache

mod commands;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shellcache::{CacheConfig, CacheEngine};
use tracing::info;

use crate::commands::CommandHandler;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cache directory (overrides the config file)
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Fresh window in seconds
    #[arg(long, global = true)]
    fresh_secs: Option<u64>,

    /// Stale window in seconds
    #[arg(long, global = true)]
    stale_secs: Option<u64>,

    /// Disk cap in MiB
    #[arg(long, global = true)]
    disk_cap_mb: Option<u64>,

    /// Fraction of system memory for the memory tier
    #[arg(long, global = true)]
    memory_fraction: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a URL through the cache, fetching on a miss
    Get {
        url: String,
        /// Request header, `Name: value`; repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Write the body to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show what the cache holds for a URL without touching the network
    Peek { url: String },
    /// Revalidate a cached URL now
    Revalidate { url: String },
    /// Drop a URL from the cache
    Invalidate { url: String },
    /// List disk entries
    List,
    /// Run one cleanup pass
    Cleanup,
    /// Run cleanup periodically until Ctrl+C
    Watch {
        /// Seconds between passes
        #[arg(short, long, default_value_t = 300)]
        interval: u64,
    },
    /// Delete every entry
    Clear,
}

const DEFAULT_DIR: &str = "./shell-cache";

fn load_config(args: &Args) -> Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str::<CacheConfig>(&raw)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => CacheConfig::new(DEFAULT_DIR),
    };

    if let Some(dir) = &args.dir {
        config.cache_dir = dir.clone();
    }
    if let Some(secs) = args.fresh_secs {
        config = config.with_fresh_window(Duration::from_secs(secs));
    }
    if let Some(secs) = args.stale_secs {
        config = config.with_stale_window(Duration::from_secs(secs));
    }
    if let Some(mb) = args.disk_cap_mb {
        config = config.with_disk_cap_bytes(mb.saturating_mul(1024 * 1024));
    }
    if let Some(fraction) = args.memory_fraction {
        config = config.with_memory_fraction(fraction);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let engine = CacheEngine::new(config).context("failed to open cache")?;
    let handler = CommandHandler::new(engine.clone());

    match args.command {
        Command::Get {
            url,
            headers,
            output,
        } => println!("{}", handler.get(&url, &headers, output.as_deref()).await?),
        Command::Peek { url } => println!("{}", handler.peek(&url)),
        Command::Revalidate { url } => println!("{}", handler.revalidate(&url).await),
        Command::Invalidate { url } => println!("{}", handler.invalidate(&url)),
        Command::List => println!("{}", handler.list()?),
        Command::Cleanup => println!("{}", handler.cleanup()),
        Command::Watch { interval } => {
            info!(
                dir = %engine.config().cache_dir().display(),
                interval_secs = interval,
                "watching cache"
            );
            let task = engine.spawn_cleanup_task(Duration::from_secs(interval.max(1)));
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl+C")?;
            task.abort();
            info!("stopped");
        }
        Command::Clear => println!("{}", handler.clear()),
    }

    Ok(())
}
