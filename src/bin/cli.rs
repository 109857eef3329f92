//! Pennsieve cache CLI
//!
//! Operator commands for the local time-series cache:
//! - Inspect, compact or clear the cache
//! - Fetch channel data through the cache
//! - Print a default config file

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use pennsieve::cache::PageCache;
use pennsieve::config::{generate_default_config, Config};
use pennsieve::timeseries::{parse_timedelta, Channel, TimeRange, TimeSeriesService};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pennsieve-cache")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and exercise the Pennsieve time-series cache")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show cache occupancy
    Stats,

    /// Evict pages until the cache fits its budget
    Compact,

    /// Remove every cached page
    Clear,

    /// Fetch channel data through the cache
    Fetch {
        /// Channel id
        channel: String,
        /// Sampling rate in Hz
        #[arg(long)]
        rate: f64,
        /// Start time (microseconds since epoch)
        #[arg(long)]
        start: i64,
        /// End time (microseconds since epoch)
        #[arg(long, conflicts_with = "length")]
        end: Option<i64>,
        /// Duration instead of an end time (e.g. 30s, 5m, 1hr30m)
        #[arg(long)]
        length: Option<String>,
        /// Chunk width (e.g. 10s); one chunk per page if omitted
        #[arg(long)]
        chunk: Option<String>,
        /// Bypass the cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("pennsieve={}", config.logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_with_env(path).context("loading config"),
        None => Ok(Config::load_default()),
    }
}

fn open_cache(config: &Config) -> anyhow::Result<PageCache> {
    let mut settings = config.cache_settings();
    settings.background_compaction = false;
    PageCache::open(settings).context("opening cache")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref())?;
    init_logging(&config);

    match cli.command {
        Commands::Stats => {
            let cache = open_cache(&config)?;
            let stats = cache.stats()?;
            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", stats);
            }
        }

        Commands::Compact => {
            let cache = open_cache(&config)?;
            let report = cache.compact();
            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!(
                "Evicted {} pages in {} passes: {} → {} bytes{}",
                report.pages_evicted,
                report.passes,
                report.initial_bytes,
                report.final_bytes,
                if report.abandoned { " (abandoned)" } else { "" }
            );
        }

        Commands::Clear => {
            let cache = open_cache(&config)?;
            cache.clear()?;
            println!("Cache cleared: {:?}", config.cache.cache_dir);
        }

        Commands::Fetch {
            channel,
            rate,
            start,
            end,
            length,
            chunk,
            no_cache,
        } => {
            let range = match (end, length.as_deref()) {
                (Some(end), _) => TimeRange::new(start, end),
                (None, Some(expr)) => match parse_timedelta(expr) {
                    Some(usecs) => TimeRange::from_length(start, usecs),
                    None => bail!("Invalid length: {}", expr),
                },
                (None, None) => bail!("One of --end or --length is required"),
            };
            let chunk = match chunk.as_deref() {
                Some(expr) => match parse_timedelta(expr) {
                    Some(usecs) => Some(usecs),
                    None => bail!("Invalid chunk: {}", expr),
                },
                None => None,
            };

            if no_cache {
                config.cache.use_cache = false;
            }
            let service = TimeSeriesService::new(&config)?;
            let mut iter = service.channel_iter(Channel::new(channel, rate)?, range, chunk)?;

            let mut index = 0;
            let mut total = 0;
            while let Some(segment) = iter.next_chunk().await? {
                match (segment.first_timestamp(), segment.last_timestamp()) {
                    (Some(first), Some(last)) => {
                        println!("chunk {}: {} samples [{} .. {}]", index, segment.len(), first, last)
                    }
                    _ => println!("chunk {}: empty", index),
                }
                total += segment.len();
                index += 1;
            }
            println!("{} samples in {} chunks", total, index);
        }

        Commands::Config { output } => {
            let config = generate_default_config();
            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", config),
            }
        }
    }

    Ok(())
}
