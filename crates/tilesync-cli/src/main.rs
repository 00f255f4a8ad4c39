//! Command-line front end for offline tile synchronization.
//!
//! Runs the engine and an in-process caching agent on one single-threaded
//! runtime, writing tiles into a directory cache.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tilesync::protocol::Undelivered;
use tilesync::{
    AgentLink, CACHE_NAMESPACE, Cache, CachingAgent, DeliveryMode, Envelope, Error,
    FilesystemCache, GeoPoint, HttpFetcher, SyncConfig, SyncReport, Synchronizer, TileTemplate,
    address::DEFAULT_TILE_BASE_URL,
    config::{DEFAULT_BATCH_SIZE, DEFAULT_RADIUS, DEFAULT_ZOOM},
    spawn_agent,
};

/// Default cache directory.
const DEFAULT_CACHE_DIR: &str = "tile-cache";
/// Default pause after each batch, in milliseconds.
const DEFAULT_DELAY_MS: u64 = 1000;
/// Default attempts per batch in acknowledged mode.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Base retry backoff in acknowledged mode.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "tilesync", about = "Cache map tiles for offline use", version)]
struct Cli {
    #[command(flatten)]
    cache: CacheArgs,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Args)]
struct CacheArgs {
    /// Directory holding the tile cache.
    #[arg(long, global = true, default_value = DEFAULT_CACHE_DIR)]
    cache_dir: PathBuf,

    /// Storage quota in MiB, reported by `usage`.
    #[arg(long, global = true)]
    quota_mb: Option<u64>,
}

#[derive(Args)]
struct SyncArgs {
    /// Zoom level of the cached tiles.
    #[arg(long, default_value_t = DEFAULT_ZOOM)]
    zoom: u8,

    /// Tiles to cache on each side of every point.
    #[arg(long, default_value_t = DEFAULT_RADIUS)]
    radius: u32,

    /// Tiles per message to the caching agent.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Pause after each batch, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_DELAY_MS)]
    delay_ms: u64,

    /// Base URL of the tile server.
    #[arg(long, default_value = DEFAULT_TILE_BASE_URL)]
    tile_base_url: String,

    /// Wait for every batch to be stored and retry failed ones.
    #[arg(long)]
    acknowledged: bool,

    /// Attempts per batch when `--acknowledged` is set.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Print the agent messages instead of downloading anything.
    #[arg(long)]
    dry_run: bool,
}

impl SyncArgs {
    fn config(&self) -> SyncConfig {
        let delivery = if self.acknowledged {
            DeliveryMode::Acknowledged {
                max_attempts: self.max_attempts,
                backoff: RETRY_BACKOFF,
            }
        } else {
            DeliveryMode::FireAndForget
        };

        SyncConfig::default()
            .with_zoom(self.zoom)
            .with_radius(self.radius)
            .with_batch_size(self.batch_size)
            .with_delay(Duration::from_millis(self.delay_ms))
            .with_delivery(delivery)
    }
}

#[derive(Subcommand)]
enum CliCommand {
    /// Cache the tiles around a position.
    Around {
        /// Latitude in degrees.
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        /// Longitude in degrees.
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[command(flatten)]
        sync: SyncArgs,
    },
    /// Cache the tiles along a GPX track.
    Track {
        /// Path to the GPX file.
        file: PathBuf,
        #[command(flatten)]
        sync: SyncArgs,
    },
    /// List every cached tile address.
    List,
    /// Show how much space the cache uses.
    Usage,
    /// Delete every cached tile.
    Clear {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

/// What a sync should do with a point set.
enum Target {
    Around(GeoPoint),
    Track(String),
}

/// Prints each message on stdout instead of delivering it.
#[derive(Clone, Copy)]
struct PrintLink;

impl AgentLink for PrintLink {
    fn is_reachable(&self) -> bool {
        true
    }

    fn post(&self, envelope: Envelope) -> Result<(), Undelivered> {
        match envelope.command.to_json() {
            Ok(json) => {
                println!("{json}");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not encode message");
                Err(Undelivered(envelope))
            }
        }
    }
}

fn main() -> ExitCode {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> tilesync::Result<()> {
    let mut cache = FilesystemCache::open(&cli.cache.cache_dir, CACHE_NAMESPACE).await?;
    if let Some(quota_mb) = cli.cache.quota_mb {
        cache = cache.with_quota(quota_mb.saturating_mul(1024 * 1024));
    }
    let cache = Arc::new(cache);

    match cli.command {
        CliCommand::Around { lat, lon, sync } => {
            sync_with(cache, &sync, Target::Around(GeoPoint::new(lat, lon))).await
        }
        CliCommand::Track { file, sync } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .map_err(|e| Error::Track {
                    message: format!("{}: {e}", file.display()),
                })?;
            sync_with(cache, &sync, Target::Track(text)).await
        }
        CliCommand::List => {
            for address in cache.keys().await? {
                println!("{address}");
            }
            Ok(())
        }
        CliCommand::Usage => {
            let estimate = cache.estimate().await?;
            match estimate.quota_bytes {
                Some(quota) => println!("{} of {quota} bytes used", estimate.used_bytes),
                None => println!("{} bytes used", estimate.used_bytes),
            }
            Ok(())
        }
        CliCommand::Clear { yes } => {
            if !yes {
                tracing::warn!(dir = %cache.directory().display(), "refusing to clear the cache without --yes");
                return Ok(());
            }
            cache.clear().await?;
            tracing::info!(dir = %cache.directory().display(), "cache cleared");
            Ok(())
        }
    }
}

async fn sync_with(cache: Arc<FilesystemCache>, args: &SyncArgs, target: Target) -> tilesync::Result<()> {
    let config = args.config();
    config.validate()?;
    let template = TileTemplate::new(args.tile_base_url.as_str());

    let report = if args.dry_run {
        let sync = Synchronizer::new(cache, PrintLink, config)?.with_template(template);
        sync_target(&sync, target).await?
    } else {
        let agent = spawn_agent(CachingAgent::new(Arc::clone(&cache), HttpFetcher::new()));
        let sync = Synchronizer::new(cache, agent.link(), config)?.with_template(template);
        let report = sync_target(&sync, target).await;
        // Let the agent work through what it was sent before exiting.
        agent.shutdown().await;
        report?
    };

    tracing::info!(
        points = report.points,
        tiles = report.candidates,
        missing = report.missing,
        sent = report.schedule.batches_sent,
        dropped = report.schedule.batches_dropped,
        failed = report.schedule.batches_failed,
        "sync complete"
    );
    Ok(())
}

async fn sync_target<L: AgentLink + Clone>(
    sync: &Synchronizer<FilesystemCache, L>,
    target: Target,
) -> tilesync::Result<SyncReport> {
    match target {
        Target::Around(point) => sync.sync_around(point).await,
        Target::Track(text) => sync.sync_track(&text).await,
    }
}
