mod config;
mod entities;
mod error;
mod logging;
mod ports;
mod rate_limit;
mod shutdown;
mod sinks;
mod spotify;
mod sync;

#[cfg(test)]
mod test_utils;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::Value;
use color_eyre::{
    Result,
    eyre::{WrapErr, eyre},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Config, RateLimitBackend},
    logging::setup_logging,
    ports::sink::Sink,
    rate_limit::{RateLimiter, build_rate_limiter},
    shutdown::{ExitCode, ShutdownCoordinator},
    sinks::{json_file::JsonFileSink, memory::MemorySink},
    spotify::{SpotifyApi, SpotifyEndpoint, SpotifyResource},
    sync::{
        collections::{CollectionKind, playlist_tracks},
        coordinator::{SyncCoordinator, SyncJob, SyncReport},
        executor::RequestExecutor,
    },
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "SPOTIFY_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Console log level (default: warn)
    #[arg(long, default_value = "warn", global = true, env = "LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// File log level (default: debug)
    #[arg(long, default_value = "debug", global = true)]
    log_file_level: log::LevelFilter,

    /// Path to log file
    #[arg(long, env = "SPOTIFY_SYNC_LOG_FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Override the rate limiter backend from the config file
    #[arg(long, value_enum, global = true)]
    rate_limit_backend: Option<RateLimitBackend>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync user collections to the output directory
    Sync {
        /// Collections to sync (default: all)
        #[arg(long = "collection", value_enum)]
        collections: Vec<CollectionKind>,

        /// Spotify access token
        #[arg(long, env = "SPOTIFY_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,

        /// Directory to write collections to (default: from config)
        #[arg(short, long)]
        output_directory: Option<PathBuf>,

        /// Date folder to write into, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Fetch everything but keep results in memory
        #[arg(long)]
        dry_run: bool,
    },
    /// Sync the tracks of one playlist
    PlaylistTracks {
        /// The Spotify playlist id
        #[arg(short, long)]
        playlist_id: String,

        /// Spotify access token
        #[arg(long, env = "SPOTIFY_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,

        /// Directory to write collections to (default: from config)
        #[arg(short, long)]
        output_directory: Option<PathBuf>,

        /// Date folder to write into, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Fetch everything but keep results in memory
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the current rate limit bucket
    ///
    /// Only the sqlite bucket outlives a process. The memory and window
    /// backends start full, so they report a fresh bucket here.
    Limits,
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    setup_logging(args.log_level, args.log_file.clone(), args.log_file_level)?;

    log::debug!("spotify-sync starting");

    if let Commands::Config(config_commands) = &args.command {
        match config_commands {
            ConfigCommands::CreateDefault => {
                log::debug!("Creating default config");
                let path = Config::create_default()?;
                println!("{}", path.display());
            }
            ConfigCommands::Path => match Config::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No default config path found"),
            },
        }
        return Ok(());
    }

    log::debug!("Loading configuration");
    let config = {
        if let Some(config) = &args.config {
            Config::from_file(config)
        } else {
            Config::load()
        }
    }
    .wrap_err("Failed to load spotify-sync config")?;

    let backend = args.rate_limit_backend.unwrap_or(config.rate_limit.backend);
    let limiter = build_rate_limiter(
        backend,
        &config.rate_limit.store_path(),
        config.sync.rate_limit_settings()?,
    )
    .await
    .wrap_err("Failed to set up rate limiter")?;

    let shutdown = ShutdownCoordinator::new(CancellationToken::new());
    shutdown.register_handlers();

    let outcome = run(args.command, &config, limiter, shutdown.cancel_token()).await;

    let exit_code = match outcome {
        Ok(()) => ExitCode::Success,
        Err(err) if shutdown.is_shutdown_requested() => {
            log::warn!("Sync interrupted: {:#}", err);
            eprintln!("Interrupted, nothing was written for the unfinished collection");
            ExitCode::ShutdownRequested
        }
        Err(err) => return Err(err),
    };
    std::process::exit(exit_code.as_i32());
}

async fn run(
    command: Commands,
    config: &Config,
    limiter: Arc<dyn RateLimiter>,
    cancel: CancellationToken,
) -> Result<()> {
    match command {
        Commands::Sync {
            collections,
            access_token,
            output_directory,
            date,
            dry_run,
        } => {
            let kinds = if collections.is_empty() {
                CollectionKind::ALL.to_vec()
            } else {
                collections
            };
            log::info!(
                "Syncing collections: {}",
                kinds
                    .iter()
                    .map(|kind| kind.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            let api = Arc::new(spotify_api(config, access_token)?);
            let executor = RequestExecutor::new(limiter, config.sync.inter_request_delay(), cancel);

            let owner = if kinds.contains(&CollectionKind::Playlists) {
                let me = executor
                    .execute(|| api.current_user())
                    .await
                    .wrap_err("Failed to fetch the current Spotify user")?;
                let display_name = me.get("display_name").cloned().unwrap_or(Value::Null);
                log::info!("Logged in as {}", display_name);
                Some(display_name)
            } else {
                None
            };

            let jobs = kinds
                .into_iter()
                .map(|kind| {
                    let descriptor = match (kind, &owner) {
                        (CollectionKind::Playlists, Some(owner)) => {
                            kind.descriptor().owned_by(owner.clone())
                        }
                        _ => kind.descriptor(),
                    };
                    SyncJob {
                        endpoint: Box::new(SpotifyEndpoint::new(api.clone(), kind.into())),
                        descriptor,
                    }
                })
                .collect();

            run_jobs(config, executor, jobs, output_directory, date, dry_run).await
        }
        Commands::PlaylistTracks {
            playlist_id,
            access_token,
            output_directory,
            date,
            dry_run,
        } => {
            let api = Arc::new(spotify_api(config, access_token)?);
            let jobs = vec![SyncJob {
                endpoint: Box::new(SpotifyEndpoint::new(
                    api,
                    SpotifyResource::PlaylistItems {
                        playlist_id: playlist_id.clone(),
                    },
                )),
                descriptor: playlist_tracks(&playlist_id),
            }];

            let executor = RequestExecutor::new(limiter, config.sync.inter_request_delay(), cancel);
            run_jobs(config, executor, jobs, output_directory, date, dry_run).await
        }
        Commands::Limits => {
            let info = limiter
                .rate_limit_info()
                .await
                .wrap_err("Failed to read rate limit state")?;
            println!("remaining: {}/{}", info.remaining, info.limit);
            println!("resets at: {}", info.reset_at.to_rfc3339());
            println!("retry after: {}", humantime::format_duration(limiter.retry_after()));
            Ok(())
        }
        Commands::Config(_) => Err(eyre!("config commands are handled before loading config")),
    }
}

fn spotify_api(config: &Config, access_token: String) -> Result<SpotifyApi> {
    SpotifyApi::new(
        &config.spotify.api_base_url,
        access_token,
        config.spotify.request_timeout(),
    )
    .wrap_err("Failed to create Spotify client")
}

async fn run_jobs(
    config: &Config,
    executor: RequestExecutor,
    jobs: Vec<SyncJob>,
    output_directory: Option<PathBuf>,
    date: Option<NaiveDate>,
    dry_run: bool,
) -> Result<()> {
    let batch_size = config.sync.batch_size;
    let max_concurrent = config.sync.max_concurrent_requests;

    if dry_run {
        let coordinator = SyncCoordinator::new(executor, MemorySink::new(), batch_size, max_concurrent);
        let reports = sync_and_report(&coordinator, &jobs).await?;
        for report in &reports {
            let collection = &report.collection;
            if let Some(first) = coordinator
                .sink()
                .collection(collection)
                .and_then(|items| items.into_iter().next())
            {
                println!("{} sample: {}", collection, first);
            }
        }
        return Ok(());
    }

    let output_directory = output_directory.unwrap_or_else(|| config.output_directory());
    log::info!("Writing collections to: {}", output_directory.display());
    let sink = match date {
        Some(date) => JsonFileSink::for_date(output_directory, date),
        None => JsonFileSink::new(output_directory),
    };
    let coordinator = SyncCoordinator::new(executor, sink, batch_size, max_concurrent);
    sync_and_report(&coordinator, &jobs).await?;
    Ok(())
}

async fn sync_and_report<S: Sink>(
    coordinator: &SyncCoordinator<S>,
    jobs: &[SyncJob],
) -> Result<Vec<SyncReport>> {
    let started = std::time::Instant::now();
    let reports = coordinator.sync_all(jobs).await?;

    for report in &reports {
        println!(
            "{:<24} {:>7} items  {}",
            report.collection,
            report.item_count,
            humantime::format_duration(report.elapsed)
        );
    }
    println!(
        "Synced {} collections in {}",
        reports.len(),
        humantime::format_duration(started.elapsed())
    );
    Ok(reports)
}
