//! CLI entry point for the transit OTP tracker.
//!
//! Provides subcommands for bootstrapping the database, polling the
//! TripUpdates feed into the fact table, recomputing daily/hourly summaries,
//! and loading static GTFS reference data.

use anyhow::Result;
use chrono::{Days, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use otp_tracker::{
    aggregate::{backfill_aggregations, run_daily_aggregation},
    archive::FeedArchive,
    config::Config,
    fetch::BasicClient,
    poller::{FeedPoller, run_poll_cycle},
    static_data::{download_static_gtfs, load_static_gtfs},
    store::Store,
};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "otp_tracker")]
#[command(about = "Tracks transit on-time performance from a GTFS-RT feed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create all database tables if they do not exist
    InitDb,
    /// Poll the TripUpdates feed and record stop delay observations
    Poll {
        /// Number of poll cycles to run (0 = poll until interrupted)
        #[arg(short = 'n', long, default_value_t = 0)]
        samples: usize,

        /// Disable raw feed archival
        #[arg(long, default_value_t = false)]
        no_archive: bool,
    },
    /// Recompute daily and hourly route summaries
    Aggregate {
        /// Date to aggregate (YYYY-MM-DD). Defaults to yesterday.
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Start date for backfill (YYYY-MM-DD)
        #[arg(long)]
        backfill_start: Option<NaiveDate>,

        /// End date for backfill (YYYY-MM-DD). Defaults to yesterday.
        #[arg(long)]
        backfill_end: Option<NaiveDate>,
    },
    /// Download and load static GTFS reference data
    LoadStatic {
        /// Load from the configured GTFS directory without downloading
        #[arg(long, default_value_t = false)]
        no_download: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/otp_tracker.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("otp_tracker.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::InitDb => {
            let store = Store::open(&config.db_path).await?;
            store.create_tables().await?;
            info!(db = %config.db_path.display(), "Database initialized");
        }
        Commands::Poll { samples, no_archive } => {
            let store = Store::open(&config.db_path).await?;
            store.create_tables().await?;
            run_poll_loop(&config, &store, samples, no_archive).await?;
        }
        Commands::Aggregate {
            date,
            backfill_start,
            backfill_end,
        } => {
            let store = Store::open(&config.db_path).await?;
            store.create_tables().await?;

            let yesterday = yesterday();
            if let Some(start) = backfill_start {
                let end = backfill_end.unwrap_or(yesterday);
                info!(start = %start, end = %end, "Running backfill");
                let reports =
                    backfill_aggregations(&store, &config.thresholds, start, end).await?;

                let total_daily: usize = reports.iter().map(|r| r.daily_route_summaries).sum();
                let total_hourly: usize = reports.iter().map(|r| r.hourly_route_summaries).sum();
                info!(
                    days = reports.len(),
                    total_daily, total_hourly, "Backfill complete"
                );
            } else {
                let target = date.unwrap_or(yesterday);
                let report = run_daily_aggregation(&store, &config.thresholds, target).await?;
                info!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Commands::LoadStatic { no_download } => {
            let store = Store::open(&config.db_path).await?;
            store.create_tables().await?;

            if !no_download {
                let client = BasicClient::new();
                download_static_gtfs(&client, &config.static_gtfs_url, &config.gtfs_dir).await?;
            }
            let counts = load_static_gtfs(&store, &config.gtfs_dir).await?;
            info!("{}", serde_json::to_string_pretty(&counts)?);
        }
    }

    Ok(())
}

fn yesterday() -> NaiveDate {
    Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(1))
        .expect("calendar underflow")
}

/// Drives the continuous polling loop. Each cycle is independent: a failed
/// cycle is recorded in the poll log and the loop simply waits for the next
/// tick. Archive retention is enforced once per day.
async fn run_poll_loop(config: &Config, store: &Store, samples: usize, no_archive: bool) -> Result<()> {
    let archive = if no_archive {
        None
    } else {
        Some(FeedArchive::new(config.archive_dir.clone()))
    };
    let poller = FeedPoller::new(BasicClient::new(), config, archive);

    if samples == 0 {
        info!(
            interval_secs = config.poll_interval.as_secs(),
            "Polling until interrupted. Press Ctrl+C to stop."
        );
    } else {
        info!(
            samples,
            interval_secs = config.poll_interval.as_secs(),
            "Starting poll collection"
        );
    }

    let retention_archive = FeedArchive::new(config.archive_dir.clone());
    let mut last_prune_date: Option<NaiveDate> = None;
    let mut sample_count = 0usize;

    loop {
        sample_count += 1;

        // Enforce archive retention once per day.
        let today = Utc::now().date_naive();
        if !no_archive && last_prune_date.map_or(true, |d| d < today) {
            if let Err(e) = retention_archive.prune(config.archive_retention_days, Utc::now()) {
                error!(error = %e, "Archive pruning failed");
            }
            last_prune_date = Some(today);
        }

        match run_poll_cycle(&poller, store, &config.thresholds).await {
            Ok(record) => {
                if let Some(message) = record.error_message {
                    error!(sample = sample_count, error = %message, "Poll cycle ended with error");
                }
            }
            Err(e) => {
                // Storage failure; the next scheduled cycle is the retry.
                error!(sample = sample_count, error = %e, "Poll cycle could not be recorded");
            }
        }

        if samples > 0 && sample_count >= samples {
            break;
        }
        tokio::time::sleep(config.poll_interval).await;
    }

    info!(samples = sample_count, "Finished polling");
    Ok(())
}
