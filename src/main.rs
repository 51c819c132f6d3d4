use anyhow::{Context, Result};
use clap::Parser;
use laendlehunter::config::Config;
use laendlehunter::crawler::Crawler;
use laendlehunter::durations::DurationProcessor;
use laendlehunter::heartbeat::Heartbeat;
use laendlehunter::hunter::Hunter;
use laendlehunter::laendleimmo_crawler::LaendleimmoCrawler;
use laendlehunter::logging;
use laendlehunter::notifier::{self, TelegramNotifier};
use laendlehunter::storage::SqliteStorage;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Laendlehunter - new listings from Vorarlberg real estate sites")]
struct Args {
    /// Path to the TOML config file
    #[clap(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Maximum number of result pages per search URL
    #[clap(short, long)]
    max_pages: Option<usize>,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,

    /// Send a heartbeat message every hour, day or week
    #[clap(long)]
    heartbeat: Option<String>,

    /// Hunt once and exit, ignoring the loop config
    #[clap(long)]
    once: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let log = logging::init(args.debug);

    let mut config = Config::load(&args.config)?;
    if args.debug {
        config.verbose = true;
    }
    if let Some(interval) = args.heartbeat {
        config.heartbeat_interval = Some(interval);
        config.validate()?;
    }
    log.set_verbose(config.verbose);
    let max_pages = args.max_pages.or(config.max_pages);

    let db_path = config.database_path();
    let storage = Arc::new(
        SqliteStorage::open(&db_path)
            .context(format!("Failed to open database {}", db_path.display()))?,
    );
    info!(path = %db_path.display(), "Using database");

    let crawlers: Vec<Box<dyn Crawler>> = vec![Box::new(LaendleimmoCrawler::new()?)];
    let notifiers = notifier::from_config(&config)?;
    let heartbeat = Heartbeat::new(
        config.heartbeat_interval.as_deref(),
        config.loop_period_seconds(),
    )?;

    let mut hunter = Hunter::new(config.clone(), crawlers, storage, notifiers)?;
    if config.durations_enabled() {
        hunter = hunter.with_durations(DurationProcessor::from_config(&config)?);
    }
    if config.telegram.notify_registered_users {
        if let Some(telegram) = TelegramNotifier::from_config(&config)? {
            hunter = hunter.with_user_broadcast(telegram);
        }
    }

    if args.once || !config.hunt_loop.active {
        let exposes = hunter.hunt(max_pages)?;
        info!(count = exposes.len(), "Done");
        return Ok(());
    }

    let period = Duration::from_secs(config.loop_period_seconds());
    let mut counter = 0;
    loop {
        if let Err(e) = hunter.hunt(max_pages) {
            let reason = format!("{:#}", e);
            error!(error = %reason, "Hunt failed");
        }
        counter = heartbeat.send_heartbeat(hunter.notifiers(), counter) + 1;
        info!(seconds = period.as_secs(), "Sleeping until next hunt");
        thread::sleep(period);
    }
}
