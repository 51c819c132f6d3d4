use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use laendlehunter::config::Config;
use laendlehunter::logging;
use laendlehunter::storage::{SqliteStorage, Storage};
use laendlehunter::utils;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Export saved exposes to CSV")]
struct Args {
    /// Path to the TOML config file
    #[clap(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Path to output CSV file
    #[clap(short, long, default_value = "exposes.csv")]
    output: PathBuf,

    /// Export exposes saved within the last N days
    #[clap(long, default_value = "30")]
    days: i64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let log = logging::init(false);
    let config = Config::load(&args.config)?;
    log.set_verbose(config.verbose);

    let db_path = config.database_path();
    let storage = SqliteStorage::open(&db_path)
        .context(format!("Failed to open database {}", db_path.display()))?;

    let since = Utc::now() - Duration::days(args.days);
    let exposes = storage.get_exposes_since(since)?;
    info!(count = exposes.len(), since = %since, "Loaded exposes");

    utils::save_exposes_to_csv(&exposes, &args.output)
}
