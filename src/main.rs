mod aggregate;
mod calendar;
mod config;
mod consolidate;
mod error;
mod fetcher;
mod loader;
mod models;
mod parser;
mod pipeline;
mod storage;
mod utils;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::aggregate::{AggregatedSeries, mean_indicative_rates, write_series_csv, write_series_json};
use crate::config::AppConfig;
use crate::consolidate::ConsolidatedDataset;
use crate::consolidate::export::{load_records, write_records_csv};
use crate::pipeline::{Pipeline, PipelineStats};
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "debenture-rates", about = "ANBIMA debenture daily-price ETL", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the last business days, consolidate, export and store
    Run {
        /// Reference date (default: today); it is never fetched itself
        #[arg(long, value_parser = parse_iso_date)]
        today: Option<NaiveDate>,

        /// Business days to fetch (default: fetcher.window_days)
        #[arg(long)]
        days: Option<usize>,
    },

    /// Only download the daily files into the cache
    Fetch {
        #[arg(long, value_parser = parse_iso_date)]
        today: Option<NaiveDate>,

        #[arg(long)]
        days: Option<usize>,
    },

    /// Re-consolidate every workbook already in the cache (no network)
    Consolidate,

    /// Average indicative rate per day and index from an exported workbook
    Summary {
        /// Workbook to read (default: the single-sheet export)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Keep only these dates (yyyymmdd); repeatable
        #[arg(short, long = "date", value_parser = parse_compact_date)]
        dates: Vec<NaiveDate>,

        /// Write the filtered records as CSV
        #[arg(long)]
        records: Option<PathBuf>,

        #[arg(long)]
        csv: Option<PathBuf>,

        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// Show database statistics
    Stats,

    /// Apply schema migrations without loading data
    Migrate,
}

fn parse_iso_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

fn parse_compact_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y%m%d").map_err(|e| format!("expected YYYYMMDD: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "debenture_rates=info,warn",
        1 => "debenture_rates=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;
    let today = Local::now().date_naive();

    match cli.command {
        Command::Run { today: at, days } => {
            let _t = utils::Timer::start("Daily run");
            if let Some(days) = days {
                config.fetcher.window_days = days;
            }
            let stats = Pipeline::new(config)?.run(at.unwrap_or(today)).await?;
            print_run(&stats);
        }

        Command::Fetch { today: at, days } => {
            let _t = utils::Timer::start("Fetch");
            if let Some(days) = days {
                config.fetcher.window_days = days;
            }
            let report = Pipeline::new(config)?.fetch(at.unwrap_or(today)).await?;
            info!(
                "Done: {} files cached, {} failures",
                report.fetched.len(),
                report.failures.len()
            );
        }

        Command::Consolidate => {
            let _t = utils::Timer::start("Cache consolidation");
            let stats = Pipeline::new(config)?.rebuild_from_cache()?;
            print_run(&stats);
        }

        Command::Summary { input, dates, records: records_out, csv, json } => {
            let path = input.unwrap_or_else(|| config.storage.flat_export.clone());
            let records = load_records(&path)
                .with_context(|| format!("Could not load consolidated workbook {:?}", path))?;
            let dataset = ConsolidatedDataset::from_records(records);

            let selected: BTreeSet<NaiveDate> = if dates.is_empty() {
                dataset.dates()
            } else {
                dates.into_iter().collect()
            };

            let rows = dataset.filter_dates(Some(&selected)).count();
            println!("{} records on {} selected dates", rows, selected.len());
            if let Some(path) = records_out {
                write_records_csv(dataset.filter_dates(Some(&selected)), &path)?;
            }

            let series = mean_indicative_rates(dataset.records(), Some(&selected));
            print_series(&series);

            if let Some(path) = csv {
                write_series_csv(&series, &path)?;
            }
            if let Some(path) = json {
                write_series_json(&series, &path)?;
            }
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            if config.storage.run_migrations {
                repo.run_migrations()?;
            }
            let records = repo.record_count()?;
            let (min, max) = repo.date_range().unwrap_or((None, None));
            let dates = repo.list_dates()?;
            println!("─────────────────────────────────");
            println!("  Debentures — Database Stats");
            println!("─────────────────────────────────");
            println!("  Records  : {}", records);
            println!("  Dates    : {}", dates.len());
            println!("  From     : {}", min.map(|d| d.to_string()).unwrap_or("—".into()));
            println!("  To       : {}", max.map(|d| d.to_string()).unwrap_or("—".into()));
            for (category, n) in repo.category_counts()? {
                println!("  {:<25}: {}", category.label(), n);
            }
            println!("  Last run : {}", repo.last_run_status()?.unwrap_or("—".into()));
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

fn print_run(stats: &PipelineStats) {
    info!(
        "Done: {} files, {} records, {} fetch failures, {} sheets rejected",
        stats.files_fetched, stats.records, stats.fetch_failures, stats.sheets_rejected
    );
    if let Some(e) = &stats.storage_error {
        warn!("Database left unchanged: {}", e);
    }
    print_series(&stats.series);
}

fn print_series(series: &AggregatedSeries) {
    if series.is_empty() {
        println!("No indicative rates to average.");
        return;
    }
    for s in series.to_series() {
        println!("{}", s.indexador.label());
        for p in s.points {
            println!("  {}  {:>10.4}", p.date.format("%d-%m-%Y"), p.mean_rate);
        }
    }
}
