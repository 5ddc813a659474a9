use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;
use reapr::domain::{Decision, Disposition, ReapPlan, ReapReport};
use reapr::reaper::background_reaper_task;
use reapr::store::SqliteStore;
use reapr::{ContainerReaper, ReaperConfig};

fn setup_logging(config: &Config) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reapr")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("reapr.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the config file's log_level
    let default_level = config.log_level.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn build_reaper(config: &Config, reaper_config: ReaperConfig) -> Result<ContainerReaper> {
    let store = Arc::new(
        SqliteStore::open(&config.storage.db_path)
            .with_context(|| format!("Failed to open database {}", config.storage.db_path.display()))?,
    );
    info!("Using database: {}", config.storage.db_path.display());

    Ok(ContainerReaper::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store,
        reaper_config,
    ))
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run { orphans } => handle_run_command(*orphans, config).await,
        Commands::Plan { orphans, all } => handle_plan_command(*orphans, *all, config).await,
        Commands::Watch { interval } => handle_watch_command(*interval, config).await,
    }
}

fn reaper_config(config: &Config, orphans: bool) -> ReaperConfig {
    let reaper_config = config.reaper.to_reaper_config();
    if orphans {
        reaper_config.with_reap_orphans(true)
    } else {
        reaper_config
    }
}

async fn handle_run_command(orphans: bool, config: &Config) -> Result<()> {
    let reaper = build_reaper(config, reaper_config(config, orphans))?;
    let report = reaper.run().await.context("Reaper pass aborted")?;
    print_report(&report);
    Ok(())
}

async fn handle_plan_command(orphans: bool, all: bool, config: &Config) -> Result<()> {
    let reaper = build_reaper(config, reaper_config(config, orphans))?;
    let plan = reaper.plan().await.context("Failed to plan reaper pass")?;
    print_plan(&plan, all);
    Ok(())
}

async fn handle_watch_command(interval: Option<u64>, config: &Config) -> Result<()> {
    let reaper = Arc::new(build_reaper(config, config.reaper.to_reaper_config())?);
    let interval = interval
        .map(|secs| std::time::Duration::from_secs(secs.max(1)))
        .unwrap_or_else(|| config.reaper.interval());

    println!(
        "{} every {}s, releasing with a {}s TTL (Ctrl-C to stop)",
        "Reaping".cyan(),
        interval.as_secs(),
        reaper.config().container_ttl.as_secs()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(background_reaper_task(reaper, interval, shutdown_rx));

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    let stats = task.await.context("Background reaper panicked")?;
    println!(
        "{} {} passes, {} aborted, {} released, {} release failures",
        "Stopped:".green(),
        stats.passes,
        stats.aborted,
        stats.released,
        stats.release_failures
    );
    Ok(())
}

fn print_report(report: &ReapReport) {
    for outcome in &report.outcomes {
        match &outcome.disposition {
            Disposition::Released(reason) => println!("  {} {} ({})", "released".green(), outcome.handle, reason),
            Disposition::Retained => println!("  {} {}", "retained".cyan(), outcome.handle),
            Disposition::Failed { reason, error } => {
                println!("  {} {} ({}): {}", "failed".red(), outcome.handle, reason, error)
            }
        }
    }

    for bucket in &report.skipped_buckets {
        println!("  {} {} containers could not be fetched", "skipped".yellow(), bucket);
    }

    println!(
        "{} {} released ({} with stale provenance), {} retained, {} failed",
        "Done:".green(),
        report.released().len(),
        stale_provenance_count(report),
        report.retained().len(),
        report.failed().len()
    );
}

/// Releases forced because the pipeline, config, job or build was gone.
fn stale_provenance_count(report: &ReapReport) -> usize {
    report
        .outcomes
        .iter()
        .filter(|o| matches!(&o.disposition, Disposition::Released(reason) if reason.is_provenance_failure()))
        .count()
}

fn print_plan(plan: &ReapPlan, all: bool) {
    for verdict in &plan.verdicts {
        match &verdict.decision {
            Decision::Release(reason) => println!("  {} {} ({})", "release".yellow(), verdict.handle(), reason),
            Decision::Retain if all => println!("  {} {}", "retain".cyan(), verdict.handle()),
            Decision::Retain => {}
        }
    }

    for bucket in &plan.skipped_buckets {
        println!("  {} {} containers could not be fetched", "skipped".yellow(), bucket);
    }

    println!(
        "{} {} to release, {} to retain",
        "Plan:".green(),
        plan.releases().count(),
        plan.retains().count()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Logging level comes from the config
    setup_logging(&config).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
