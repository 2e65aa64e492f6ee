//! # CourseGen Orchestrator CLI
//!
//! Operational entry point for the PostgreSQL-backed orchestrator: validate
//! configuration, run a single health sweep for an external scheduler, or keep
//! sweeping on the configured interval.

use anyhow::Context;
use clap::{Parser, Subcommand};
use coursegen_core::config::ConfigManager;
use coursegen_core::logging::init_structured_logging;
use coursegen_core::orchestration::{OrchestrationCore, SweepReport};
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "coursegen-orchestrator")]
#[command(about = "Course-generation job orchestrator")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (TOML); defaults to COURSEGEN_CONFIG_PATH or config/coursegen.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate configuration, then print the effective values
    ValidateConfig,

    /// Run one health sweep and print its report
    Sweep,

    /// Run health sweeps on the configured interval until Ctrl-C
    Monitor,
}

#[tokio::main]
async fn main() {
    init_structured_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::ValidateConfig => validate_config(cli.config),
        Commands::Sweep => sweep(cli.config).await,
        Commands::Monitor => monitor(cli.config).await,
    };

    if let Err(e) = result {
        error!(error = format!("{e:#}"), "coursegen-orchestrator failed");
        eprintln!("❌ {e:#}");
        process::exit(1);
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<std::sync::Arc<ConfigManager>> {
    ConfigManager::load_from_path(path.as_deref()).context("failed to load configuration")
}

fn validate_config(path: Option<PathBuf>) -> anyhow::Result<()> {
    let manager = load_config(path)?;
    println!("✅ Configuration valid");
    println!("Environment: {}", manager.environment());
    match manager.source_path() {
        Some(source) => println!("Source: {}", source.display()),
        None => println!("Source: built-in defaults and environment"),
    }
    println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
    Ok(())
}

async fn connect(path: Option<PathBuf>) -> anyhow::Result<OrchestrationCore> {
    let manager = load_config(path)?;
    OrchestrationCore::connect(manager.config().clone())
        .await
        .context("failed to connect to the job store")
}

async fn sweep(path: Option<PathBuf>) -> anyhow::Result<()> {
    let core = connect(path).await?;
    let report = core.sweep().await.context("health sweep failed")?;
    print_report(&report)?;
    if report.has_critical_alerts() {
        process::exit(2);
    }
    Ok(())
}

async fn monitor(path: Option<PathBuf>) -> anyhow::Result<()> {
    let core = connect(path).await?;
    let interval = core.config().health.sweep_interval();
    info!(interval_secs = interval.as_secs(), "Health monitor running");

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = core.sweep().await {
                    error!(error = %e, "Health sweep failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested; health monitor stopping");
                return Ok(());
            }
        }
    }
}

fn print_report(report: &SweepReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
