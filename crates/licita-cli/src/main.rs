use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use licita_sync::{run_once_from_env, HarvestConfig, Harvester};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "licita")]
#[command(about = "Incremental harvester for the public procurement notices feed")]
struct Cli {
    /// YAML config file; `LICITA_*` environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch new entries once and append them to the dataset.
    Harvest {
        /// Print the full run report as JSON instead of the one-line outcome.
        #[arg(long)]
        json: bool,
    },
    /// Harvest on a cron schedule until interrupted.
    Schedule {
        /// Six-field cron expression (with seconds); defaults to the configured one.
        #[arg(long)]
        cron: Option<String>,
    },
    /// Show the current watermark and dataset parts.
    State,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command.unwrap_or(Commands::Harvest { json: false }) {
        Commands::Harvest { json } => {
            let report = run_once_from_env(config_path).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.outcome);
            }
        }
        Commands::Schedule { cron } => {
            let config = HarvestConfig::load(config_path)?;
            let cron = cron.unwrap_or_else(|| config.schedule_cron.clone());
            let harvester = Arc::new(Harvester::new(config)?);
            let mut sched = harvester.build_scheduler(&cron).await?;
            sched.start().await.context("starting scheduler")?;
            info!(%cron, "scheduler running; press ctrl-c to stop");
            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::State => {
            let config = HarvestConfig::load(config_path)?;
            let harvester = Harvester::new(config)?;
            let watermark = harvester.store().load().await?;
            let parts = harvester.writer().part_files()?;
            println!(
                "watermark={} state={} dataset={} parts={}",
                watermark,
                harvester.store().path().display(),
                harvester.writer().root().display(),
                parts.len()
            );
        }
    }

    Ok(())
}
