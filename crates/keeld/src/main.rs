//! `keeld`: the Keel autopilot daemon.
//!
//! Drives the slab migrator against a simulated network of slabs and
//! workers, and reports the alerts it raised.
//!
//! # Usage
//!
//! ```text
//! keeld simulate                          # default simulated network
//! keeld simulate -c keel.toml             # with a config file
//! keeld simulate --slabs 1000 --workers 8 # override network size
//! keeld config                            # print the effective config
//! ```

mod config;
mod simulation;
mod telemetry;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::KeelConfig;
use simulation::Simulation;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "keeld", version, about = "Keel storage autopilot daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true, env = "KEEL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the autopilot against a simulated network.
    Simulate {
        /// Number of slabs in the network.
        #[arg(long)]
        slabs: Option<usize>,

        /// Number of migration workers.
        #[arg(short, long)]
        workers: Option<usize>,

        /// Number of autopilot rounds.
        #[arg(short, long)]
        rounds: Option<usize>,

        /// RNG seed.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the effective configuration as TOML.
    Config,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = KeelConfig::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::Simulate {
            slabs,
            workers,
            rounds,
            seed,
        } => {
            // CLI args override config file values.
            if slabs.is_some() {
                config.simulation.slabs = slabs;
            }
            if workers.is_some() {
                config.simulation.workers = workers;
            }
            if rounds.is_some() {
                config.simulation.rounds = rounds;
            }
            if seed.is_some() {
                config.simulation.seed = seed;
            }
            telemetry::init(&config.log.level);
            cmd_simulate(config).await
        }
        Commands::Config => cmd_config(&config),
    }
}

// -----------------------------------------------------------------------
// keeld simulate
// -----------------------------------------------------------------------

async fn cmd_simulate(config: KeelConfig) -> Result<()> {
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, shutting down");
                shutdown.cancel();
            }
        });
    }

    let migrator = config.migrator_config();
    info!(
        health_cutoff = migrator.health_cutoff,
        parallel_slabs_per_worker = migrator.parallel_slabs_per_worker,
        batch_size = migrator.batch_size,
        "migrator configuration"
    );

    let mut sim = Simulation::new(config, shutdown.clone());
    let summary = sim.run().await?;
    shutdown.cancel();

    println!();
    println!("Simulation summary");
    println!("  rounds:          {}", summary.rounds);
    println!("  migration runs:  {}", summary.outcomes.len());
    println!("  migrations:      {}", summary.attempted);
    println!("  unhealthy left:  {}", summary.unhealthy_left);
    for (i, outcome) in summary.outcomes.iter().enumerate() {
        println!("  run {:>3}:        {outcome:?}", i + 1);
    }

    let alerts = sim.alerts().alerts();
    println!();
    println!("Active alerts: {}", alerts.len());
    for alert in alerts {
        let data = serde_json::to_string(&alert.data).context("failed to encode alert data")?;
        println!(
            "  [{:<8}] {} ({})",
            alert.severity.to_string(),
            alert.message,
            alert.id
        );
        println!("             {data}");
    }

    Ok(())
}

// -----------------------------------------------------------------------
// keeld config
// -----------------------------------------------------------------------

fn cmd_config(config: &KeelConfig) -> Result<()> {
    let text = toml::to_string_pretty(&config.resolved()).context("failed to encode config")?;
    print!("{text}");
    Ok(())
}
