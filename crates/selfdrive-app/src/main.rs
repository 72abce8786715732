use anyhow::{Context, Result};
use clap::Parser;
use selfdrive_app::{
    AppConfig, best_network, bootstrap_world, load_config, load_network, run, save_network,
    staggered_traffic,
};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "selfdrive-app",
    version,
    about = "Run a headless self-driving car simulation"
)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long, env = "SELFDRIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Number of ticks to simulate.
    #[arg(long)]
    ticks: Option<u64>,

    /// Number of autonomous agents.
    #[arg(long)]
    population: Option<usize>,

    /// Replace the configured traffic with this many staggered cars.
    #[arg(long)]
    traffic: Option<usize>,

    /// Mutation amount applied to every agent but the first (0..=1).
    #[arg(long)]
    mutation: Option<f64>,

    /// RNG seed for brain initialisation and mutation.
    #[arg(long, env = "SELFDRIVE_SEED")]
    seed: Option<u64>,

    /// JSON network used as the base brain for the population.
    #[arg(long)]
    brain: Option<PathBuf>,

    /// Write the leader's network as JSON after the run.
    #[arg(long)]
    save_best: Option<PathBuf>,

    /// Write the run report as JSON.
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Cli {
    fn resolve_config(&self) -> Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => AppConfig::default(),
        };
        if let Some(ticks) = self.ticks {
            config.ticks = ticks;
        }
        if let Some(population) = self.population {
            config.population = population;
        }
        if let Some(count) = self.traffic {
            config.traffic = staggered_traffic(count, config.road.lanes);
        }
        if let Some(mutation) = self.mutation {
            config.mutation = mutation;
        }
        if self.seed.is_some() {
            config.simulation.rng_seed = self.seed;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    let base = cli.brain.as_deref().map(load_network).transpose()?;
    let mut world = bootstrap_world(&config, base).context("failed to bootstrap world")?;
    info!(ticks = config.ticks, "starting selfdrive simulation");
    let report = run(&mut world, config.ticks)?;

    if let Some(path) = &cli.report {
        report.write(path)?;
        info!(path = %path.display(), "report written");
    }
    if let Some(path) = &cli.save_best {
        match best_network(&world) {
            Some(network) => {
                save_network(path, &network)?;
                info!(path = %path.display(), "leader network saved");
            }
            None => warn!("no autonomous leader to save"),
        }
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
