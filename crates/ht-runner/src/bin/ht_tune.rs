//! Tune a self-play training binary.
//!
//! Usage:
//!   ht-tune --simulation-cycles-min 100 --simulation-cycles-max 10000 ./target/release/selfplay
//!   RUST_LOG=debug ht-tune ... ./selfplay

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use ht_optimizer::StrategyKind;
use ht_runner::{run_search, IntBounds, MalformedOutputPolicy, TuneConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ht-tune")]
#[command(about = "Hyperparameter search over an external training binary")]
struct Cli {
    /// Binary to tune; each trial runs `<BIN> --config <json>`
    bin: PathBuf,
    /// Lower bound for `simulation_cycles`
    #[arg(long, env = "HT_SIMULATION_CYCLES_MIN")]
    simulation_cycles_min: i64,
    /// Upper bound for `simulation_cycles`
    #[arg(long, env = "HT_SIMULATION_CYCLES_MAX")]
    simulation_cycles_max: i64,
    /// Trial budget
    #[arg(long, env = "HT_TRIALS", default_value_t = 1000)]
    trials: usize,
    /// Trials run in parallel
    #[arg(long, env = "HT_JOBS", default_value_t = 8)]
    jobs: usize,
    #[arg(long, value_enum, default_value_t = CliStrategy::Bayesian)]
    strategy: CliStrategy,
    /// Chance in [0, 1] that the bayesian strategy explores instead of refining
    #[arg(long, env = "HT_EXPLORATION_WEIGHT", default_value_t = 0.3)]
    exploration_weight: f64,
    #[arg(long, env = "HT_SEED")]
    seed: Option<u64>,
    /// What to do when the binary exits 0 without a numeric last token
    #[arg(long, value_enum, default_value_t = CliMalformed::Abort)]
    on_malformed_output: CliMalformed,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliStrategy {
    Random,
    Bayesian,
}

impl From<CliStrategy> for StrategyKind {
    fn from(value: CliStrategy) -> Self {
        match value {
            CliStrategy::Random => StrategyKind::Random,
            CliStrategy::Bayesian => StrategyKind::Bayesian,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliMalformed {
    Abort,
    Prune,
}

impl From<CliMalformed> for MalformedOutputPolicy {
    fn from(value: CliMalformed) -> Self {
        match value {
            CliMalformed::Abort => MalformedOutputPolicy::Abort,
            CliMalformed::Prune => MalformedOutputPolicy::Prune,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let bounds = IntBounds::new(cli.simulation_cycles_min, cli.simulation_cycles_max)
        .context("invalid simulation_cycles bounds")?;
    let config = TuneConfig::new(cli.bin, bounds)
        .with_trials(cli.trials)
        .with_jobs(cli.jobs)
        .with_strategy(cli.strategy.into())
        .with_exploration_weight(cli.exploration_weight)
        .with_seed(cli.seed)
        .with_malformed_policy(cli.on_malformed_output.into());

    let status = run_search(&config)?;
    let best = status
        .best_trial
        .context("no trial produced a score")?;

    println!("{}", serde_json::to_string_pretty(&best)?);
    Ok(())
}
