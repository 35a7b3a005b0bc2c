//! Run configuration tying the search space, study and process runner.

use std::path::PathBuf;

use ht_optimizer::{OptimizationConfig, OptimizationStatus, StrategyKind, Study};
use ht_types::HtResult;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::runner::{MalformedOutputPolicy, ProcessRunner};
use crate::space::{selfplay_search_space, IntBounds};

/// Everything needed to tune one binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneConfig {
    /// Binary under test, invoked as `<binary> --config <json>`.
    pub binary: PathBuf,
    pub simulation_cycles: IntBounds,
    pub trials: usize,
    pub jobs: usize,
    pub strategy: StrategyKind,
    /// Probability that the bayesian strategy samples a fresh point instead
    /// of refining a good one.
    pub exploration_weight: f64,
    pub seed: Option<u64>,
    pub on_malformed_output: MalformedOutputPolicy,
}

impl TuneConfig {
    pub fn new(binary: impl Into<PathBuf>, simulation_cycles: IntBounds) -> Self {
        Self {
            binary: binary.into(),
            simulation_cycles,
            trials: 1000,
            jobs: 8,
            strategy: StrategyKind::Bayesian,
            exploration_weight: 0.3,
            seed: None,
            on_malformed_output: MalformedOutputPolicy::Abort,
        }
    }

    pub fn with_trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_exploration_weight(mut self, weight: f64) -> Self {
        self.exploration_weight = weight;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_malformed_policy(mut self, policy: MalformedOutputPolicy) -> Self {
        self.on_malformed_output = policy;
        self
    }

    pub fn optimization_config(&self) -> OptimizationConfig {
        let name = self
            .binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "hypertrial".to_string());

        OptimizationConfig::new(name, selfplay_search_space(self.simulation_cycles), self.strategy)
            .with_max_trials(self.trials)
            .with_concurrency(self.jobs)
            .with_exploration_weight(self.exploration_weight)
            .with_seed(self.seed)
    }

    pub fn runner(&self) -> ProcessRunner {
        ProcessRunner::new(&self.binary).with_malformed_policy(self.on_malformed_output)
    }
}

/// Run the whole search and return the final status.
pub fn run_search(config: &TuneConfig) -> HtResult<OptimizationStatus> {
    let study = Study::new(config.optimization_config())?;
    info!(
        binary = %config.binary.display(),
        trials = config.trials,
        jobs = config.jobs,
        malformed = ?config.on_malformed_output,
        "tuning"
    );
    study.optimize(&config.runner())
}
