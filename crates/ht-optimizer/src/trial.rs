//! Trial tracking and optimization run management.

use chrono::{DateTime, Utc};
use ht_types::{PruneReason, TrialOutcome};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::search::{ParameterSet, SearchSpace, StrategyKind};

/// Unique optimization run identifier.
pub type OptimizationId = Uuid;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Minimize
    }
}

impl ObjectiveDirection {
    /// True if `candidate` is strictly better than `current`.
    pub fn improves(&self, candidate: f64, current: f64) -> bool {
        match self {
            Self::Maximize => candidate > current,
            Self::Minimize => candidate < current,
        }
    }
}

/// Top-level configuration for an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub id: OptimizationId,
    pub name: String,

    /// The parameter search space.
    pub search_space: SearchSpace,

    pub strategy: StrategyKind,

    /// Maximum number of trials to run.
    pub max_trials: usize,

    /// How many trials to run in parallel.
    pub concurrency: usize,

    /// Direction of optimization.
    pub direction: ObjectiveDirection,

    /// Exploration weight for Bayesian search (ignored for random).
    pub exploration_weight: f64,

    /// Fraction of observations treated as elite by Bayesian search.
    pub gamma: f64,

    /// Seed for the strategy RNG; `None` draws from the OS.
    pub seed: Option<u64>,

    pub created_at: DateTime<Utc>,
}

impl OptimizationConfig {
    pub fn new(name: String, search_space: SearchSpace, strategy: StrategyKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            search_space,
            strategy,
            max_trials: 1000,
            concurrency: 8,
            direction: ObjectiveDirection::Minimize,
            exploration_weight: 0.3,
            gamma: 0.25,
            seed: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = n;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn with_direction(mut self, direction: ObjectiveDirection) -> Self {
        self.direction = direction;
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
}

/// Lifecycle state for an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate status of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStatus {
    pub id: OptimizationId,
    pub name: String,
    pub direction: ObjectiveDirection,
    pub state: OptimizationState,
    pub trials_completed: usize,
    pub trials_pruned: usize,
    pub trials_failed: usize,
    pub best_trial: Option<TrialResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl OptimizationStatus {
    pub fn new(config: &OptimizationConfig) -> Self {
        Self {
            id: config.id,
            name: config.name.clone(),
            direction: config.direction,
            state: OptimizationState::Pending,
            trials_completed: 0,
            trials_pruned: 0,
            trials_failed: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = OptimizationState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = OptimizationState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = OptimizationState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Trials that reached a terminal state.
    pub fn trials_finished(&self) -> usize {
        self.trials_completed + self.trials_pruned + self.trials_failed
    }

    /// Update the best trial if `result` improves on the current best.
    pub fn update_best(&mut self, result: &TrialResult) {
        let improved = match &self.best_trial {
            None => true,
            Some(current_best) => self
                .direction
                .improves(result.objective, current_best.objective),
        };
        if improved {
            self.best_trial = Some(result.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial (one parameter assignment evaluated once).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub optimization_id: OptimizationId,
    pub trial_number: usize,
    pub parameters: ParameterSet,
    pub status: TrialStatus,
    pub result: Option<TrialResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub prune_reason: Option<PruneReason>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(
        optimization_id: OptimizationId,
        trial_number: usize,
        parameters: ParameterSet,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            optimization_id,
            trial_number,
            parameters,
            status: TrialStatus::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            worker_id: None,
            prune_reason: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self, worker_id: Option<String>) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
        self.worker_id = worker_id;
    }

    pub fn mark_completed(&mut self, result: TrialResult) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn mark_pruned(&mut self, reason: PruneReason) {
        self.status = TrialStatus::Pruned;
        self.finished_at = Some(Utc::now());
        self.prune_reason = Some(reason);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Record an objective outcome on the trial.
    pub fn finish(&mut self, outcome: TrialOutcome) {
        match outcome {
            TrialOutcome::Scored(objective) => {
                let duration_ms = self
                    .started_at
                    .map(|started| (Utc::now() - started).num_milliseconds().max(0) as u64);
                let result = TrialResult {
                    trial_id: self.id,
                    trial_number: self.trial_number,
                    objective,
                    parameters: self.parameters.clone(),
                    duration_ms,
                };
                self.mark_completed(result);
            }
            TrialOutcome::Pruned(reason) => self.mark_pruned(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Pruned,
    Failed,
}

/// Result of a single scored trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: Uuid,
    pub trial_number: usize,
    pub objective: f64,
    pub parameters: ParameterSet,
    pub duration_ms: Option<u64>,
}
