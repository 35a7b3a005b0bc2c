//! Study driver: runs a trial budget across a fixed-size worker pool.
//!
//! Workers claim trial numbers, ask the strategy for a sample, evaluate the
//! objective and report scores back. Finished trials are streamed over a
//! channel to the calling thread, which owns progress reporting and the
//! aggregate [`OptimizationStatus`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_channel::Sender;
use ht_types::{config_error, internal_error, HtError, HtResult, SearchError, TrialOutcome};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::search::{
    BayesianSearch, ParameterSet, ParameterValue, RandomSearch, SearchStrategy, StrategyKind,
};
use crate::trial::{OptimizationConfig, OptimizationStatus, Trial, TrialResult, TrialStatus};

/// Read-only view of one trial handed to the objective.
#[derive(Debug)]
pub struct TrialContext<'a> {
    trial: &'a Trial,
    worker: usize,
}

impl<'a> TrialContext<'a> {
    pub fn new(trial: &'a Trial, worker: usize) -> Self {
        Self { trial, worker }
    }

    pub fn trial_id(&self) -> Uuid {
        self.trial.id
    }

    pub fn trial_number(&self) -> usize {
        self.trial.trial_number
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Full assignment, constants included.
    pub fn params(&self) -> &ParameterSet {
        &self.trial.parameters
    }

    pub fn value(&self, name: &str) -> HtResult<&ParameterValue> {
        self.trial.parameters.get(name).ok_or_else(|| {
            SearchError::MissingParameter {
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn float(&self, name: &str) -> HtResult<f64> {
        self.value(name)?.as_f64().ok_or_else(|| type_mismatch(name, "float"))
    }

    pub fn int(&self, name: &str) -> HtResult<i64> {
        self.value(name)?.as_i64().ok_or_else(|| type_mismatch(name, "integer"))
    }
}

fn type_mismatch(name: &str, expected: &str) -> HtError {
    SearchError::TypeMismatch {
        name: name.to_string(),
        expected: expected.to_string(),
    }
    .into()
}

/// Something that scores a trial.
///
/// Called concurrently from every worker, so implementations must not keep
/// per-call mutable state. Returning `Err` aborts the whole study; a trial
/// that should merely be discarded returns [`TrialOutcome::Pruned`].
pub trait Objective: Sync {
    fn evaluate(&self, ctx: &TrialContext<'_>) -> HtResult<TrialOutcome>;
}

impl<F> Objective for F
where
    F: Fn(&TrialContext<'_>) -> HtResult<TrialOutcome> + Sync,
{
    fn evaluate(&self, ctx: &TrialContext<'_>) -> HtResult<TrialOutcome> {
        self(ctx)
    }
}

enum TrialEvent {
    Finished(Trial),
    Aborted { trial: Option<Trial>, error: HtError },
}

/// Build the strategy named by the config.
pub fn build_strategy(config: &OptimizationConfig) -> Box<dyn SearchStrategy> {
    let space = config.search_space.clone();
    match config.strategy {
        StrategyKind::Random => match config.seed {
            Some(seed) => Box::new(RandomSearch::with_seed(space, seed)),
            None => Box::new(RandomSearch::new(space)),
        },
        StrategyKind::Bayesian => {
            let mut search = BayesianSearch::new(space, config.exploration_weight, config.direction)
                .with_gamma(config.gamma);
            if let Some(seed) = config.seed {
                search = search.with_seed(seed);
            }
            Box::new(search)
        }
    }
}

/// An optimization run. Owns the search history for its whole lifetime and
/// is shared by reference with the worker pool.
pub struct Study {
    config: OptimizationConfig,
    strategy: Mutex<Box<dyn SearchStrategy>>,
    status: Mutex<OptimizationStatus>,
    trials: Mutex<Vec<Trial>>,
}

impl Study {
    pub fn new(config: OptimizationConfig) -> HtResult<Self> {
        let strategy = build_strategy(&config);
        Self::with_strategy(config, strategy)
    }

    pub fn with_strategy(
        config: OptimizationConfig,
        strategy: Box<dyn SearchStrategy>,
    ) -> HtResult<Self> {
        config.search_space.validate()?;
        if config.concurrency == 0 {
            return Err(config_error!("concurrency must be at least 1"));
        }

        let status = OptimizationStatus::new(&config);
        Ok(Self {
            config,
            strategy: Mutex::new(strategy),
            status: Mutex::new(status),
            trials: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    pub fn status(&self) -> OptimizationStatus {
        self.status.lock().clone()
    }

    pub fn best_trial(&self) -> Option<TrialResult> {
        self.status.lock().best_trial.clone()
    }

    /// Finished trials ordered by trial number.
    pub fn trials(&self) -> Vec<Trial> {
        let mut trials = self.trials.lock().clone();
        trials.sort_by_key(|t| t.trial_number);
        trials
    }

    /// Run up to `max_trials` evaluations across `concurrency` workers.
    ///
    /// Trials may finish in any order. The first objective error stops new
    /// trials from being claimed, lets in-flight trials drain and is then
    /// returned.
    pub fn optimize<O: Objective>(&self, objective: &O) -> HtResult<OptimizationStatus> {
        let budget = self.config.max_trials;
        let workers = self.config.concurrency.min(budget).max(1);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("ht-worker-{i}"))
            .build()
            .map_err(|e| internal_error!("failed to build worker pool: {e}"))?;

        self.status.lock().mark_running();
        {
            let strategy = self.strategy.lock();
            info!(
                study = %self.config.name,
                strategy = strategy.name(),
                trials = budget,
                workers,
                direction = ?self.config.direction,
                "optimization started"
            );
        }

        let next_trial = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let (tx, rx) = crossbeam_channel::unbounded::<TrialEvent>();
        let mut first_error: Option<HtError> = None;

        pool.in_place_scope(|scope| {
            let next_trial = &next_trial;
            let stop = &stop;
            for worker in 0..workers {
                let tx = tx.clone();
                scope.spawn(move |_| self.run_worker(worker, objective, next_trial, stop, &tx));
            }
            drop(tx);

            for event in rx.iter() {
                self.record(event, &mut first_error);
            }
        });

        let mut status = self.status.lock();
        match first_error {
            Some(err) => {
                status.mark_failed(err.to_string());
                error!(
                    study = %self.config.name,
                    finished = status.trials_finished(),
                    error = %err,
                    "optimization aborted"
                );
                Err(err)
            }
            None => {
                status.mark_completed();
                info!(
                    study = %self.config.name,
                    completed = status.trials_completed,
                    pruned = status.trials_pruned,
                    best = ?status.best_trial.as_ref().map(|b| b.objective),
                    "optimization finished"
                );
                Ok(status.clone())
            }
        }
    }

    /// Sample one trial: ask the strategy, then merge in constants.
    fn ask(&self, trial_number: usize) -> HtResult<Trial> {
        let sampled = {
            let mut strategy = self.strategy.lock();
            let name = strategy.name().to_string();
            strategy
                .suggest(1)
                .pop()
                .ok_or_else(|| internal_error!("strategy {name} produced no suggestion"))?
        };
        let parameters = self.config.search_space.materialize(&sampled)?;
        Ok(Trial::new(self.config.id, trial_number, parameters))
    }

    fn run_worker<O: Objective>(
        &self,
        worker: usize,
        objective: &O,
        next_trial: &AtomicUsize,
        stop: &AtomicBool,
        tx: &Sender<TrialEvent>,
    ) {
        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            let trial_number = next_trial.fetch_add(1, Ordering::SeqCst);
            if trial_number >= self.config.max_trials {
                break;
            }

            let mut trial = match self.ask(trial_number) {
                Ok(trial) => trial,
                Err(error) => {
                    stop.store(true, Ordering::SeqCst);
                    let _ = tx.send(TrialEvent::Aborted { trial: None, error });
                    break;
                }
            };
            trial.mark_running(Some(format!("worker-{worker}")));
            debug!(trial = trial_number, worker, "trial started");

            let result = objective.evaluate(&TrialContext::new(&trial, worker));
            let event = match result {
                Ok(outcome) => {
                    if let Some(value) = outcome.score() {
                        self.strategy.lock().report(&trial.parameters, value);
                    }
                    trial.finish(outcome);
                    TrialEvent::Finished(trial)
                }
                Err(error) => {
                    stop.store(true, Ordering::SeqCst);
                    trial.mark_failed(error.to_string());
                    TrialEvent::Aborted {
                        trial: Some(trial),
                        error,
                    }
                }
            };

            if tx.send(event).is_err() {
                break;
            }
        }
    }

    fn record(&self, event: TrialEvent, first_error: &mut Option<HtError>) {
        let budget = self.config.max_trials;
        let mut status = self.status.lock();

        let trial = match event {
            TrialEvent::Finished(trial) => {
                match trial.status {
                    TrialStatus::Completed => {
                        status.trials_completed += 1;
                        if let Some(result) = &trial.result {
                            status.update_best(result);
                            info!(
                                trial = trial.trial_number,
                                progress = %format!("{}/{}", status.trials_finished(), budget),
                                objective = result.objective,
                                best = ?status.best_trial.as_ref().map(|b| b.objective),
                                "trial completed"
                            );
                        }
                    }
                    TrialStatus::Pruned => {
                        status.trials_pruned += 1;
                        warn!(
                            trial = trial.trial_number,
                            progress = %format!("{}/{}", status.trials_finished(), budget),
                            reason = %trial
                                .prune_reason
                                .as_ref()
                                .map(ToString::to_string)
                                .unwrap_or_default(),
                            "trial pruned"
                        );
                    }
                    other => {
                        debug!(
                            trial = trial.trial_number,
                            status = ?other,
                            "unexpected trial status"
                        );
                    }
                }
                Some(trial)
            }
            TrialEvent::Aborted { trial, error } => {
                status.trials_failed += 1;
                error!(
                    trial = ?trial.as_ref().map(|t| t.trial_number),
                    error = %error,
                    "trial failed, stopping"
                );
                if first_error.is_none() {
                    *first_error = Some(error);
                }
                trial
            }
        };
        drop(status);

        if let Some(trial) = trial {
            self.trials.lock().push(trial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchSpace;
    use crate::trial::{ObjectiveDirection, OptimizationState};
    use ht_types::PruneReason;
    use std::time::Duration;

    fn objective<F>(f: F) -> F
    where
        F: Fn(&TrialContext<'_>) -> HtResult<TrialOutcome> + Sync,
    {
        f
    }

    fn space() -> SearchSpace {
        SearchSpace::new()
            .add_float("x", 0.1, 0.9)
            .add_power_of_two_choice("batch", 3, 8)
            .add_constant("eval_size", ParameterValue::Int(200))
            .add_constant("eval_temperature", ParameterValue::Float(0.1))
    }

    fn config(trials: usize, workers: usize) -> OptimizationConfig {
        OptimizationConfig::new("study-test".into(), space(), StrategyKind::Random)
            .with_max_trials(trials)
            .with_concurrency(workers)
            .with_seed(Some(5))
    }

    #[test]
    fn runs_full_budget_and_tracks_minimum() {
        let study = Study::new(config(20, 4)).unwrap();
        let status = study
            .optimize(&objective(|ctx| Ok(TrialOutcome::Scored(ctx.float("x")?))))
            .unwrap();

        assert_eq!(status.state, OptimizationState::Completed);
        assert_eq!(status.trials_completed, 20);
        let trials = study.trials();
        assert_eq!(trials.len(), 20);
        assert!(trials.iter().enumerate().all(|(i, t)| t.trial_number == i));

        let min = trials
            .iter()
            .filter_map(|t| t.result.as_ref().map(|r| r.objective))
            .fold(f64::INFINITY, f64::min);
        assert_eq!(status.best_trial.unwrap().objective, min);
    }

    #[test]
    fn maximize_tracks_maximum() {
        let config = config(10, 2).with_direction(ObjectiveDirection::Maximize);
        let study = Study::new(config).unwrap();
        study
            .optimize(&objective(|ctx| Ok(TrialOutcome::Scored(ctx.float("x")?))))
            .unwrap();

        let max = study
            .trials()
            .iter()
            .filter_map(|t| t.result.as_ref().map(|r| r.objective))
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(study.best_trial().unwrap().objective, max);
    }

    #[test]
    fn pruned_trials_are_counted_but_not_scored() {
        let study = Study::new(config(10, 2)).unwrap();
        let status = study
            .optimize(&objective(|ctx| {
                if ctx.trial_number() % 2 == 1 {
                    Ok(TrialOutcome::Pruned(PruneReason::NonZeroExit { code: Some(1) }))
                } else {
                    Ok(TrialOutcome::Scored(ctx.float("x")?))
                }
            }))
            .unwrap();

        assert_eq!(status.trials_completed, 5);
        assert_eq!(status.trials_pruned, 5);
        assert_eq!(status.trials_failed, 0);
        let best = status.best_trial.unwrap();
        assert_eq!(best.trial_number % 2, 0);
        assert!(study
            .trials()
            .iter()
            .filter(|t| t.status == TrialStatus::Pruned)
            .all(|t| t.result.is_none()));
    }

    #[test]
    fn all_pruned_leaves_no_best() {
        let study = Study::new(config(4, 2)).unwrap();
        let status = study
            .optimize(&objective(|_| {
                Ok(TrialOutcome::Pruned(PruneReason::NonZeroExit { code: None }))
            }))
            .unwrap();
        assert_eq!(status.trials_pruned, 4);
        assert!(status.best_trial.is_none());
    }

    #[test]
    fn objective_error_aborts_run() {
        let study = Study::new(config(10, 1)).unwrap();
        let result = study.optimize(&objective(|ctx| {
            if ctx.trial_number() == 3 {
                Err(internal_error!("bad output"))
            } else {
                Ok(TrialOutcome::Scored(1.0))
            }
        }));

        assert!(matches!(result, Err(HtError::Internal(_))));
        let status = study.status();
        assert_eq!(status.state, OptimizationState::Failed);
        assert_eq!(status.trials_completed, 3);
        assert_eq!(status.trials_failed, 1);
        assert!(status.error.unwrap().contains("bad output"));
        // no trial was claimed after the failing one
        assert_eq!(study.trials().len(), 4);
    }

    #[test]
    fn constants_reach_every_trial() {
        let study = Study::new(config(12, 3)).unwrap();
        study
            .optimize(&objective(|ctx| {
                assert_eq!(ctx.int("eval_size")?, 200);
                assert_eq!(ctx.float("eval_temperature")?, 0.1);
                Ok(TrialOutcome::Scored(0.0))
            }))
            .unwrap();

        for trial in study.trials() {
            assert_eq!(trial.parameters.len(), 4);
            assert_eq!(
                trial.parameters.get("eval_size"),
                Some(&ParameterValue::Int(200))
            );
        }
    }

    #[test]
    fn workers_run_trials_in_parallel() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let study = Study::new(config(8, 4)).unwrap();
        study
            .optimize(&objective(|_| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(TrialOutcome::Scored(0.0))
            }))
            .unwrap();

        assert!(peak.load(Ordering::SeqCst) > 1);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[test]
    fn context_reports_type_mismatch() {
        let study = Study::new(config(1, 1)).unwrap();
        let result = study.optimize(&objective(|ctx| {
            ctx.int("x")?;
            Ok(TrialOutcome::Scored(0.0))
        }));
        assert!(matches!(
            result,
            Err(HtError::Search(SearchError::TypeMismatch { .. }))
        ));
    }

    #[test]
    fn bayesian_study_runs() {
        let config = OptimizationConfig::new("bayes".into(), space(), StrategyKind::Bayesian)
            .with_max_trials(30)
            .with_concurrency(3)
            .with_seed(Some(9));
        let study = Study::new(config).unwrap();
        let status = study
            .optimize(&objective(|ctx| {
                let x = ctx.float("x")?;
                Ok(TrialOutcome::Scored((x - 0.5).powi(2)))
            }))
            .unwrap();
        assert_eq!(status.trials_completed, 30);
        assert!(status.best_trial.unwrap().objective <= 0.01);
    }

    #[test]
    fn rejects_invalid_configuration() {
        let bad_space = SearchSpace::new().add_float("x", 1.0, 0.0);
        let config = OptimizationConfig::new("bad".into(), bad_space, StrategyKind::Random);
        assert!(matches!(
            Study::new(config),
            Err(HtError::Search(SearchError::InvalidRange { .. }))
        ));

        let unbounded = SearchSpace::new().add_float("x", 0.0, f64::INFINITY);
        let config = OptimizationConfig::new("unbounded".into(), unbounded, StrategyKind::Random);
        assert!(matches!(
            Study::new(config),
            Err(HtError::Search(SearchError::NonFiniteRange { .. }))
        ));

        assert!(matches!(
            Study::new(config_with_zero_workers()),
            Err(HtError::Config(_))
        ));
    }

    fn config_with_zero_workers() -> OptimizationConfig {
        config(5, 0)
    }

    #[test]
    fn zero_trial_budget_completes_immediately() {
        let study = Study::new(config(0, 2)).unwrap();
        let status = study
            .optimize(&objective(|_| Ok(TrialOutcome::Scored(0.0))))
            .unwrap();
        assert_eq!(status.state, OptimizationState::Completed);
        assert_eq!(status.trials_finished(), 0);
    }
}
