//! # ht-optimizer
//!
//! Parameter search and parallel study orchestration for Hypertrial.
//!
//! Provides search space definitions, sampling strategies (random and
//! adaptive), trial tracking, and a [`Study`] that evaluates a fixed trial
//! budget across a fixed-size worker pool.

mod search;
mod study;
mod trial;

pub use search::{
    BayesianSearch, ParameterDef, ParameterKind, ParameterSet, ParameterValue, RandomSearch,
    SearchSpace, SearchStrategy, StrategyKind,
};
pub use study::{build_strategy, Objective, Study, TrialContext};
pub use trial::{
    ObjectiveDirection, OptimizationConfig, OptimizationId, OptimizationState,
    OptimizationStatus, Trial, TrialResult, TrialStatus,
};
