//! Search space of the self-play training binary.

use ht_optimizer::{ParameterValue, SearchSpace};
use ht_types::{validation_error, HtResult};
use serde::{Deserialize, Serialize};

/// Inclusive integer bounds supplied by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntBounds {
    pub low: i64,
    pub high: i64,
}

impl IntBounds {
    pub fn new(low: i64, high: i64) -> HtResult<Self> {
        if low > high {
            return Err(validation_error!("lower bound {low} is greater than upper bound {high}"));
        }
        Ok(Self { low, high })
    }
}

/// Every key the binary reads from `--config`, with its sampling rule.
///
/// `simulation_cycles` has no sensible default range and must be given
/// explicitly.
pub fn selfplay_search_space(simulation_cycles: IntBounds) -> SearchSpace {
    SearchSpace::new()
        .add_log_uniform("train_learning_rate", 1e-5, 1e-2)
        .add_log_uniform("train_l2_regularization", 1e-10, 1e-2)
        .add_power_of_two_choice("train_replay_buffer", 8, 14)
        .add_power_of_two_choice("train_epochs", 0, 8)
        .add_power_of_two_choice("train_batch_size", 3, 8)
        .add_int("simulation_cycles", simulation_cycles.low, simulation_cycles.high)
        .add_power_of_two_choice("simulation_cycle_games", 5, 11)
        .add_float("simulation_temperature", 0.3, 1.0)
        .add_power_of_two_choice("mcts_iterations", 5, 9)
        .add_float("mcts_exploration", 0.3, 3.0)
        .add_constant("eval_size", ParameterValue::Int(200))
        .add_constant("eval_temperature", ParameterValue::Float(0.1))
        .add_constant("timeout", ParameterValue::Int(300))
}
