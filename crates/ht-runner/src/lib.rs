//! # ht-runner
//!
//! Drives an external binary through a hyperparameter search. Each trial
//! samples the self-play search space, launches the binary with the sample
//! as `--config <json>`, and reads the objective from its output.

pub mod runner;
pub mod space;
pub mod tune;

pub use runner::{
    encode_payload, parse_objective, Invocation, MalformedOutputPolicy, ProcessRunner,
};
pub use space::{selfplay_search_space, IntBounds};
pub use tune::{run_search, TuneConfig};
