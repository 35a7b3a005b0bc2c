//! Subprocess trial runner.
//!
//! Each trial is one invocation of `<program> [args..] --config <json>`. The
//! objective is the last whitespace-delimited token of the process's whole
//! standard output.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use ht_optimizer::{Objective, ParameterSet, TrialContext};
use ht_types::{HtResult, PruneReason, RunnerError, TrialOutcome};
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, warn};

/// What to do when a process exits 0 but its output has no usable score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MalformedOutputPolicy {
    /// Fail the trial with an error, which stops the whole study.
    Abort,
    /// Treat the trial as pruned and keep going.
    Prune,
}

impl Default for MalformedOutputPolicy {
    fn default() -> Self {
        Self::Abort
    }
}

/// Exit status and captured stdout of one finished process.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
}

/// Runs the external binary once per trial.
///
/// Holds only immutable configuration, so one runner is shared by every
/// worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRunner {
    program: PathBuf,
    args: Vec<String>,
    config_flag: String,
    on_malformed: MalformedOutputPolicy,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            config_flag: "--config".to_string(),
            on_malformed: MalformedOutputPolicy::default(),
        }
    }

    /// Arguments placed before the config flag.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_config_flag(mut self, flag: impl Into<String>) -> Self {
        self.config_flag = flag.into();
        self
    }

    pub fn with_malformed_policy(mut self, policy: MalformedOutputPolicy) -> Self {
        self.on_malformed = policy;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Spawn the process with `payload` and block until it exits.
    ///
    /// Stdin is closed and stderr passes through to ours. Nothing bounds how
    /// long this waits.
    pub fn invoke(&self, payload: &str) -> HtResult<Invocation> {
        let program = self.program.display().to_string();
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(&self.config_flag)
            .arg(payload)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: program.clone(),
                source,
            })?;

        let output = child
            .wait_with_output()
            .map_err(|source| RunnerError::Wait { program, source })?;

        Ok(Invocation {
            status: output.status,
            stdout: output.stdout,
        })
    }

    /// Evaluate one parameter set.
    pub fn run(&self, params: &ParameterSet) -> HtResult<TrialOutcome> {
        let payload = encode_payload(params)?;
        debug!(program = %self.program.display(), %payload, "launching trial process");

        let invocation = self.invoke(&payload)?;
        if !invocation.status.success() {
            let code = invocation.status.code();
            debug!(?code, "trial process failed");
            return Ok(TrialOutcome::Pruned(PruneReason::NonZeroExit { code }));
        }

        match parse_objective(&invocation.stdout) {
            Ok(score) => {
                let outcome = TrialOutcome::from_objective(score);
                if let TrialOutcome::Pruned(reason) = &outcome {
                    warn!(%reason, "pruning trial");
                }
                Ok(outcome)
            }
            Err(err) => match self.on_malformed {
                MalformedOutputPolicy::Abort => Err(err.into()),
                MalformedOutputPolicy::Prune => {
                    warn!(error = %err, "pruning trial with malformed output");
                    Ok(TrialOutcome::Pruned(PruneReason::MalformedOutput {
                        detail: err.to_string(),
                    }))
                }
            },
        }
    }
}

impl Objective for ProcessRunner {
    fn evaluate(&self, ctx: &TrialContext<'_>) -> HtResult<TrialOutcome> {
        let _span =
            debug_span!("trial", number = ctx.trial_number(), worker = ctx.worker()).entered();
        self.run(ctx.params())
    }
}

/// Encode a parameter set as the single JSON object passed on the command line.
pub fn encode_payload(params: &ParameterSet) -> HtResult<String> {
    Ok(serde_json::to_string(params)?)
}

/// Parse the objective from the last whitespace-delimited token of `stdout`.
///
/// `nan` and `inf` parse successfully; the caller decides what they mean.
pub fn parse_objective(stdout: &[u8]) -> Result<f64, RunnerError> {
    let text = String::from_utf8_lossy(stdout);
    let token = text
        .split_whitespace()
        .next_back()
        .ok_or(RunnerError::EmptyOutput)?;

    token.parse::<f64>().map_err(|_| RunnerError::MalformedOutput {
        token: token.to_string(),
    })
}
