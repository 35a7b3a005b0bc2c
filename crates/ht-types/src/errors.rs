use thiserror::Error;

/// Main error type for Hypertrial
#[derive(Error, Debug)]
pub enum HtError {
    #[error("Search space error: {0}")]
    Search(#[from] SearchError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Search space construction and sampling errors.
///
/// These are construction-time defects: a study refuses to start while any
/// of them is present.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid range for {name}: low {low} is greater than high {high}")]
    InvalidRange { name: String, low: f64, high: f64 },

    #[error("Range for {name} must have finite bounds and width, got [{low}, {high}]")]
    NonFiniteRange { name: String, low: f64, high: f64 },

    #[error("Log-uniform parameter {name} needs a positive lower bound, got {low}")]
    NonPositiveLogBound { name: String, low: f64 },

    #[error("Categorical parameter {name} has no choices")]
    EmptyChoice { name: String },

    #[error("Parameter declared more than once: {name}")]
    DuplicateParameter { name: String },

    #[error("Missing sampled value for parameter: {name}")]
    MissingParameter { name: String },

    #[error("Value for {name} is outside its declared domain: {value}")]
    OutOfDomain { name: String, value: String },

    #[error("Parameter {name} is not a {expected}")]
    TypeMismatch { name: String, expected: String },

    #[error("Search space has no parameters")]
    Empty,
}

/// Errors raised while driving the external binary.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process produced no output to parse an objective from")]
    EmptyOutput,

    #[error("Last output token {token:?} is not a number")]
    MalformedOutput { token: String },
}

/// Result type alias for Hypertrial operations
pub type HtResult<T> = Result<T, HtError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::HtError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::HtError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HtError::Config(format!($($arg)*))
    };
}
