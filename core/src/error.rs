//! Error types for the routine engine
//!
//! Errors fall into three families:
//! - user-code failures (`ContinuationError`, `RoutineError`, `JoinError`,
//!   `PlaceholderError`) which are captured and handed back as data
//! - drain results (`DrainError`, `AggregateError`) which report user-code
//!   failures observed during one `drain` call
//! - engine defects and setup failures (`EngineError`, `StartError`)

use thiserror::Error;

use crate::scheduler::operation::OperationHandle;

/* ===================== User-code failures ===================== */

/// Failure of a single posted continuation
#[derive(Debug, Error)]
pub enum ContinuationError {
    /// The continuation panicked while executing
    #[error("continuation panicked: {message}")]
    Panicked {
        message: String,
        operation: Option<OperationHandle>,
    },

    /// The continuation returned an error
    #[error(transparent)]
    Failed(anyhow::Error),
}

impl ContinuationError {
    /// Operation the failed item represented, when known
    pub fn operation(&self) -> Option<&OperationHandle> {
        match self {
            ContinuationError::Panicked { operation, .. } => operation.as_ref(),
            ContinuationError::Failed(_) => None,
        }
    }
}

/// Marker error for cooperative cancellation
///
/// A routine that returns `Err(Cancelled.into())` while its own cancellation
/// token is cancelled ends in the `Cancelled` state rather than `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation was cancelled")]
pub struct Cancelled;

/// Terminal failure of a routine
#[derive(Debug, Error)]
pub enum RoutineError {
    #[error("routine failed: {0}")]
    Failed(anyhow::Error),

    #[error("routine panicked: {0}")]
    Panicked(String),

    #[error("routine was cancelled")]
    Cancelled,

    /// The result was already taken by an earlier accessor
    #[error("routine result was already taken")]
    ResultTaken,
}

impl RoutineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RoutineError::Cancelled)
    }
}

/// Failure of a spawned child task
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Failure of a completion placeholder
#[derive(Debug, Error)]
pub enum PlaceholderError {
    /// The host rejected the placeholder with an error
    #[error("placeholder rejected: {0}")]
    Rejected(anyhow::Error),

    /// The host cancelled the placeholder
    #[error("placeholder was cancelled")]
    Cancelled,

    /// The resolver was dropped without completing the placeholder
    #[error("placeholder resolver was dropped before completion")]
    Abandoned,
}

/* ===================== Drain results ===================== */

/// Two or more continuation failures observed within one drain, in order
#[derive(Debug, Error)]
#[error("{} continuations failed during drain", .errors.len())]
pub struct AggregateError {
    errors: Vec<ContinuationError>,
}

impl AggregateError {
    pub(crate) fn new(errors: Vec<ContinuationError>) -> Self {
        Self { errors }
    }

    /// Failures in order of occurrence
    pub fn errors(&self) -> &[ContinuationError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ContinuationError> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Error surfaced by `drain`/`pump`
#[derive(Debug, Error)]
pub enum DrainError {
    /// Exactly one item failed; the error is passed through unchanged
    #[error(transparent)]
    Continuation(ContinuationError),

    /// More than one item failed
    #[error(transparent)]
    Aggregate(AggregateError),

    /// The engine itself hit a defect; the drain was aborted
    ///
    /// `failures` holds the user-code failures collected before the abort.
    #[error("engine defect: {defect}")]
    Engine {
        #[source]
        defect: EngineError,
        failures: Vec<ContinuationError>,
    },
}

impl DrainError {
    /// Build the drain result from the failures collected during one drain
    pub(crate) fn from_failures(mut failures: Vec<ContinuationError>) -> Option<Self> {
        match failures.len() {
            0 => None,
            1 => failures.pop().map(DrainError::Continuation),
            _ => Some(DrainError::Aggregate(AggregateError::new(failures))),
        }
    }

    /// All user-code failures carried by this error, in order of occurrence
    pub fn continuation_errors(&self) -> Vec<&ContinuationError> {
        match self {
            DrainError::Continuation(err) => vec![err],
            DrainError::Aggregate(agg) => agg.errors().iter().collect(),
            DrainError::Engine { failures, .. } => failures.iter().collect(),
        }
    }
}

/* ===================== Engine defects and setup ===================== */

/// Defects inside the engine and setup failures
#[derive(Debug, Error)]
pub enum EngineError {
    /// Internal state was malformed; this is a bug in the engine, not user code
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),

    /// A helper that needs a current scheduling context was called outside one
    #[error("no scheduling context is installed on this thread")]
    NoAmbientContext,

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] std::io::Error),

    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Programming errors reported synchronously by `try_start`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error(
        "the routine function for '{routine}' returned no computation; \
         a routine function must return a valid future"
    )]
    MissingComputation { routine: String },
}
