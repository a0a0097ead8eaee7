//! Error taxonomy and retry semantics for the pipeline domain.
//!
//! Errors are layered the same way the call path is:
//!
//! - [`InferenceError`]: one failed call to the inference dependency.
//! - [`ValidationError`]: a response arrived but did not conform to the
//!   stage's schema.
//! - [`ExecutionError`]: a task executor gave up on producing an artifact.
//! - [`PreconditionError`]: an orchestrator operation was invoked against
//!   the wrong stage or status.
//! - [`PipelineError`]: everything the orchestrator surfaces to callers.
//!
//! [`Retryability`] is a cross-cutting concern: any error type that
//! participates in retry decisions must be able to produce one.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Operation, ProjectId, StageId, StageStatus, Timestamp, Violation};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: rate limiting, timeouts, server errors.
/// - `NonRetryable` errors: malformed requests the dependency rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Retryability {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from a `Retry-After` response header).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

/// Classification of a single failed attempt, matched against
/// [`crate::RetryPolicy::retryable_error_kinds`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimited,
    Timeout,
    ServerError,
    BadRequest,
    /// The response was received but failed schema validation.
    InvalidOutput,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Timeout => "timeout",
            FailureKind::ServerError => "server_error",
            FailureKind::BadRequest => "bad_request",
            FailureKind::InvalidOutput => "invalid_output",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Inference dependency errors
// ---------------------------------------------------------------------------

/// A single failed call to the inference dependency.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum InferenceError {
    /// The dependency asked us to slow down.
    #[error("inference dependency rate limited the request")]
    RateLimited {
        /// Server-provided hint for when to retry.
        retry_after: Option<Duration>,
    },

    /// The attempt did not complete within its deadline.
    #[error("inference call timed out after {after:?}")]
    Timeout { after: Duration },

    /// The dependency failed internally or could not be reached.
    #[error("inference dependency error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    ServerError {
        status: Option<u16>,
        message: String,
    },

    /// The dependency rejected the request as malformed; retrying cannot help.
    #[error("inference request rejected: {message}")]
    BadRequest { message: String },
}

impl InferenceError {
    pub fn kind(&self) -> FailureKind {
        match self {
            InferenceError::RateLimited { .. } => FailureKind::RateLimited,
            InferenceError::Timeout { .. } => FailureKind::Timeout,
            InferenceError::ServerError { .. } => FailureKind::ServerError,
            InferenceError::BadRequest { .. } => FailureKind::BadRequest,
        }
    }

    pub fn retryability(&self) -> Retryability {
        match self {
            InferenceError::RateLimited { retry_after } => Retryability::Retryable {
                after: *retry_after,
            },
            InferenceError::Timeout { .. } | InferenceError::ServerError { .. } => {
                Retryability::Retryable { after: None }
            }
            InferenceError::BadRequest { .. } => Retryability::NonRetryable,
        }
    }

    /// Whether this failure says something about the dependency's health.
    ///
    /// A rejected request proves the dependency is up and answering.
    pub fn indicates_unhealthy(&self) -> bool {
        !matches!(self, InferenceError::BadRequest { .. })
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// Dependency output was received but did not conform to the stage schema.
///
/// Carries every violated field, in schema order.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("output failed validation: {}", summary(.violations))]
pub struct ValidationError {
    violations: Vec<Violation>,
}

fn summary(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Distinct violated field paths, in the order first reported.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::with_capacity(self.violations.len());
        for v in &self.violations {
            if !fields.contains(&v.field.as_str()) {
                fields.push(&v.field);
            }
        }
        fields
    }
}

// ---------------------------------------------------------------------------
// Executor errors
// ---------------------------------------------------------------------------

/// Category of an [`ExecutionError`]; the CLI maps each to an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    CircuitOpen,
    RetriesExhausted,
    ValidationFailed,
    Timeout,
    Rejected,
    Cancelled,
    Internal,
}

impl ExecutionErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionErrorKind::CircuitOpen => "circuit_open",
            ExecutionErrorKind::RetriesExhausted => "retries_exhausted",
            ExecutionErrorKind::ValidationFailed => "validation_failed",
            ExecutionErrorKind::Timeout => "timeout",
            ExecutionErrorKind::Rejected => "rejected",
            ExecutionErrorKind::Cancelled => "cancelled",
            ExecutionErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task executor could not produce an artifact.
///
/// No artifact is committed when this is returned, so the same orchestrator
/// operation can be retried by the caller without side effects.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    /// The circuit breaker presumes the dependency unhealthy; nothing was attempted.
    #[error("{stage}: inference dependency unavailable (circuit open)")]
    CircuitOpen { stage: StageId },

    /// Transient failures persisted past the retry budget.
    #[error("{stage}: gave up after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        stage: StageId,
        attempts: u32,
        last: InferenceError,
    },

    /// The dependency kept returning non-conformant output, repair included.
    #[error("{stage}: {error}")]
    ValidationFailed {
        stage: StageId,
        error: ValidationError,
    },

    /// The caller-supplied deadline for the whole run elapsed.
    #[error("{stage}: deadline of {after:?} elapsed")]
    Timeout { stage: StageId, after: Duration },

    /// The dependency rejected the request; retrying cannot help.
    #[error("{stage}: {error}")]
    Rejected {
        stage: StageId,
        error: InferenceError,
    },

    /// The run was aborted before it produced a result.
    #[error("{stage}: execution cancelled")]
    Cancelled { stage: StageId },

    /// Stage input could not be prepared (e.g. a stored artifact no longer decodes).
    #[error("{stage}: {message}")]
    Internal { stage: StageId, message: String },
}

impl ExecutionError {
    pub fn kind(&self) -> ExecutionErrorKind {
        match self {
            ExecutionError::CircuitOpen { .. } => ExecutionErrorKind::CircuitOpen,
            ExecutionError::RetriesExhausted { .. } => ExecutionErrorKind::RetriesExhausted,
            ExecutionError::ValidationFailed { .. } => ExecutionErrorKind::ValidationFailed,
            ExecutionError::Timeout { .. } => ExecutionErrorKind::Timeout,
            ExecutionError::Rejected { .. } => ExecutionErrorKind::Rejected,
            ExecutionError::Cancelled { .. } => ExecutionErrorKind::Cancelled,
            ExecutionError::Internal { .. } => ExecutionErrorKind::Internal,
        }
    }

    /// The stage whose executor failed.
    pub fn stage(&self) -> StageId {
        match self {
            ExecutionError::CircuitOpen { stage }
            | ExecutionError::RetriesExhausted { stage, .. }
            | ExecutionError::ValidationFailed { stage, .. }
            | ExecutionError::Timeout { stage, .. }
            | ExecutionError::Rejected { stage, .. }
            | ExecutionError::Cancelled { stage }
            | ExecutionError::Internal { stage, .. } => *stage,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator errors
// ---------------------------------------------------------------------------

/// An orchestrator operation was invoked against the wrong stage or status.
///
/// Returned before any executor runs; pipeline state is untouched.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PreconditionError {
    #[error("cannot {operation}: stage {stage} is {actual}")]
    InvalidTransition {
        operation: Operation,
        stage: StageId,
        actual: StageStatus,
    },

    #[error("cannot advance: {stage} is the final stage")]
    PipelineComplete { stage: StageId },

    #[error("cannot revise: stage {stage} reached the limit of {limit} revisions")]
    RevisionLimitReached { stage: StageId, limit: u32 },

    #[error("project has been idle since {since}; reset it to continue")]
    Expired { since: Timestamp },
}

/// Failure of a persistence collaborator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("pipeline store I/O failed: {0}")]
    Io(String),

    #[error("stored pipeline state is corrupt: {0}")]
    Corrupt(String),
}

/// Errors surfaced by orchestrator operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The orchestrator or one of its inputs is misconfigured.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}
