//! Core domain for the survey-research pipeline.
//!
//! This crate contains every domain concept, identifier, shared value type,
//! and error used throughout the workspace, together with the resilience
//! primitives that guard the inference dependency. Infrastructure crates
//! implement the traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ProjectId`, `ProjectName`, `ModelName`) |
//! | [`types`] | Shared value types (`TokenCount`, `TokenUsage`, `Timestamp`) |
//! | [`stage`] | Stage order and the approval transition table |
//! | [`artifact`] | Immutable, versioned stage outputs |
//! | [`state`] | Per-project `PipelineState` and its transitions |
//! | [`breaker`] | Circuit breaker and clock abstraction |
//! | [`retry`] | Exponential-backoff retry policy |
//! | [`metrics`] | Lock-free per-stage call metrics |
//! | [`schema`] | Structured-output schemas and validation |
//! | [`errors`] | Error taxonomy and retry semantics |
//! | [`ports`] | Inference and persistence port traits |

pub mod artifact;
pub mod breaker;
pub mod errors;
pub mod identifiers;
pub mod metrics;
pub mod ports;
pub mod retry;
pub mod schema;
pub mod stage;
pub mod state;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use artifact::Artifact;
pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker, Clock, ManualClock, Permit, SystemClock};
pub use errors::{
    ExecutionError, ExecutionErrorKind, FailureKind, InferenceError, PipelineError,
    PreconditionError, Retryability, StoreError, ValidationError,
};
pub use identifiers::{ModelName, ProjectId, ProjectName};
pub use metrics::{CallEvent, MetricsCollector, MetricsSnapshot};
pub use ports::{InferenceProvider, InferenceRequest, InferenceResponse, PipelineStore};
pub use retry::RetryPolicy;
pub use schema::{extract_json, parse_structured, FieldSpec, FieldType, Problem, Schema, Violation};
pub use stage::{Operation, ReviewAction, StageId, StageStatus};
pub use state::{PipelineState, ResearchBrief, StageRecord};
pub use types::{Timestamp, TokenCount, TokenUsage};
