//! Survey pipeline orchestration: task executors and the pipeline orchestrator.
//!
//! This crate provides the generic [`TaskExecutor`] that wraps every inference
//! call in the breaker-consulting retry loop, validates and repairs the
//! structured output, and meters each attempt; the five stage implementations
//! (framing through analysis); and the [`Orchestrator`] that sequences them
//! behind the human approve/revise workflow.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Executors sequence calls between business logic in
//! the [`pipeline`] crate and the infrastructure behind its port traits
//! (inference provider, pipeline store). Domain rules live in [`pipeline`].
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`retry`] | Backoff loop that consults the breaker before every attempt |
//! | [`context`] | `ExecutionContext`: provider, breaker, metrics, policies |
//! | [`executor`] | `StageDefinition`, `TaskExecutor`, `ExecutionHandle` |
//! | [`runner`] | Type-erased `StageRunner` used by the orchestrator |
//! | [`stages`] | Stage definitions and payload models |
//! | [`orchestrator`] | `Orchestrator`, `StageRegistry`, `OrchestratorConfig` |

pub mod context;
pub mod executor;
pub mod orchestrator;
pub mod retry;
pub mod runner;
pub mod stages;

pub use context::{ExecutionContext, DEFAULT_ATTEMPT_TIMEOUT};
pub use executor::{ExecutionHandle, RunOptions, StageDefinition, StageRequest, TaskExecutor};
pub use orchestrator::{Orchestrator, OrchestratorConfig, StageRegistry, DEFAULT_MAX_REVISIONS};
pub use retry::{AttemptError, RetryError};
pub use runner::{submit_erased, InputScope, StageRunner};
