//! Inference provider adapter.
//!
//! Implements [`pipeline::InferenceProvider`] for any service that speaks the
//! OpenAI-compatible chat-completions protocol.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Translates [`pipeline::InferenceRequest`] into an HTTP
//! call and classifies every failure into a [`pipeline::InferenceError`]
//! kind. Retrying, circuit breaking, and validation are the caller's job.

mod classify;
mod provider;
mod wire;

pub use classify::{classify_status, classify_transport, parse_retry_after};
pub use provider::{OpenAiCompatibleProvider, ProviderConfig, ProviderConfigError, DEFAULT_BASE_URL};
