//! Persistence adapters for [`pipeline::PipelineStore`].
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Each adapter saves and restores the serialised
//! [`pipeline::PipelineState`] snapshot; neither interprets it.
//!
//! | Adapter | Backing |
//! |---------|---------|
//! | [`InMemoryStore`] | process memory; tests and one-shot runs |
//! | [`JsonFileStore`] | one JSON document per project in a directory |

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::InMemoryStore;
