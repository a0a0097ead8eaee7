//! Command output and exit codes.
//!
//! Successful commands print JSON to stdout. Failures print the error to
//! stderr and exit with a code identifying its kind:
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | success |
//! | 2 | configuration or bootstrap failure |
//! | 3 | project not found |
//! | 4 | precondition violated (wrong stage or status, limit reached, expired) |
//! | 5 | circuit open |
//! | 6 | retries exhausted |
//! | 7 | output failed validation |
//! | 8 | run deadline elapsed |
//! | 9 | request rejected by the inference service |
//! | 10 | run cancelled |
//! | 11 | store failure or internal error |

use std::process::ExitCode;

use nodes::Orchestrator;
use pipeline::{ExecutionErrorKind, PipelineError, PipelineState, ProjectName};
use serde::Serialize;

pub const EXIT_CONFIGURATION: u8 = 2;

pub fn exit_code(error: &PipelineError) -> u8 {
    match error {
        PipelineError::Configuration { .. } => EXIT_CONFIGURATION,
        PipelineError::ProjectNotFound(_) => 3,
        PipelineError::Precondition(_) => 4,
        PipelineError::Execution(e) => match e.kind() {
            ExecutionErrorKind::CircuitOpen => 5,
            ExecutionErrorKind::RetriesExhausted => 6,
            ExecutionErrorKind::ValidationFailed => 7,
            ExecutionErrorKind::Timeout => 8,
            ExecutionErrorKind::Rejected => 9,
            ExecutionErrorKind::Cancelled => 10,
            ExecutionErrorKind::Internal => 11,
        },
        PipelineError::Store(_) => 11,
    }
}

fn fail(error: &PipelineError) -> ExitCode {
    tracing::error!(error = %error, "command failed");
    eprintln!("error: {error}");
    ExitCode::from(exit_code(error))
}

fn print<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: output does not serialise: {e}");
            ExitCode::from(11)
        }
    }
}

pub fn show(result: Result<PipelineState, PipelineError>) -> ExitCode {
    match result {
        Ok(state) => print(&state),
        Err(e) => fail(&e),
    }
}

pub async fn create(orchestrator: &Orchestrator, name: ProjectName, question: String) -> ExitCode {
    match orchestrator.create_project(name, question).await {
        Ok(project_id) => print(&serde_json::json!({ "project_id": project_id })),
        Err(e) => fail(&e),
    }
}

pub async fn list(orchestrator: &Orchestrator) -> ExitCode {
    match orchestrator.list_projects().await {
        Ok(ids) => print(&ids),
        Err(e) => fail(&e),
    }
}
