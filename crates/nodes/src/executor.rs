//! The generic task executor shared by every inference-backed stage.
//!
//! A stage contributes only its [`StageDefinition`]: input and output types,
//! an output [`Schema`], instructions, and optional semantic checks. The
//! skeleton is the same for all of them:
//!
//! 1. ask the breaker for a permit (inside [`crate::retry::execute`]);
//! 2. call the inference provider under the per-attempt timeout;
//! 3. validate the response, switching to a repair prompt after the first
//!    invalid one (the repair consumes an attempt from the same budget);
//! 4. record a [`CallEvent`] per attempt, whatever the outcome;
//! 5. wrap the validated value in an [`Artifact`].
//!
//! [`TaskExecutor::run`] suspends the caller until the artifact or error is
//! available; [`TaskExecutor::submit`] spawns the identical future and hands
//! back an [`ExecutionHandle`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pipeline::{
    parse_structured, Artifact, CallEvent, ExecutionError, FailureKind, InferenceError,
    InferenceRequest, MetricsSnapshot, Schema, StageId, TokenCount, ValidationError, Violation,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::retry::{self, AttemptError, RetryError};
use crate::ExecutionContext;

/// Stage-specific half of a task executor.
pub trait StageDefinition: Send + Sync + 'static {
    type Input: Serialize + DeserializeOwned + Send + Sync + 'static;
    type Output: Serialize + DeserializeOwned + Send + Sync + 'static;

    fn stage(&self) -> StageId;

    /// Shape the model's JSON response must take.
    fn schema(&self) -> &Schema;

    /// System instructions sent with every request.
    fn instructions(&self) -> &str;

    /// Renders the stage input into the user prompt.
    fn render_input(&self, input: &Self::Input) -> String {
        serde_json::to_string_pretty(input).unwrap_or_default()
    }

    /// Rules the schema cannot express. Every returned violation is fed into
    /// the repair prompt.
    fn check(&self, _output: &Self::Output) -> Vec<Violation> {
        Vec::new()
    }
}

/// What the executor is asked to produce.
#[derive(Debug, Clone)]
pub enum StageRequest<I, O> {
    /// First artifact for the stage.
    Generate { input: I },
    /// Next revision of `prior`, guided by reviewer feedback.
    Revise {
        input: I,
        prior: Artifact<O>,
        feedback: String,
    },
}

impl<I, O> StageRequest<I, O> {
    pub fn input(&self) -> &I {
        match self {
            StageRequest::Generate { input } | StageRequest::Revise { input, .. } => input,
        }
    }

    /// Revision number the resulting artifact will carry.
    pub fn target_revision(&self) -> u32 {
        match self {
            StageRequest::Generate { .. } => 1,
            StageRequest::Revise { prior, .. } => prior.revision() + 1,
        }
    }
}

/// Caller-side limits for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Deadline for the whole run, retries and backoff included.
    pub deadline: Option<Duration>,
}

impl RunOptions {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct TaskExecutor<S> {
    definition: S,
    context: ExecutionContext,
}

impl<S: StageDefinition> TaskExecutor<S> {
    pub fn new(definition: S, context: ExecutionContext) -> Self {
        Self {
            definition,
            context,
        }
    }

    pub fn definition(&self) -> &S {
        &self.definition
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Produces an artifact, suspending the caller until it is ready.
    pub async fn run(
        &self,
        request: StageRequest<S::Input, S::Output>,
        options: RunOptions,
    ) -> Result<Artifact<S::Output>, ExecutionError> {
        let stage = self.definition.stage();
        let span = tracing::info_span!(
            "stage_run",
            stage = %stage,
            revision = request.target_revision(),
        );
        self.run_inner(request, options).instrument(span).await
    }

    /// Spawns [`run`](Self::run) onto the runtime and returns immediately.
    pub fn submit(
        self: &Arc<Self>,
        request: StageRequest<S::Input, S::Output>,
        options: RunOptions,
    ) -> ExecutionHandle<Artifact<S::Output>> {
        let executor = Arc::clone(self);
        ExecutionHandle::spawn(self.definition.stage(), async move {
            executor.run(request, options).await
        })
    }

    async fn run_inner(
        &self,
        request: StageRequest<S::Input, S::Output>,
        options: RunOptions,
    ) -> Result<Artifact<S::Output>, ExecutionError> {
        let stage = self.definition.stage();
        let started = Instant::now();
        let state = Mutex::new(RunState::default());

        let attempts = self.attempt_loop(&request, &state);
        let outcome = match options.deadline {
            None => attempts.await,
            Some(deadline) => match tokio::time::timeout(deadline, attempts).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // The in-flight attempt was dropped; it still counts as a call.
                    let in_flight = state.lock().in_flight.take();
                    if let Some(at) = in_flight {
                        self.record(&state, at.elapsed(), TokenCount::default(), false);
                    }
                    tracing::warn!(deadline_ms = millis(deadline), "run deadline elapsed");
                    return Err(ExecutionError::Timeout {
                        stage,
                        after: deadline,
                    });
                }
            },
        };

        let output = match outcome {
            Ok(output) => output,
            Err(failure) => {
                let error = self.classify(failure);
                if let ExecutionError::CircuitOpen { .. } = error {
                    if state.lock().metrics.call_count == 0 {
                        self.record(&state, Duration::ZERO, TokenCount::default(), false);
                    }
                }
                tracing::warn!(error_kind = %error.kind(), error = %error, "stage run failed");
                return Err(error);
            }
        };

        let mut metrics = state.lock().metrics;
        metrics.elapsed_ms = millis(started.elapsed());
        let artifact = match request {
            StageRequest::Generate { .. } => Artifact::first(stage, output, metrics),
            StageRequest::Revise { prior, .. } => Artifact::revision_of(&prior, output, metrics),
        };
        tracing::info!(
            revision = artifact.revision(),
            calls = metrics.call_count,
            tokens = metrics.total_tokens.as_u64(),
            elapsed_ms = metrics.elapsed_ms,
            "artifact produced"
        );
        Ok(artifact)
    }

    async fn attempt_loop(
        &self,
        request: &StageRequest<S::Input, S::Output>,
        state: &Mutex<RunState>,
    ) -> Result<S::Output, RetryError<AttemptFailure>> {
        retry::execute(&self.context.retry, &self.context.breaker, move |attempt| async move {
            self.attempt(attempt, request, state).await
        })
        .await
    }

    async fn attempt(
        &self,
        attempt: u32,
        request: &StageRequest<S::Input, S::Output>,
        state: &Mutex<RunState>,
    ) -> Result<S::Output, AttemptFailure> {
        let repair = state.lock().repair.clone();
        let timeout = self.context.attempt_timeout;
        let inference = InferenceRequest {
            system: self.definition.instructions().to_string(),
            prompt: self.prompt(request, repair.as_deref()),
            schema_hint: self.definition.schema().hint(),
            timeout,
        };

        let started = Instant::now();
        state.lock().in_flight = Some(started);
        let response = tokio::time::timeout(timeout, self.context.provider.complete(&inference)).await;
        state.lock().in_flight = None;
        let duration = started.elapsed();

        let (result, tokens) = match response {
            Err(_) => (
                Err(AttemptFailure::Inference(InferenceError::Timeout { after: timeout })),
                TokenCount::default(),
            ),
            Ok(Err(error)) => (Err(AttemptFailure::Inference(error)), TokenCount::default()),
            Ok(Ok(response)) => {
                let tokens = response.usage.total();
                (self.validate(&response.text, state), tokens)
            }
        };

        self.record(state, duration, tokens, result.is_ok());
        tracing::debug!(
            attempt,
            elapsed_ms = millis(duration),
            tokens = tokens.as_u64(),
            error_kind = result.as_ref().err().map(|e| e.kind().as_str()),
            repair = repair.is_some(),
            "inference attempt finished"
        );
        result
    }

    fn validate(&self, text: &str, state: &Mutex<RunState>) -> Result<S::Output, AttemptFailure> {
        let checked = parse_structured::<S::Output>(text, self.definition.schema()).and_then(|output| {
            let violations = self.definition.check(&output);
            if violations.is_empty() {
                Ok(output)
            } else {
                Err(ValidationError::new(violations))
            }
        });

        checked.map_err(|error| {
            let mut state = state.lock();
            let repairable = state.repair.is_none();
            if repairable {
                state.repair = Some(error.violations().to_vec());
            }
            tracing::info!(fields = ?error.fields(), repairable, "response failed validation");
            AttemptFailure::Invalid { error, repairable }
        })
    }

    fn prompt(&self, request: &StageRequest<S::Input, S::Output>, repair: Option<&[Violation]>) -> String {
        let input = self.definition.render_input(request.input());
        let mut prompt = match request {
            StageRequest::Generate { .. } => format!("Input:\n{input}"),
            StageRequest::Revise { prior, feedback, .. } => revision_prompt(
                &input,
                &serde_json::to_string_pretty(prior.payload()).unwrap_or_default(),
                feedback,
            ),
        };
        if let Some(violations) = repair {
            prompt.push_str("\n\n");
            prompt.push_str(&repair_note(violations));
        }
        prompt
    }

    fn record(&self, state: &Mutex<RunState>, duration: Duration, tokens: TokenCount, succeeded: bool) {
        let event = CallEvent {
            stage: self.definition.stage(),
            duration,
            tokens,
            succeeded,
        };
        self.context.metrics.record(&event);
        state.lock().metrics.record(&event);
    }

    fn classify(&self, failure: RetryError<AttemptFailure>) -> ExecutionError {
        let stage = self.definition.stage();
        match failure {
            RetryError::CircuitOpen { .. } => ExecutionError::CircuitOpen { stage },
            RetryError::Exhausted { attempts, last } => match last {
                AttemptFailure::Invalid { error, .. } => ExecutionError::ValidationFailed { stage, error },
                AttemptFailure::Inference(last) => ExecutionError::RetriesExhausted { stage, attempts, last },
            },
            RetryError::Aborted { attempts, error } => match error {
                AttemptFailure::Invalid { error, .. } => ExecutionError::ValidationFailed { stage, error },
                AttemptFailure::Inference(error @ InferenceError::BadRequest { .. }) => {
                    ExecutionError::Rejected { stage, error }
                }
                AttemptFailure::Inference(last) => ExecutionError::RetriesExhausted { stage, attempts, last },
            },
        }
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for TaskExecutor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("definition", &self.definition)
            .field("context", &self.context)
            .finish()
    }
}

#[derive(Debug, Default)]
struct RunState {
    metrics: MetricsSnapshot,
    /// Violations of the first invalid response; set once, then every later
    /// prompt carries the repair note.
    repair: Option<Vec<Violation>>,
    in_flight: Option<Instant>,
}

#[derive(Debug)]
enum AttemptFailure {
    Inference(InferenceError),
    Invalid { error: ValidationError, repairable: bool },
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptFailure::Inference(error) => error.fmt(f),
            AttemptFailure::Invalid { error, .. } => error.fmt(f),
        }
    }
}

impl AttemptError for AttemptFailure {
    fn kind(&self) -> FailureKind {
        match self {
            AttemptFailure::Inference(error) => error.kind(),
            AttemptFailure::Invalid { .. } => FailureKind::InvalidOutput,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            AttemptFailure::Inference(error) => AttemptError::retry_after(error),
            AttemptFailure::Invalid { .. } => None,
        }
    }

    fn indicates_unhealthy(&self) -> bool {
        match self {
            AttemptFailure::Inference(error) => error.indicates_unhealthy(),
            AttemptFailure::Invalid { .. } => false,
        }
    }

    fn is_final(&self) -> bool {
        match self {
            AttemptFailure::Inference(error) => AttemptError::is_final(error),
            AttemptFailure::Invalid { repairable, .. } => !repairable,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// User prompt for a revision: the stage input, the current payload, and the
/// reviewer's requested changes.
pub fn revision_prompt(input: &str, current: &str, feedback: &str) -> String {
    format!(
        "Input:\n{input}\n\n\
         Current version:\n{current}\n\n\
         Requested changes:\n{feedback}\n\n\
         Make exactly the requested changes and return the complete updated JSON object."
    )
}

/// Correction note appended to a prompt after an invalid response.
pub fn repair_note(violations: &[Violation]) -> String {
    let mut note = String::from(
        "Your previous response did not match the required format. \
         Fix every problem below and return the complete JSON object:",
    );
    for violation in violations {
        note.push_str("\n- ");
        note.push_str(&violation.to_string());
    }
    note
}

// ---------------------------------------------------------------------------
// Non-blocking handle
// ---------------------------------------------------------------------------

/// A submitted run.
///
/// Dropping the handle aborts the run unless [`detach`](Self::detach) was
/// called; awaiting [`join`](Self::join) and then dropping that future aborts
/// it as well.
#[derive(Debug)]
pub struct ExecutionHandle<T> {
    stage: StageId,
    task: Option<JoinHandle<Result<T, ExecutionError>>>,
}

impl<T: Send + 'static> ExecutionHandle<T> {
    pub(crate) fn spawn<F>(stage: StageId, run: F) -> Self
    where
        F: Future<Output = Result<T, ExecutionError>> + Send + 'static,
    {
        Self {
            stage,
            task: Some(tokio::spawn(run.in_current_span())),
        }
    }
}

impl<T> ExecutionHandle<T> {
    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Waits for the run to finish.
    pub async fn join(mut self) -> Result<T, ExecutionError> {
        let stage = self.stage;
        let Some(task) = self.task.as_mut() else {
            return Err(ExecutionError::Cancelled { stage });
        };
        let joined = task.await;
        self.task = None;
        match joined {
            Ok(result) => result,
            Err(error) if error.is_panic() => Err(ExecutionError::Internal {
                stage,
                message: "executor task panicked".into(),
            }),
            Err(_) => Err(ExecutionError::Cancelled { stage }),
        }
    }

    pub fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Lets the run continue in the background after the handle is dropped.
    pub fn detach(mut self) {
        self.task = None;
    }
}

impl<T> Drop for ExecutionHandle<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
