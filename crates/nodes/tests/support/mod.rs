//! Shared fakes for the orchestration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nodes::{ExecutionContext, Orchestrator, OrchestratorConfig, StageRegistry};
use parking_lot::Mutex;
use pipeline::{
    BreakerConfig, CircuitBreaker, InferenceError, InferenceProvider, InferenceRequest,
    InferenceResponse, ManualClock, MetricsCollector, RetryPolicy, TokenUsage,
};
use serde_json::{json, Value};
use store::InMemoryStore;

pub type Scripted = Result<InferenceResponse, InferenceError>;

/// Replays canned responses in order and records every request it receives.
///
/// An exhausted script answers with a server error.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<InferenceRequest>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(script: impl IntoIterator<Item = Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Every call sleeps for `delay` (virtual time under `start_paused`).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, response: Scripted) {
        self.script.lock().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| {
            Err(InferenceError::ServerError {
                status: Some(500),
                message: "script exhausted".into(),
            })
        })
    }
}

pub fn reply(payload: Value) -> Scripted {
    Ok(InferenceResponse {
        text: payload.to_string(),
        usage: TokenUsage::new(100, 50),
    })
}

pub fn server_error() -> Scripted {
    Err(InferenceError::ServerError {
        status: Some(503),
        message: "unavailable".into(),
    })
}

pub fn spec_payload() -> Value {
    json!({
        "title": "Remote work productivity",
        "description": "Understand what drives productivity when working remotely.",
        "questions": [
            { "text": "How many days a week do you work remotely?", "type": "multiple_choice",
              "options": ["0", "1-2", "3-4", "5"], "required": true }
        ],
        "target_audience": "Knowledge workers",
        "estimated_time": "5 minutes",
        "required_responses": 200
    })
}

pub fn survey_payload() -> Value {
    json!({
        "title": "Remote work survey",
        "description": "Ten short questions about your working week.",
        "questions": [
            { "text": "Rate your focus at home", "type": "rating", "options": ["1", "2", "3", "4", "5"] },
            { "text": "Do you have a dedicated workspace?", "type": "boolean" }
        ]
    })
}

pub fn cohort_payload() -> Value {
    json!({
        "description": "Full-time knowledge workers with remote flexibility",
        "criteria": [
            { "attribute": "employment", "requirement": "full-time" },
            { "attribute": "remote_days", "requirement": "at least one per week" }
        ],
        "target_size": 200
    })
}

pub fn breaker(threshold: u32) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::with_clock(
        "inference",
        BreakerConfig {
            failure_threshold: threshold,
            open_duration: Duration::from_secs(30),
        },
        Arc::new(ManualClock::new()),
    ))
}

pub fn context(provider: Arc<ScriptedProvider>) -> ExecutionContext {
    ExecutionContext::new(provider)
        .with_breaker(breaker(100))
        .with_metrics(Arc::new(MetricsCollector::new()))
        .with_retry(RetryPolicy::immediate(3))
        .with_attempt_timeout(Duration::from_secs(5))
}

pub struct Harness {
    pub provider: Arc<ScriptedProvider>,
    pub store: Arc<InMemoryStore>,
    pub context: ExecutionContext,
    pub orchestrator: Orchestrator,
}

pub fn harness(provider: ScriptedProvider, config: OrchestratorConfig) -> Harness {
    let provider = Arc::new(provider);
    let store = Arc::new(InMemoryStore::new());
    let context = context(Arc::clone(&provider));
    let orchestrator = Orchestrator::new(
        store.clone(),
        StageRegistry::standard(context.clone()),
        config,
    );
    Harness {
        provider,
        store,
        context,
        orchestrator,
    }
}
