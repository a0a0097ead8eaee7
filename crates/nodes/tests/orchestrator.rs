mod support;

use std::sync::Arc;
use std::time::Duration;

use nodes::{ExecutionContext, Orchestrator, OrchestratorConfig, StageRegistry};
use pipeline::{
    ExecutionError, ExecutionErrorKind, Operation, PipelineError, PipelineStore, PreconditionError,
    ProjectId, ProjectName, StageId, StageStatus,
};
use serde_json::json;
use store::InMemoryStore;
use support::*;

fn name() -> ProjectName {
    ProjectName::new("Remote work").unwrap()
}

const QUESTION: &str = "What drives productivity when working remotely?";

fn full_script() -> ScriptedProvider {
    ScriptedProvider::new([reply(spec_payload()), reply(survey_payload()), reply(cohort_payload())])
}

async fn stored_bytes(h: &Harness, id: ProjectId) -> Vec<u8> {
    let state = h.store.load(id).await.unwrap().unwrap();
    serde_json::to_vec(&state).unwrap()
}

#[tokio::test(start_paused = true)]
async fn walks_all_five_stages_to_completion() {
    let h = harness(full_script(), OrchestratorConfig::default());
    let id = h.orchestrator.create_project(name(), QUESTION).await.unwrap();

    for stage in StageId::ORDER {
        let state = h.orchestrator.advance(id).await.unwrap();
        assert_eq!(state.current_stage(), stage);
        assert_eq!(state.current_status(), StageStatus::AwaitingApproval);
        assert_eq!(state.record(stage).revision, 1);

        let state = h.orchestrator.approve(id).await.unwrap();
        assert_eq!(state.current_status(), StageStatus::Approved);
    }

    let state = h.orchestrator.status(id).await.unwrap();
    assert!(state.is_complete());
    let analysis = state.artifact(StageId::Analysis).unwrap().payload();
    assert_eq!(analysis["collaborator"], "response-analysis");
    assert_eq!(analysis["upstream"]["cohort_selection"]["target_size"], 200);
    assert_eq!(analysis["upstream"]["brief"]["question"], QUESTION);

    let error = h.orchestrator.advance(id).await.unwrap_err();
    assert_eq!(
        error,
        PipelineError::Precondition(PreconditionError::PipelineComplete {
            stage: StageId::Analysis
        })
    );
    assert_eq!(h.provider.calls(), 3, "handoff stages make no inference calls");
}

#[tokio::test(start_paused = true)]
async fn approved_revision_is_the_input_to_the_next_stage() {
    let mut shortened = spec_payload();
    shortened["title"] = json!("Remote work (shortened)");
    let h = harness(
        ScriptedProvider::new([reply(spec_payload()), reply(shortened), reply(survey_payload())]),
        OrchestratorConfig::default(),
    );
    let id = h.orchestrator.create_project(name(), QUESTION).await.unwrap();
    h.orchestrator.advance(id).await.unwrap();

    let state = h.orchestrator.revise(id, "shorten questions").await.unwrap();
    assert_eq!(state.current_stage(), StageId::Framing);
    assert_eq!(state.current_status(), StageStatus::AwaitingApproval);
    assert_eq!(state.record(StageId::Framing).revision, 2);

    h.orchestrator.approve(id).await.unwrap();
    let state = h.orchestrator.advance(id).await.unwrap();
    assert_eq!(state.current_stage(), StageId::SurveyDesign);

    let requests = h.provider.requests();
    assert!(requests[1].prompt.contains("shorten questions"));
    assert!(requests[2].prompt.contains("Remote work (shortened)"));
    assert_eq!(
        state.artifact(StageId::Framing).unwrap().payload()["title"],
        "Remote work (shortened)"
    );
}

#[tokio::test(start_paused = true)]
async fn advance_before_approval_leaves_state_byte_identical() {
    let h = harness(full_script(), OrchestratorConfig::default());
    let id = h.orchestrator.create_project(name(), QUESTION).await.unwrap();
    h.orchestrator.advance(id).await.unwrap();
    let before = stored_bytes(&h, id).await;

    let error = h.orchestrator.advance(id).await.unwrap_err();

    assert_eq!(
        error,
        PipelineError::Precondition(PreconditionError::InvalidTransition {
            operation: Operation::Advance,
            stage: StageId::Framing,
            actual: StageStatus::AwaitingApproval,
        })
    );
    assert_eq!(stored_bytes(&h, id).await, before);
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn revise_on_an_approved_stage_is_rejected() {
    let h = harness(full_script(), OrchestratorConfig::default());
    let id = h.orchestrator.create_project(name(), QUESTION).await.unwrap();
    h.orchestrator.advance(id).await.unwrap();
    h.orchestrator.approve(id).await.unwrap();

    let error = h.orchestrator.revise(id, "more questions").await.unwrap_err();

    assert!(matches!(
        error,
        PipelineError::Precondition(PreconditionError::InvalidTransition {
            operation: Operation::Revise,
            actual: StageStatus::Approved,
            ..
        })
    ));
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn approve_requires_an_artifact_awaiting_approval() {
    let h = harness(full_script(), OrchestratorConfig::default());
    let id = h.orchestrator.create_project(name(), QUESTION).await.unwrap();
    let error = h.orchestrator.approve(id).await.unwrap_err();
    assert!(matches!(
        error,
        PipelineError::Precondition(PreconditionError::InvalidTransition {
            operation: Operation::Approve,
            actual: StageStatus::Pending,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn reset_then_advance_matches_a_fresh_project() {
    let h = harness(
        ScriptedProvider::new([
            reply(spec_payload()),
            reply(survey_payload()),
            reply(spec_payload()),
            reply(spec_payload()),
        ]),
        OrchestratorConfig::default(),
    );
    let used = h.orchestrator.create_project(name(), QUESTION).await.unwrap();
    h.orchestrator.advance(used).await.unwrap();
    h.orchestrator.approve(used).await.unwrap();
    h.orchestrator.advance(used).await.unwrap();

    let reset = h.orchestrator.reset(used).await.unwrap();
    assert_eq!(reset.current_stage(), StageId::Framing);
    assert!(reset.stages().iter().all(|r| r.status == StageStatus::Pending && r.artifact.is_none()));
    let after_reset = h.orchestrator.advance(used).await.unwrap();

    let fresh = h.orchestrator.create_project(name(), QUESTION).await.unwrap();
    let fresh = h.orchestrator.advance(fresh).await.unwrap();

    assert_eq!(after_reset.current_stage(), fresh.current_stage());
    let shape = |s: &pipeline::PipelineState| {
        s.stages()
            .iter()
            .map(|r| (r.name, r.status, r.revision, r.artifact.as_ref().map(|a| a.payload().clone())))
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&after_reset), shape(&fresh));
}

#[tokio::test(start_paused = true)]
async fn failed_stage_run_commits_nothing_and_can_be_retried() {
    let h = harness(
        ScriptedProvider::new([server_error(), server_error(), server_error()]),
        OrchestratorConfig::default(),
    );
    let id = h.orchestrator.create_project(name(), QUESTION).await.unwrap();
    let before = stored_bytes(&h, id).await;

    let error = h.orchestrator.advance(id).await.unwrap_err();
    match &error {
        PipelineError::Execution(e) => {
            assert_eq!(e.kind(), ExecutionErrorKind::RetriesExhausted);
            assert_eq!(e.stage(), StageId::Framing);
        }
        other => panic!("expected an execution error, got {other:?}"),
    }
    assert_eq!(stored_bytes(&h, id).await, before);

    h.provider.push(reply(spec_payload()));
    let state = h.orchestrator.advance(id).await.unwrap();
    assert_eq!(state.current_status(), StageStatus::AwaitingApproval);
    assert_eq!(state.record(StageId::Framing).revision, 1);
}

#[tokio::test(start_paused = true)]
async fn open_breaker_is_shared_across_projects() {
    let provider = Arc::new(ScriptedProvider::new([server_error(), server_error()]));
    let ctx: ExecutionContext = context(Arc::clone(&provider)).with_breaker(breaker(2));
    let orchestrator = Orchestrator::new(
        Arc::new(InMemoryStore::new()),
        StageRegistry::standard(ctx),
        OrchestratorConfig::default(),
    );
    let a = orchestrator.create_project(name(), QUESTION).await.unwrap();
    let b = orchestrator.create_project(name(), QUESTION).await.unwrap();

    let first = orchestrator.advance(a).await.unwrap_err();
    let second = orchestrator.advance(b).await.unwrap_err();

    assert_eq!(
        first,
        PipelineError::Execution(ExecutionError::CircuitOpen {
            stage: StageId::Framing
        })
    );
    assert_eq!(second, first);
    assert_eq!(provider.calls(), 2, "the second project never reached the dependency");
}

#[tokio::test(start_paused = true)]
async fn different_projects_run_concurrently() {
    let provider = ScriptedProvider::new([reply(spec_payload()), reply(spec_payload())])
        .with_delay(Duration::from_secs(1));
    let h = harness(provider, OrchestratorConfig::default());
    let a = h.orchestrator.create_project(name(), QUESTION).await.unwrap();
    let b = h.orchestrator.create_project(name(), QUESTION).await.unwrap();

    let started = tokio::time::Instant::now();
    let (ra, rb) = tokio::join!(h.orchestrator.advance(a), h.orchestrator.advance(b));

    assert!(ra.is_ok() && rb.is_ok());
    assert_eq!(started.elapsed(), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn operations_on_one_project_serialise() {
    let provider = ScriptedProvider::new([reply(spec_payload())]).with_delay(Duration::from_secs(1));
    let h = harness(provider, OrchestratorConfig::default());
    let id = h.orchestrator.create_project(name(), QUESTION).await.unwrap();

    // Both calls see a fresh project; the second must wait and then observe
    // the first one's result instead of generating again.
    let (first, second) = tokio::join!(h.orchestrator.advance(id), h.orchestrator.advance(id));

    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(PipelineError::Precondition(PreconditionError::InvalidTransition {
            actual: StageStatus::AwaitingApproval,
            ..
        }))
    ));
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn lock_entries_are_dropped_once_projects_go_idle() {
    let provider = ScriptedProvider::new([reply(spec_payload()), reply(spec_payload())])
        .with_delay(Duration::from_secs(1));
    let h = harness(provider, OrchestratorConfig::default());
    let a = h.orchestrator.create_project(name(), QUESTION).await.unwrap();
    let b = h.orchestrator.create_project(name(), QUESTION).await.unwrap();

    let watch = async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.orchestrator.locked_projects()
    };
    let (ra, rb, second_a, during) = tokio::join!(
        h.orchestrator.advance(a),
        h.orchestrator.advance(b),
        h.orchestrator.approve(a),
        watch,
    );

    assert!(ra.is_ok() && rb.is_ok() && second_a.is_ok());
    assert_eq!(during, 2);
    assert_eq!(h.orchestrator.locked_projects(), 0);

    h.orchestrator.reset(a).await.unwrap();
    h.orchestrator.status(b).await.unwrap();
    assert_eq!(h.orchestrator.locked_projects(), 0);
}

#[tokio::test(start_paused = true)]
async fn revision_cap_is_enforced() {
    let h = harness(
        ScriptedProvider::new([reply(spec_payload()), reply(spec_payload())]),
        OrchestratorConfig {
            max_revisions_per_stage: Some(1),
            ..OrchestratorConfig::default()
        },
    );
    let id = h.orchestrator.create_project(name(), QUESTION).await.unwrap();
    h.orchestrator.advance(id).await.unwrap();
    h.orchestrator.revise(id, "fewer questions").await.unwrap();

    let error = h.orchestrator.revise(id, "even fewer").await.unwrap_err();
    assert_eq!(
        error,
        PipelineError::Precondition(PreconditionError::RevisionLimitReached {
            stage: StageId::Framing,
            limit: 1
        })
    );
}

#[tokio::test(start_paused = true)]
async fn operation_timeout_surfaces_as_a_timeout() {
    let provider = ScriptedProvider::new([reply(spec_payload())]).with_delay(Duration::from_secs(30));
    let h = harness(
        provider,
        OrchestratorConfig {
            operation_timeout: Some(Duration::from_secs(3)),
            ..OrchestratorConfig::default()
        },
    );
    let id = h.orchestrator.create_project(name(), QUESTION).await.unwrap();

    let error = h.orchestrator.advance(id).await.unwrap_err();

    assert_eq!(
        error,
        PipelineError::Execution(ExecutionError::Timeout {
            stage: StageId::Framing,
            after: Duration::from_secs(3)
        })
    );
    let state = h.orchestrator.status(id).await.unwrap();
    assert_eq!(state.current_status(), StageStatus::Pending);
}

#[tokio::test]
async fn idle_projects_expire_until_reset() {
    let h = harness(
        ScriptedProvider::new([reply(spec_payload())]),
        OrchestratorConfig {
            idle_ttl: Some(Duration::ZERO),
            ..OrchestratorConfig::default()
        },
    );
    let id = h.orchestrator.create_project(name(), QUESTION).await.unwrap();
    std::thread::sleep(Duration::from_millis(5));

    let error = h.orchestrator.advance(id).await.unwrap_err();
    assert!(matches!(
        error,
        PipelineError::Precondition(PreconditionError::Expired { .. })
    ));
    assert!(h.orchestrator.reset(id).await.is_ok());
    assert!(h.orchestrator.status(id).await.is_ok());
}

#[tokio::test]
async fn unknown_projects_are_reported() {
    let h = harness(full_script(), OrchestratorConfig::default());
    let missing = ProjectId::new_random();
    assert_eq!(
        h.orchestrator.advance(missing).await.unwrap_err(),
        PipelineError::ProjectNotFound(missing)
    );
    assert!(h.orchestrator.list_projects().await.unwrap().is_empty());
}

#[test]
fn registry_rejects_a_missing_stage() {
    let provider = Arc::new(ScriptedProvider::default());
    let ctx = context(provider);
    let standard = StageRegistry::standard(ctx);
    let partial = StageId::ORDER
        .into_iter()
        .take(4)
        .map(|s| Arc::clone(standard.runner(s)))
        .collect();
    assert!(matches!(
        StageRegistry::new(partial),
        Err(PipelineError::Configuration { .. })
    ));
}
