//! End-to-end orchestration tests.

use super::*;
use crate::config::{DeadlinePolicy, RecoveryConfig, RetryPolicy, TimeoutConfig};
use crate::events::CollectingEventSink;
use crate::state::StateSignals;
use crate::testing::{AlwaysFailStage, FlakyStage, RecordingStage, ScriptedDriver, SlowStage};
use parking_lot::Mutex;
use std::time::Duration;

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new()
        .with_max_attempts(max_attempts)
        .with_initial_delay(Duration::from_millis(10))
}

fn build_orchestrator(config: WorkflowConfig) -> (StageOrchestrator, Arc<CollectingEventSink>) {
    let sink = Arc::new(CollectingEventSink::new());
    let orchestrator = StageOrchestrator::new(config)
        .unwrap()
        .with_sink(sink.clone());
    (orchestrator, sink)
}

fn scripted_handle() -> (DriverHandle, Arc<Mutex<Vec<String>>>) {
    let driver = ScriptedDriver::new().with_signals(vec![StateSignals::at("home")]);
    let calls = driver.calls();
    (DriverHandle::new(Box::new(driver)), calls)
}

fn close_calls(calls: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    calls
        .lock()
        .iter()
        .filter(|call| call.starts_with("close("))
        .cloned()
        .collect()
}

#[tokio::test]
async fn test_all_stages_succeed() {
    let (orchestrator, sink) = build_orchestrator(WorkflowConfig::new());
    let (handle, calls) = scripted_handle();

    let log = Arc::new(Mutex::new(Vec::new()));
    let stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(RecordingStage::new("prepare", log.clone())),
        Arc::new(RecordingStage::new("publish", log.clone())),
        Arc::new(RecordingStage::new("verify", log.clone())),
    ];

    let result = orchestrator.run(handle, &stages).await;

    assert!(result.total_success);
    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.stages.len(), 3);
    assert!(result.errors.is_empty());
    assert_eq!(log.lock().as_slice(), ["prepare", "publish", "verify"]);

    // One checkpoint per successful stage.
    assert_eq!(sink.events_of_type("checkpoint.").len(), 3);
    // Normal completion closes with persist=true, exactly once.
    assert_eq!(close_calls(&calls), ["close(persist=true)"]);
}

#[tokio::test]
async fn test_terminal_failure_aborts_remaining_stages() {
    let (orchestrator, sink) = build_orchestrator(WorkflowConfig::new());
    let (handle, calls) = scripted_handle();

    let log = Arc::new(Mutex::new(Vec::new()));
    let stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(RecordingStage::new("prepare", log.clone())),
        Arc::new(AlwaysFailStage::terminal("publish", "listing rejected")),
        Arc::new(RecordingStage::new("verify", log.clone())),
    ];

    let result = orchestrator.run(handle, &stages).await;

    assert!(!result.total_success);
    assert_eq!(result.status, RunStatus::Failed);

    // Only the stages that actually executed are recorded.
    assert_eq!(result.stages.len(), 2);
    assert!(result.stages[0].success);
    assert!(!result.stages[1].success);
    assert_eq!(result.stages[1].attempts, 1);

    // The later stage never ran.
    assert_eq!(log.lock().as_slice(), ["prepare"]);

    assert_eq!(
        result.errors,
        vec!["publish: terminal failure: listing rejected".to_string()]
    );

    // No checkpoint for the failed stage.
    assert_eq!(sink.events_of_type("checkpoint.").len(), 1);
    // Failure path discards session state.
    assert_eq!(close_calls(&calls), ["close(persist=false)"]);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_exhausts_retries() {
    let config = WorkflowConfig::new().with_retry(fast_retry(2));
    let (orchestrator, sink) = build_orchestrator(config);
    let (handle, _calls) = scripted_handle();

    let stages: Vec<Arc<dyn Stage>> =
        vec![Arc::new(AlwaysFailStage::transient("sync", "gateway flaked"))];

    let result = orchestrator.run(handle, &stages).await;

    assert!(!result.total_success);
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.stages[0].attempts, 2);
    // One retry was scheduled between the two attempts.
    assert_eq!(sink.events_of_type("stage.retry").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_flaky_stage_recovers_within_budget() {
    let config = WorkflowConfig::new().with_retry(fast_retry(3));
    let (orchestrator, _sink) = build_orchestrator(config);
    let (handle, _calls) = scripted_handle();

    let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(FlakyStage::new("upload", 2))];

    let result = orchestrator.run(handle, &stages).await;

    assert!(result.total_success);
    assert_eq!(result.stages[0].attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_stage_deadline_expiry() {
    let config = WorkflowConfig::new().with_timeout(
        TimeoutConfig::new()
            .with_stage_deadline(Duration::from_secs(1))
            .with_workflow_deadline(Duration::from_secs(600)),
    );
    let (orchestrator, sink) = build_orchestrator(config);
    let (handle, calls) = scripted_handle();

    let stages: Vec<Arc<dyn Stage>> =
        vec![Arc::new(SlowStage::new("render", Duration::from_secs(60)))];

    let result = orchestrator.run(handle, &stages).await;

    assert!(!result.total_success);
    assert_eq!(result.status, RunStatus::TimedOut);
    assert_eq!(result.stages.len(), 1);
    assert!(result.errors[0].contains("render"));
    assert!(result.errors[0].contains("timed out"));

    assert_eq!(sink.events_of_type("stage.timeout").len(), 1);
    assert_eq!(close_calls(&calls), ["close(persist=false)"]);
}

#[tokio::test(start_paused = true)]
async fn test_workflow_deadline_enforced_by_watcher() {
    // Independent budgets: each stage could legally run 100s, but the
    // background watcher cancels the run at the 60s workflow deadline.
    let config = WorkflowConfig::new().with_timeout(
        TimeoutConfig::new()
            .with_stage_deadline(Duration::from_secs(100))
            .with_workflow_deadline(Duration::from_secs(60))
            .with_deadline_policy(DeadlinePolicy::Independent),
    );
    let (orchestrator, sink) = build_orchestrator(config);
    let (handle, calls) = scripted_handle();

    let stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(SlowStage::new("slow1", Duration::from_secs(40))),
        Arc::new(SlowStage::new("slow2", Duration::from_secs(40))),
    ];

    let result = orchestrator.run(handle, &stages).await;

    assert!(!result.total_success);
    assert_eq!(result.status, RunStatus::TimedOut);

    // slow1 finished, slow2 was abandoned mid-flight.
    assert_eq!(result.stages.len(), 2);
    assert!(result.stages[0].success);
    assert!(!result.stages[1].success);

    // Both the stage-level and the workflow-level condition are reported.
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors[1].starts_with("workflow:"));

    assert_eq!(sink.events_of_type("workflow.timeout").len(), 1);
    assert_eq!(sink.events_of_type("checkpoint.").len(), 1);
    assert_eq!(close_calls(&calls), ["close(persist=false)"]);
}

#[tokio::test(start_paused = true)]
async fn test_clamped_stage_deadline_respects_remaining_budget() {
    // Default Clamp policy: the stage's 100s deadline is bounded by the
    // 50s workflow budget, so the run settles at 50s either way.
    let config = WorkflowConfig::new().with_timeout(
        TimeoutConfig::new()
            .with_stage_deadline(Duration::from_secs(100))
            .with_workflow_deadline(Duration::from_secs(50)),
    );
    let (orchestrator, _sink) = build_orchestrator(config);
    let (handle, _calls) = scripted_handle();

    let stages: Vec<Arc<dyn Stage>> =
        vec![Arc::new(SlowStage::new("render", Duration::from_secs(60)))];

    let started = tokio::time::Instant::now();
    let result = orchestrator.run(handle, &stages).await;

    assert_eq!(result.status, RunStatus::TimedOut);
    assert!(!result.errors.is_empty());
    // The run settled at the workflow budget, not the stage's own deadline.
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_external_cancellation() {
    let (orchestrator, _sink) = build_orchestrator(WorkflowConfig::new());
    let (handle, calls) = scripted_handle();

    let stages: Vec<Arc<dyn Stage>> =
        vec![Arc::new(SlowStage::new("long_haul", Duration::from_secs(10)))];

    let token = Arc::new(CancellationToken::new());
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel("operator requested abort");
        })
    };

    let result = orchestrator.run_with_token(handle, &stages, token).await;
    canceller.await.unwrap();

    assert!(!result.total_success);
    assert_eq!(result.status, RunStatus::Cancelled);
    assert!(result.errors[0].contains("operator requested abort"));
    assert_eq!(close_calls(&calls), ["close(persist=false)"]);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_exactly_once_on_every_path() {
    // Success path.
    let (orchestrator, sink) = build_orchestrator(WorkflowConfig::new());
    let (handle, calls) = scripted_handle();
    let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(FlakyStage::new("ok", 0))];
    orchestrator.run(handle, &stages).await;
    assert_eq!(close_calls(&calls).len(), 1);
    assert_eq!(sink.events_of_type("cleanup.started").len(), 1);
    assert_eq!(sink.events_of_type("cleanup.finished").len(), 1);

    // Terminal failure path.
    let (orchestrator, sink) = build_orchestrator(WorkflowConfig::new());
    let (handle, calls) = scripted_handle();
    let stages: Vec<Arc<dyn Stage>> =
        vec![Arc::new(AlwaysFailStage::terminal("bad", "broken"))];
    orchestrator.run(handle, &stages).await;
    assert_eq!(close_calls(&calls).len(), 1);
    assert_eq!(sink.events_of_type("cleanup.started").len(), 1);

    // Timeout path.
    let config = WorkflowConfig::new().with_timeout(
        TimeoutConfig::new()
            .with_stage_deadline(Duration::from_secs(1))
            .with_workflow_deadline(Duration::from_secs(600)),
    );
    let (orchestrator, sink) = build_orchestrator(config);
    let (handle, calls) = scripted_handle();
    let stages: Vec<Arc<dyn Stage>> =
        vec![Arc::new(SlowStage::new("slow", Duration::from_secs(60)))];
    orchestrator.run(handle, &stages).await;
    assert_eq!(close_calls(&calls).len(), 1);
    assert_eq!(sink.events_of_type("cleanup.started").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_path_recovers_environment() {
    let machine = Arc::new(StateMachine::standard(
        "home",
        "listing_editor",
        RecoveryConfig::default(),
    ));

    let config = WorkflowConfig::new().with_retry(fast_retry(2));
    let sink = Arc::new(CollectingEventSink::new());
    let orchestrator = StageOrchestrator::new(config)
        .unwrap()
        .with_sink(sink.clone())
        .with_state_machine(machine);

    let driver = ScriptedDriver::new().with_signals(vec![StateSignals::at("home")]);
    let calls = driver.calls();
    let handle = DriverHandle::new(Box::new(driver));

    let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(FlakyStage::new("publish", 1))];

    let result = orchestrator.run(handle, &stages).await;

    assert!(result.total_success);
    assert_eq!(result.stages[0].attempts, 2);

    // The retry hook reset the environment before the second attempt, and
    // the persist-path cleanup reset it once more on the way out.
    let recorded = calls.lock().clone();
    assert!(recorded.iter().any(|c| c == "perform_action(close_overlay)"));
    assert!(recorded.iter().any(|c| c == "navigate(entry_point)"));
    let recoveries = sink.events_of_type("recovery.performed");
    assert_eq!(recoveries.len(), 2);
    assert_eq!(
        recoveries[0].data.get("trigger"),
        Some(&serde_json::json!("retry"))
    );
}

#[tokio::test]
async fn test_empty_stage_list_is_vacuous_success() {
    // The builder rejects empty workflows; the orchestrator itself treats
    // an empty sequence as vacuously successful and still tears down.
    let (orchestrator, sink) = build_orchestrator(WorkflowConfig::new());
    let (handle, calls) = scripted_handle();

    let result = orchestrator.run(handle, &[]).await;

    assert!(result.total_success);
    assert!(result.stages.is_empty());
    assert_eq!(close_calls(&calls), ["close(persist=true)"]);
    assert_eq!(sink.events_of_type("cleanup.").len(), 2);
}

#[tokio::test]
async fn test_workflow_builder_end_to_end() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let workflow = WorkflowBuilder::new()
        .with_config(WorkflowConfig::new().with_retry(fast_retry(2)))
        .stage(RecordingStage::new("prepare", log.clone()))
        .stage_fn("publish", |ctx| async move {
            ctx.ensure_active()?;
            Ok(crate::core::StageReport::new().with_entry("listing_id", serde_json::json!("L-7")))
        })
        .build()
        .unwrap();

    assert_eq!(workflow.stage_names(), vec!["prepare", "publish"]);

    let (handle, _calls) = scripted_handle();
    let result = workflow.run(handle).await;

    assert!(result.total_success);
    assert_eq!(
        result.stage("publish").unwrap().metadata.get("listing_id"),
        Some(&serde_json::json!("L-7"))
    );
}
