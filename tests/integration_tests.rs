//! Integration tests for workflow execution
//!
//! These tests drive the public executor API end to end using mock tasks.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use voxant_rs::sdk::error::{FailureKind, FailureReason, StepFailure, VoxantError};
use voxant_rs::sdk::hooks::{AttemptInfo, AttemptResult, StepHooks};
use voxant_rs::sdk::retry::RetryPolicy;
use voxant_rs::sdk::step::{AttemptOutcome, Step};
use voxant_rs::sdk::task::{StepInput, StepOutput, Task, TaskFn};
use voxant_rs::voxant::background::{BackgroundTask, TaskContext, TaskStatus};
use voxant_rs::voxant::engine::{
    CancelReason, Event, EventSubscription, Executor, ExecutorSettings, RunHandle, RunStatus,
};
use voxant_rs::voxant::workflow::builder::builtin_builder;
use voxant_rs::voxant::workflow::context::Context;
use voxant_rs::voxant::workflow::graph::Workflow;
use voxant_rs::voxant::workflow::loader::WorkflowLoader;
use voxant_rs::voxant::workflow::state::{
    ConfigSchema, FieldDef, FieldType, ReducerType, StateSchema,
};

// ============================================================================
// Mock Components
// ============================================================================

fn int_field() -> FieldDef {
    FieldDef::new(FieldType::Integer)
}

static XY_SCHEMA: Lazy<StateSchema> = Lazy::new(|| {
    StateSchema::new()
        .field("x", int_field())
        .field("y", int_field())
});

fn xy_schema() -> StateSchema {
    XY_SCHEMA.clone()
}

/// Writes x = 1
fn write_x() -> Arc<dyn Task> {
    TaskFn::arc(|_input: StepInput| async move { Ok(StepOutput::new().set("x", json!(1))) })
}

/// Writes y = x + 1
fn x_plus_one() -> Arc<dyn Task> {
    TaskFn::arc(|input: StepInput| async move {
        let x = input
            .get("x")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| StepFailure::fatal("x is not set"))?;
        Ok(StepOutput::new().set("y", json!(x + 1)))
    })
}

/// Always fails, counting its attempts
fn always_fails(counter: Arc<AtomicU32>) -> Arc<dyn Task> {
    TaskFn::arc(move |_input: StepInput| {
        let counter = counter.clone();
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Err::<StepOutput, _>(StepFailure::new(format!("attempt {} failed", n)))
        }
    })
}

/// Sleeps far longer than any test
fn sleeps_forever() -> Arc<dyn Task> {
    TaskFn::arc(|_input: StepInput| async move {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(StepOutput::new())
    })
}

/// Blocks until something is published on topic "go", then writes x = 1
fn waits_for_go() -> Arc<dyn Task> {
    TaskFn::arc(|input: StepInput| async move {
        let mut go = input.topics.recv("go").await;
        go.next().await;
        Ok(StepOutput::new().set("x", json!(1)))
    })
}

fn two_step_context() -> Context {
    Context::new(
        xy_schema(),
        ConfigSchema::new(),
        Workflow::new("two-step")
            .step(Step::new("A", write_x()).writes(["x"]).entry())
            .step(Step::new("B", x_plus_one()).reads(["x"]).writes(["y"])),
    )
    .unwrap()
}

async fn drain(handle: &RunHandle) -> Vec<Event> {
    let mut events = handle.events();
    let mut out = Vec::new();
    while let Some(event) = events.next().await {
        out.push(event);
    }
    out
}

/// Publish on `topic` until a subscriber receives it
async fn emit_when_subscribed(executor: &Executor, topic: &str, message: Value) {
    for _ in 0..200 {
        if executor.emit(topic, message.clone()).await > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("nobody subscribed to '{}'", topic);
}

#[derive(Default)]
struct CountingHooks {
    before: AtomicU32,
    after: AtomicU32,
}

impl StepHooks for CountingHooks {
    fn before_attempt(&self, _info: &AttemptInfo) {
        self.before.fetch_add(1, Ordering::SeqCst);
    }

    fn after_attempt(&self, _info: &AttemptInfo, _result: &AttemptResult) {
        self.after.fetch_add(1, Ordering::SeqCst);
    }
}

struct PanickingHooks;

impl StepHooks for PanickingHooks {
    fn after_attempt(&self, _info: &AttemptInfo, _result: &AttemptResult) {
        panic!("observer bug");
    }
}

/// Background task that ignores cancellation
struct Stubborn;

#[async_trait]
impl BackgroundTask for Stubborn {
    fn name(&self) -> &str {
        "stubborn"
    }

    async fn run(&self, _ctx: TaskContext) -> Result<(), VoxantError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

// ============================================================================
// Superstep Execution Tests
// ============================================================================

#[tokio::test]
async fn test_two_step_workflow_produces_two_update_events() {
    let executor = Executor::new(two_step_context(), ExecutorSettings::default());
    let handle = executor.execute(json!({})).unwrap();

    let events = drain(&handle).await;
    assert_eq!(
        events,
        vec![
            Event::Updates {
                round: 0,
                payload: json!({"x": 1}).as_object().cloned().unwrap(),
            },
            Event::Updates {
                round: 1,
                payload: json!({"y": 2}).as_object().cloned().unwrap(),
            },
        ]
    );
    assert_eq!(handle.status(), RunStatus::Completed { rounds: 2 });
    assert_eq!(Value::Object((*handle.state()).clone()), json!({"x": 1, "y": 2}));
}

#[tokio::test]
async fn test_retry_exhaustion_fails_run_without_updates() {
    let counter = Arc::new(AtomicU32::new(0));
    let ctx = Context::new(
        xy_schema(),
        ConfigSchema::new(),
        Workflow::new("flaky").step(
            Step::new("A", always_fails(counter.clone()))
                .writes(["x"])
                .entry()
                .retry(RetryPolicy::no_delay(2)),
        ),
    )
    .unwrap();
    let executor = Executor::new(ctx, ExecutorSettings::default());
    let handle = executor.execute(json!({})).unwrap();

    let events = drain(&handle).await;
    assert!(events.is_empty());

    match handle.wait().await {
        RunStatus::Failed(FailureReason::StepFailed(failure)) => {
            assert_eq!(failure.step, "A");
            assert_eq!(failure.attempts, 2);
            assert_eq!(failure.error.message, "attempt 2 failed");
        }
        other => panic!("expected step failure, got {:?}", other),
    }
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert!(handle.state().is_empty());

    let attempts: Vec<u32> = handle.invocations().iter().map(|i| i.attempt).collect();
    assert_eq!(attempts, vec![1, 2]);
}

#[tokio::test]
async fn test_step_timeout_is_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let task = {
        let calls = calls.clone();
        TaskFn::arc(move |_input: StepInput| {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                Ok(StepOutput::new().set("x", json!(7)))
            }
        })
    };
    let ctx = Context::new(
        xy_schema(),
        ConfigSchema::new(),
        Workflow::new("slow-start").step(
            Step::new("A", task)
                .writes(["x"])
                .entry()
                .timeout(Duration::from_millis(20))
                .retry(RetryPolicy::no_delay(2)),
        ),
    )
    .unwrap();
    let handle = Executor::new(ctx, ExecutorSettings::default())
        .execute(json!({}))
        .unwrap();

    assert_eq!(handle.wait().await, RunStatus::Completed { rounds: 1 });
    assert_eq!(handle.state()["x"], json!(7));

    let invocations = handle.invocations();
    assert_eq!(invocations.len(), 2);
    match &invocations[0].outcome {
        AttemptOutcome::Failed { failure } => assert_eq!(failure.kind, FailureKind::Timeout),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(invocations[1].outcome, AttemptOutcome::Succeeded);
}

#[tokio::test]
async fn test_panic_on_retry_reports_every_attempt() {
    let calls = Arc::new(AtomicU32::new(0));
    let task = {
        let calls = calls.clone();
        TaskFn::arc(move |_input: StepInput| {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(StepFailure::new("transient"));
                }
                panic!("exploded on retry");
            }
        })
    };
    let hooks = Arc::new(CountingHooks::default());
    let ctx = Context::new(
        xy_schema(),
        ConfigSchema::new(),
        Workflow::new("fragile").step(
            Step::new("A", task)
                .writes(["x"])
                .entry()
                .retry(RetryPolicy::no_delay(3)),
        ),
    )
    .unwrap();
    let executor = Executor::new(ctx, ExecutorSettings::default()).with_hooks(hooks.clone());
    let handle = executor.execute(json!({})).unwrap();

    match handle.wait().await {
        RunStatus::Failed(FailureReason::StepFailed(failure)) => {
            assert_eq!(failure.step, "A");
            assert_eq!(failure.attempts, 2);
            assert_eq!(failure.error.kind, FailureKind::Panicked);
        }
        other => panic!("expected step failure, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let invocations = handle.invocations();
    assert_eq!(invocations.len(), 2);
    match &invocations[1].outcome {
        AttemptOutcome::Failed { failure } => assert_eq!(failure.kind, FailureKind::Panicked),
        other => panic!("expected panicked attempt, got {:?}", other),
    }
    assert_eq!(hooks.before.load(Ordering::SeqCst), 2);
    assert_eq!(hooks.after.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_undeclared_write_is_invalid_output() {
    let sneaky = TaskFn::arc(|_input: StepInput| async move {
        Ok(StepOutput::new().set("x", json!(1)).set("y", json!(2)))
    });
    let ctx = Context::new(
        xy_schema(),
        ConfigSchema::new(),
        Workflow::new("sneaky").step(
            Step::new("A", sneaky)
                .writes(["x"])
                .entry()
                .retry(RetryPolicy::no_delay(5)),
        ),
    )
    .unwrap();
    let handle = Executor::new(ctx, ExecutorSettings::default())
        .execute(json!({}))
        .unwrap();

    match handle.wait().await {
        RunStatus::Failed(FailureReason::StepFailed(failure)) => {
            assert_eq!(failure.error.kind, FailureKind::InvalidOutput);
            assert_eq!(failure.attempts, 1);
        }
        other => panic!("expected invalid output, got {:?}", other),
    }
    assert!(handle.state().is_empty());
}

#[tokio::test]
async fn test_round_limit_exceeded() {
    let yaml = r#"
name: runaway
allow_cycles: true
settings:
  round_limit: 3
state:
  n: { type: integer, default: 0 }
steps:
  - name: inc
    task: increment
    entry: true
    reads: n
    writes: n
    params: { field: n }
"#;
    let def = WorkflowLoader::parse_yaml(yaml).unwrap();
    let executor = builtin_builder()
        .await
        .build_from_def(def)
        .await
        .unwrap()
        .into_executor(ExecutorSettings::default());
    let handle = executor.execute(json!({})).unwrap();

    let rounds: Vec<u64> = drain(&handle).await.iter().map(|e| e.round()).collect();
    assert_eq!(rounds, vec![0, 1, 2]);
    assert_eq!(
        handle.wait().await,
        RunStatus::Failed(FailureReason::RoundLimitExceeded { limit: 3 })
    );
    assert_eq!(handle.state()["n"], json!(3));
}

#[tokio::test]
async fn test_custom_messages_follow_updates_in_declaration_order() {
    let first = TaskFn::arc(|_input: StepInput| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(StepOutput::new().emit(json!("from first")))
    });
    let second = TaskFn::arc(|_input: StepInput| async move {
        Ok(StepOutput::new().set("x", json!(1)).emit(json!("from second")))
    });
    let ctx = Context::new(
        xy_schema(),
        ConfigSchema::new(),
        Workflow::new("chatty")
            .step(Step::new("first", first).entry())
            .step(Step::new("second", second).writes(["x"]).entry()),
    )
    .unwrap();
    let handle = Executor::new(ctx, ExecutorSettings::default())
        .execute(json!({}))
        .unwrap();

    let kinds: Vec<String> = drain(&handle)
        .await
        .iter()
        .map(|e| serde_json::to_string(e).unwrap())
        .collect();
    assert_eq!(
        kinds,
        vec![
            r#"{"kind":"updates","round":0,"payload":{"x":1}}"#,
            r#"{"kind":"custom","round":0,"payload":"from first"}"#,
            r#"{"kind":"custom","round":0,"payload":"from second"}"#,
        ]
    );
}

// ============================================================================
// Determinism Tests
// ============================================================================

fn fan_in_context() -> Context {
    let mut workflow = Workflow::new("fan-in");
    for i in 0..6i64 {
        let name = format!("w{}", i);
        let tag = name.clone();
        let task = TaskFn::arc(move |_input: StepInput| {
            let tag = tag.clone();
            async move {
                let jitter = rand::random::<u64>() % 15;
                tokio::time::sleep(Duration::from_millis(jitter)).await;
                Ok(StepOutput::new()
                    .set("last", json!(tag.clone()))
                    .set("log", json!(tag.clone()))
                    .set("best", json!(i * 7 % 5))
                    .emit(json!({ "done": tag })))
            }
        });
        workflow = workflow.step(
            Step::new(name, task)
                .writes(["last", "log", "best"])
                .entry(),
        );
    }
    let count = TaskFn::arc(|input: StepInput| async move {
        let n = input
            .get("log")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        Ok(StepOutput::new().set("count", json!(n)))
    });
    workflow = workflow.step(Step::new("count", count).reads(["log"]).writes(["count"]));

    let schema = StateSchema::new()
        .field("last", FieldDef::new(FieldType::String))
        .field(
            "log",
            FieldDef::new(FieldType::Array).reducer(ReducerType::Append),
        )
        .field("best", int_field().reducer(ReducerType::Max))
        .field("count", int_field());
    Context::new(schema, ConfigSchema::new(), workflow).unwrap()
}

fn run_fan_in(runtime: tokio::runtime::Runtime) -> (String, Vec<String>) {
    runtime.block_on(async {
        let executor = Executor::new(fan_in_context(), ExecutorSettings::default());
        let handle = executor.execute(json!({})).unwrap();
        let events: Vec<String> = drain(&handle)
            .await
            .iter()
            .map(|e| serde_json::to_string(e).unwrap())
            .collect();
        assert_eq!(handle.wait().await, RunStatus::Completed { rounds: 2 });
        (serde_json::to_string(&*handle.state()).unwrap(), events)
    })
}

#[test]
fn test_outcome_is_independent_of_worker_threads() {
    let single = run_fan_in(
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap(),
    );
    for _ in 0..3 {
        let multi = run_fan_in(
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap(),
        );
        assert_eq!(multi, single);
    }

    let state: Value = serde_json::from_str(&single.0).unwrap();
    assert_eq!(state["last"], json!("w5"));
    assert_eq!(state["log"], json!(["w0", "w1", "w2", "w3", "w4", "w5"]));
    assert_eq!(state["best"], json!(4));
    assert_eq!(state["count"], json!(6));
}

// ============================================================================
// Cancellation Tests
// ============================================================================

#[tokio::test]
async fn test_cancel_mid_round_closes_stream() {
    let ctx = Context::new(
        xy_schema(),
        ConfigSchema::new(),
        Workflow::new("stuck")
            .step(Step::new("A", write_x()).writes(["x"]).entry())
            .step(Step::new("B", sleeps_forever()).reads(["x"]).writes(["y"])),
    )
    .unwrap();
    let handle = Executor::new(ctx, ExecutorSettings::default())
        .execute(json!({}))
        .unwrap();

    let mut events = handle.events();
    let first = events.next().await.unwrap();
    assert_eq!(first.round(), 0);

    // Round 1 is now running B
    handle.cancel();
    assert_eq!(events.next().await, None);
    assert!(!events.overflowed());

    assert_eq!(handle.status(), RunStatus::Cancelled(CancelReason::Requested));
    assert_eq!(Value::Object((*handle.state()).clone()), json!({"x": 1}));
}

#[tokio::test]
async fn test_run_timeout_cancels_run() {
    let ctx = Context::new(
        xy_schema(),
        ConfigSchema::new(),
        Workflow::new("slow").step(Step::new("A", sleeps_forever()).writes(["x"]).entry()),
    )
    .unwrap();
    let settings = ExecutorSettings::default().with_run_timeout(Duration::from_millis(50));
    let handle = Executor::new(ctx, settings).execute(json!({})).unwrap();

    assert_eq!(
        handle.wait().await,
        RunStatus::Cancelled(CancelReason::Timeout)
    );
    assert!(handle.state().is_empty());
}

// ============================================================================
// Event Stream Tests
// ============================================================================

#[tokio::test]
async fn test_multiple_consumers_see_same_sequence() {
    let ctx = Context::new(
        xy_schema(),
        ConfigSchema::new(),
        Workflow::new("gated")
            .step(Step::new("A", waits_for_go()).writes(["x"]).entry())
            .step(Step::new("B", x_plus_one()).reads(["x"]).writes(["y"])),
    )
    .unwrap();
    let executor = Executor::new(ctx, ExecutorSettings::default());
    let handle = executor.execute(json!({})).unwrap();

    // Both attach before A can make progress
    let collect = |mut sub: EventSubscription| {
        tokio::spawn(async move {
            let mut out = Vec::new();
            while let Some(event) = sub.next().await {
                out.push(event);
            }
            out
        })
    };
    let first = collect(handle.events());
    let second = collect(handle.events());

    emit_when_subscribed(&executor, "go", json!(true)).await;

    let a = first.await.unwrap();
    let b = second.await.unwrap();
    assert_eq!(a.len(), 2);
    assert_eq!(a, b);
    assert_eq!(handle.wait().await, RunStatus::Completed { rounds: 2 });
}

#[tokio::test]
async fn test_slow_consumer_is_dropped_without_blocking_run() {
    let chatty = TaskFn::arc(|_input: StepInput| async move {
        let mut out = StepOutput::new();
        for i in 0..20 {
            out = out.emit(json!(i));
        }
        Ok(out)
    });
    let ctx = Context::new(
        xy_schema(),
        ConfigSchema::new(),
        Workflow::new("chatty").step(Step::new("A", chatty).entry()),
    )
    .unwrap();
    let settings = ExecutorSettings::default().with_event_buffer(4);
    let handle = Executor::new(ctx, settings).execute(json!({})).unwrap();

    let mut slow = handle.events();
    assert_eq!(handle.wait().await, RunStatus::Completed { rounds: 1 });

    assert_eq!(slow.next().await, None);
    assert!(slow.overflowed());
}

#[tokio::test]
async fn test_events_after_completion_are_empty() {
    let executor = Executor::new(two_step_context(), ExecutorSettings::default());
    let handle = executor.execute(json!({})).unwrap();
    let _ = drain(&handle).await;

    let mut late = handle.events();
    assert_eq!(late.next().await, None);
}

// ============================================================================
// Topic Bus Tests
// ============================================================================

#[tokio::test]
async fn test_topic_delivery_has_no_replay() {
    let executor = Executor::new(two_step_context(), ExecutorSettings::default());
    let mut early = executor.recv("alerts").await;

    assert_eq!(executor.emit("alerts", json!("hello")).await, 1);
    let mut late = executor.recv("alerts").await;
    executor.emit("alerts", json!("bye")).await;

    assert_eq!(early.next().await, Some(json!("hello")));
    assert_eq!(early.next().await, Some(json!("bye")));
    assert_eq!(late.next().await, Some(json!("bye")));
}

#[tokio::test]
async fn test_steps_publish_to_topics() {
    let yaml = r#"
name: notifier
steps:
  - name: announce
    task: publish
    entry: true
    params: { topic: alerts, message: { level: warn } }
  - name: note
    task: emit
    entry: true
    params: { message: noted }
"#;
    let def = WorkflowLoader::parse_yaml(yaml).unwrap();
    let executor = builtin_builder()
        .await
        .build_from_def(def)
        .await
        .unwrap()
        .into_executor(ExecutorSettings::default());
    let mut alerts = executor.recv("alerts").await;

    let handle = executor.execute(json!({})).unwrap();
    let events = drain(&handle).await;

    assert_eq!(alerts.next().await, Some(json!({"level": "warn"})));
    assert_eq!(
        events,
        vec![Event::Custom {
            round: 0,
            payload: json!("noted")
        }]
    );
}

// ============================================================================
// Executor Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_config_validation_error_is_synchronous() {
    let yaml = r#"
name: configured
config:
  target: { type: string, required: true }
state:
  x: { type: integer }
steps:
  - { name: a, task: set, entry: true, writes: x, params: { values: { x: 1 } } }
"#;
    let def = WorkflowLoader::parse_yaml(yaml).unwrap();
    let executor = builtin_builder()
        .await
        .build_from_def(def)
        .await
        .unwrap()
        .into_executor(ExecutorSettings::default());

    assert!(executor.execute(json!({})).is_err());
    assert!(executor.execute(json!({"target": 1})).is_err());
    assert!(executor.execute(json!({"target": "t", "extra": true})).is_err());
    assert!(executor.runs().is_empty());

    let handle = executor.execute(json!({"target": "t"})).unwrap();
    assert_eq!(handle.wait().await, RunStatus::Completed { rounds: 1 });
}

#[tokio::test]
async fn test_background_stop_timeout_is_reported_not_fatal() {
    let ctx = Context::new(
        xy_schema(),
        ConfigSchema::new(),
        Workflow::new("gated").step(Step::new("A", waits_for_go()).writes(["x"]).entry()),
    )
    .unwrap();
    let settings = ExecutorSettings::default().with_shutdown_timeout(Duration::from_millis(50));
    let executor = Executor::new(ctx, settings)
        .with_background_task(Arc::new(Stubborn))
        .unwrap();

    executor.start().await.unwrap();
    assert!(matches!(
        executor.start().await,
        Err(VoxantError::AlreadyStarted)
    ));
    let handle = executor.execute(json!({})).unwrap();

    let report = executor.stop().await;
    assert!(!report.is_clean());
    assert_eq!(report.unclean[0].task, "stubborn");
    assert_eq!(
        executor.background_status().await["stubborn"],
        TaskStatus::Aborted
    );

    // The run outlives the background tasks
    emit_when_subscribed(&executor, "go", json!(true)).await;
    assert_eq!(handle.wait().await, RunStatus::Completed { rounds: 1 });
}

#[tokio::test]
async fn test_hooks_observe_every_attempt() {
    let hooks = Arc::new(CountingHooks::default());
    let counter = Arc::new(AtomicU32::new(0));
    let ctx = Context::new(
        xy_schema(),
        ConfigSchema::new(),
        Workflow::new("observed")
            .step(Step::new("ok", write_x()).writes(["x"]).entry())
            .step(
                Step::new("bad", always_fails(counter))
                    .writes(["y"])
                    .entry()
                    .retry(RetryPolicy::no_delay(3)),
            ),
    )
    .unwrap();
    let executor = Executor::new(ctx, ExecutorSettings::default()).with_hooks(hooks.clone());
    let handle = executor.execute(json!({})).unwrap();
    handle.wait().await;

    assert_eq!(hooks.before.load(Ordering::SeqCst), 4);
    assert_eq!(hooks.after.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_panicking_hook_cannot_suppress_failure() {
    let counter = Arc::new(AtomicU32::new(0));
    let ctx = Context::new(
        xy_schema(),
        ConfigSchema::new(),
        Workflow::new("observed").step(
            Step::new("bad", always_fails(counter.clone()))
                .writes(["x"])
                .entry()
                .retry(RetryPolicy::no_delay(2)),
        ),
    )
    .unwrap();
    let executor =
        Executor::new(ctx, ExecutorSettings::default()).with_hooks(Arc::new(PanickingHooks));
    let handle = executor.execute(json!({})).unwrap();

    assert!(matches!(
        handle.wait().await,
        RunStatus::Failed(FailureReason::StepFailed(_))
    ));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}
