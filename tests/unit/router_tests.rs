//! Unit tests for event classification, routing effects, and metrics
//! aggregation.
//!
//! Covers:
//! - broadcast and log suppression sets
//! - session start creates and links exactly one metrics record
//! - usage before session start is ignored
//! - usage updates replace cumulative totals
//! - tool failures become tool error rows without touching metrics
//! - completion records usage, tool usage, and the finish time once
//! - disconnect sets the disconnect flag
//! - publish failures and malformed payloads do not stop routing

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use evals_runner::ipc::protocol::IpcEvent;
use evals_runner::models::event::{EventName, PublishedEvent, TaskEvent};
use evals_runner::models::task::Task;
use evals_runner::orchestrator::metrics::MetricsAggregator;
use evals_runner::orchestrator::router::{is_broadcast, is_logged, EventRouter};
use evals_runner::orchestrator::session::SessionState;
use evals_runner::persistence::db::{self, Database};
use evals_runner::persistence::metrics_repo::TaskMetricsRepo;
use evals_runner::persistence::run_repo::RunRepo;
use evals_runner::persistence::task_repo::TaskRepo;
use evals_runner::persistence::tool_error_repo::ToolErrorRepo;
use evals_runner::publish::EventPublisher;
use evals_runner::tasklog::{TaskLogEntry, TaskLogger};
use evals_runner::{AppError, Result};

// ── Test doubles ────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<PublishedEvent>>,
    fail: bool,
}

impl RecordingPublisher {
    fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event.event_name.to_string())
            .collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(
        &self,
        event: PublishedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.fail {
                return Err(AppError::Publish("sink offline".into()));
            }
            self.events.lock().unwrap().push(event);
            Ok(())
        })
    }
}

#[derive(Default)]
struct RecordingLogger {
    entries: Mutex<Vec<TaskLogEntry>>,
}

impl RecordingLogger {
    fn event_names(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.event_name.clone())
            .collect()
    }
}

impl TaskLogger for RecordingLogger {
    fn log_entry(&self, entry: TaskLogEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

struct Harness {
    db: Arc<Database>,
    task_id: i64,
    router: EventRouter,
    publisher: Arc<RecordingPublisher>,
    logger: Arc<RecordingLogger>,
}

async fn harness_with(publisher: RecordingPublisher) -> Harness {
    let db = Arc::new(db::connect_memory().await.expect("db"));
    let run = RunRepo::new(Arc::clone(&db))
        .create(&json!({}))
        .await
        .expect("run");
    let task = TaskRepo::new(Arc::clone(&db))
        .create(&Task::new(run.id, "rust", "two-fer"))
        .await
        .expect("task");

    let publisher = Arc::new(publisher);
    let logger = Arc::new(RecordingLogger::default());
    let sink: Arc<dyn EventPublisher> = publisher.clone();
    let task_log: Arc<dyn TaskLogger> = logger.clone();
    let router = EventRouter::new(
        task.id,
        TaskRepo::new(Arc::clone(&db)),
        ToolErrorRepo::new(Arc::clone(&db)),
        MetricsAggregator::new(TaskMetricsRepo::new(Arc::clone(&db))),
        sink,
        task_log,
    );

    Harness {
        db,
        task_id: task.id,
        router,
        publisher,
        logger,
    }
}

async fn harness() -> Harness {
    harness_with(RecordingPublisher::default()).await
}

fn event(name: EventName, payload: Vec<Value>) -> IpcEvent {
    IpcEvent::TaskEvent(TaskEvent::new(name, payload))
}

fn usage(cost: f64, tokens_in: i64) -> Value {
    json!({
        "totalTokensIn": tokens_in,
        "totalTokensOut": 20,
        "totalCacheWrites": 5,
        "totalCacheReads": 6,
        "totalCost": cost,
        "contextTokens": 90
    })
}

impl Harness {
    async fn send(&self, state: &mut SessionState, ev: IpcEvent) {
        self.router.handle(state, ev).await;
    }

    async fn start(&self, state: &mut SessionState) -> i64 {
        self.send(state, event(EventName::TaskStarted, vec![json!("remote-1")]))
            .await;
        state.task_metrics_id.expect("metrics id after start")
    }

    fn metrics_repo(&self) -> TaskMetricsRepo {
        TaskMetricsRepo::new(Arc::clone(&self.db))
    }
}

// ── Classification ──────────────────────────────────────────────────────────

#[test]
fn only_messages_are_broadcast_suppressed() {
    assert!(!is_broadcast(&EventName::Message));
    for name in [
        EventName::TaskStarted,
        EventName::TaskTokenUsageUpdated,
        EventName::TaskAskResponded,
        EventName::TaskCompleted,
        EventName::Other("custom".into()),
    ] {
        assert!(is_broadcast(&name), "{name} must be broadcast");
    }
}

#[test]
fn usage_asks_and_partial_messages_are_log_suppressed() {
    let partial = TaskEvent::new(
        EventName::Message,
        vec![json!({"taskId": "r", "action": "updated", "message": {"partial": true, "text": "he"}})],
    );
    let complete = TaskEvent::new(
        EventName::Message,
        vec![json!({"taskId": "r", "action": "created", "message": {"partial": false, "text": "hello"}})],
    );

    assert!(!is_logged(&TaskEvent::new(EventName::TaskTokenUsageUpdated, vec![])));
    assert!(!is_logged(&TaskEvent::new(EventName::TaskAskResponded, vec![])));
    assert!(!is_logged(&partial));
    assert!(is_logged(&complete));
    assert!(is_logged(&TaskEvent::new(EventName::TaskCompleted, vec![])));
}

// ── Routing effects ─────────────────────────────────────────────────────────

#[tokio::test]
async fn session_start_creates_and_links_metrics() {
    let h = harness().await;
    let mut state = SessionState::new();
    let before = state.task_started_at;

    let metrics_id = h.start(&mut state).await;

    assert_eq!(state.remote_task_id.as_deref(), Some("remote-1"));
    assert!(state.task_started_at >= before);
    assert_eq!(h.metrics_repo().count().await.expect("count"), 1);

    let task = TaskRepo::new(Arc::clone(&h.db))
        .get_by_id(h.task_id)
        .await
        .expect("task");
    assert_eq!(task.task_metrics_id, Some(metrics_id));
    assert!(task.started_at.is_some());
    assert!(task.finished_at.is_none());
}

#[tokio::test]
async fn usage_before_session_start_is_ignored() {
    let h = harness().await;
    let mut state = SessionState::new();

    h.send(
        &mut state,
        event(EventName::TaskTokenUsageUpdated, vec![json!("remote-1"), usage(1.0, 10)]),
    )
    .await;

    assert!(state.task_metrics_id.is_none());
    assert_eq!(h.metrics_repo().count().await.expect("count"), 0);
    assert_eq!(h.publisher.names(), vec!["taskTokenUsageUpdated"]);
}

#[tokio::test]
async fn usage_updates_replace_totals() {
    let h = harness().await;
    let mut state = SessionState::new();
    let metrics_id = h.start(&mut state).await;

    for (cost, tokens_in) in [(1.0, 100), (2.5, 250)] {
        h.send(
            &mut state,
            event(
                EventName::TaskTokenUsageUpdated,
                vec![json!("remote-1"), usage(cost, tokens_in)],
            ),
        )
        .await;
    }

    let metrics = h
        .metrics_repo()
        .get_by_id(metrics_id)
        .await
        .expect("get")
        .expect("exists");
    assert!((metrics.cost - 2.5).abs() < f64::EPSILON);
    assert_eq!(metrics.tokens_in, 250);
    assert_eq!(metrics.tokens_out, 20);
    assert_eq!(metrics.tokens_context, 90);
    assert_eq!(metrics.cache_writes, 5);
    assert_eq!(metrics.cache_reads, 6);
    assert!(metrics.duration >= 0);
    assert!(state.task_finished_at.is_none());
}

#[tokio::test]
async fn tool_failure_creates_one_tool_error_and_leaves_metrics() {
    let h = harness().await;
    let mut state = SessionState::new();
    let metrics_id = h.start(&mut state).await;

    h.send(
        &mut state,
        event(
            EventName::TaskToolFailed,
            vec![json!("remote-1"), json!("apply_diff"), json!("parse error")],
        ),
    )
    .await;

    let errors = ToolErrorRepo::new(Arc::clone(&h.db))
        .list_for_task(h.task_id)
        .await
        .expect("list");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].tool_name, "apply_diff");
    assert_eq!(errors[0].error, "parse error");

    let metrics = h
        .metrics_repo()
        .get_by_id(metrics_id)
        .await
        .expect("get")
        .expect("exists");
    assert!(metrics.cost.abs() < f64::EPSILON);
    assert!(metrics.tool_usage.is_empty());
}

#[tokio::test]
async fn completion_records_usage_tool_usage_and_finish() {
    let h = harness().await;
    let mut state = SessionState::new();
    let metrics_id = h.start(&mut state).await;

    h.send(
        &mut state,
        event(
            EventName::TaskCompleted,
            vec![
                json!("remote-1"),
                usage(0.12, 400),
                json!({"apply_diff": {"attempts": 3, "failures": 1}}),
            ],
        ),
    )
    .await;

    let metrics = h
        .metrics_repo()
        .get_by_id(metrics_id)
        .await
        .expect("get")
        .expect("exists");
    assert!((metrics.cost - 0.12).abs() < f64::EPSILON);
    assert_eq!(metrics.tool_usage["apply_diff"].attempts, 3);
    assert_eq!(metrics.tool_usage["apply_diff"].failures, 1);

    assert!(state.task_finished_at.is_some());
    let task = TaskRepo::new(Arc::clone(&h.db))
        .get_by_id(h.task_id)
        .await
        .expect("task");
    assert!(task.finished_at.is_some());
}

#[tokio::test]
async fn finish_time_is_written_by_first_terminal_event_only() {
    let h = harness().await;
    let mut state = SessionState::new();
    h.start(&mut state).await;

    h.send(&mut state, event(EventName::TaskAborted, vec![json!("remote-1")]))
        .await;
    let first = state.task_finished_at.expect("finished");
    let persisted = TaskRepo::new(Arc::clone(&h.db))
        .get_by_id(h.task_id)
        .await
        .expect("task")
        .finished_at;

    h.send(&mut state, event(EventName::TaskCompleted, vec![json!("remote-1")]))
        .await;

    assert_eq!(state.task_finished_at, Some(first));
    assert!(!h.router.finish(&mut state).await, "finish must be a no-op once set");
    let after = TaskRepo::new(Arc::clone(&h.db))
        .get_by_id(h.task_id)
        .await
        .expect("task")
        .finished_at;
    assert_eq!(after, persisted);
}

#[tokio::test]
async fn completion_before_start_still_finishes_without_metrics() {
    let h = harness().await;
    let mut state = SessionState::new();

    h.send(
        &mut state,
        event(EventName::TaskCompleted, vec![json!("remote-1"), usage(1.0, 1)]),
    )
    .await;

    assert!(state.task_finished_at.is_some());
    assert_eq!(h.metrics_repo().count().await.expect("count"), 0);
}

#[tokio::test]
async fn disconnect_sets_flag() {
    let h = harness().await;
    let mut state = SessionState::new();

    h.send(&mut state, IpcEvent::Disconnect).await;

    assert!(state.client_disconnected);
    assert!(state.is_settled());
    assert!(state.task_finished_at.is_none());
}

#[tokio::test]
async fn messages_are_logged_but_not_published() {
    let h = harness().await;
    let mut state = SessionState::new();

    h.send(
        &mut state,
        event(
            EventName::Message,
            vec![json!({"taskId": "remote-1", "action": "created", "message": {"partial": true}})],
        ),
    )
    .await;
    h.send(
        &mut state,
        event(
            EventName::Message,
            vec![json!({"taskId": "remote-1", "action": "updated", "message": {"partial": false}})],
        ),
    )
    .await;

    assert!(h.publisher.names().is_empty());
    assert_eq!(h.logger.event_names(), vec!["message"]);
}

#[tokio::test]
async fn published_events_carry_local_task_id_in_order() {
    let h = harness().await;
    let mut state = SessionState::new();

    h.start(&mut state).await;
    h.send(&mut state, event(EventName::TaskModeSwitched, vec![json!("remote-1"), json!("code")]))
        .await;
    h.send(&mut state, event(EventName::Other("taskCustom".into()), vec![]))
        .await;

    assert_eq!(
        h.publisher.names(),
        vec!["taskStarted", "taskModeSwitched", "taskCustom"]
    );
    assert!(h
        .publisher
        .events
        .lock()
        .unwrap()
        .iter()
        .all(|e| e.task_id == h.task_id));
}

#[tokio::test]
async fn publish_failure_does_not_stop_state_effects() {
    let h = harness_with(RecordingPublisher {
        fail: true,
        ..RecordingPublisher::default()
    })
    .await;
    let mut state = SessionState::new();

    h.start(&mut state).await;

    assert_eq!(state.remote_task_id.as_deref(), Some("remote-1"));
    assert_eq!(h.metrics_repo().count().await.expect("count"), 1);
}

#[tokio::test]
async fn malformed_payloads_are_skipped() {
    let h = harness().await;
    let mut state = SessionState::new();
    let metrics_id = h.start(&mut state).await;

    h.send(&mut state, event(EventName::TaskToolFailed, vec![json!("remote-1")]))
        .await;
    h.send(
        &mut state,
        event(EventName::TaskTokenUsageUpdated, vec![json!("remote-1"), json!("not usage")]),
    )
    .await;

    assert!(ToolErrorRepo::new(Arc::clone(&h.db))
        .list_for_task(h.task_id)
        .await
        .expect("list")
        .is_empty());
    let metrics = h
        .metrics_repo()
        .get_by_id(metrics_id)
        .await
        .expect("get")
        .expect("exists");
    assert!(metrics.cost.abs() < f64::EPSILON);
    assert!(h
        .logger
        .entries
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.message.starts_with("failed to apply")));
}

#[tokio::test]
async fn completion_with_malformed_usage_still_finishes() {
    let h = harness().await;
    let mut state = SessionState::new();
    h.start(&mut state).await;

    h.send(
        &mut state,
        event(
            EventName::TaskCompleted,
            vec![json!("remote-1"), json!("not usage"), json!({})],
        ),
    )
    .await;

    assert!(state.task_finished_at.is_some());
    let task = TaskRepo::new(Arc::clone(&h.db))
        .get_by_id(h.task_id)
        .await
        .expect("task");
    assert!(task.finished_at.is_some());
    assert!(h
        .logger
        .entries
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.message.starts_with("failed to apply taskCompleted")));
}
