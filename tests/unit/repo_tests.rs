//! Unit tests for the `SQLite` repositories.
//!
//! Every test runs against a private in-memory database.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use evals_runner::models::metrics::{TaskMetrics, ToolUsage, ToolUsageEntry, UsageUpdate};
use evals_runner::models::task::Task;
use evals_runner::models::tool_error::NewToolError;
use evals_runner::persistence::db::{self, Database};
use evals_runner::persistence::metrics_repo::TaskMetricsRepo;
use evals_runner::persistence::run_repo::RunRepo;
use evals_runner::persistence::task_repo::TaskRepo;
use evals_runner::persistence::tool_error_repo::ToolErrorRepo;
use evals_runner::AppError;

async fn memory_db() -> Arc<Database> {
    Arc::new(db::connect_memory().await.expect("db"))
}

async fn seeded_task(db: &Arc<Database>) -> Task {
    let run = RunRepo::new(Arc::clone(db))
        .create(&json!({"apiProvider": "openrouter"}))
        .await
        .expect("create run");
    TaskRepo::new(Arc::clone(db))
        .create(&Task::new(run.id, "rust", "two-fer"))
        .await
        .expect("create task")
}

// ── Runs ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn run_round_trips_settings() {
    let db = memory_db().await;
    let repo = RunRepo::new(Arc::clone(&db));

    let created = repo
        .create(&json!({"openRouterModelId": "anthropic/claude", "mode": "code"}))
        .await
        .expect("create");
    let loaded = repo.get_by_id(created.id).await.expect("get");

    assert_eq!(loaded.id, created.id);
    assert_eq!(loaded.settings["mode"], "code");
    assert_eq!(loaded.settings_map().len(), 2);
}

#[tokio::test]
async fn missing_run_is_not_found() {
    let db = memory_db().await;
    let err = RunRepo::new(db).get_by_id(999).await.expect_err("must fail");
    assert!(matches!(err, AppError::NotFound(_)));
}

// ── Tasks ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn task_is_created_without_timestamps() {
    let db = memory_db().await;
    let task = seeded_task(&db).await;

    let loaded = TaskRepo::new(Arc::clone(&db))
        .get_by_id(task.id)
        .await
        .expect("get");

    assert_eq!(loaded.language, "rust");
    assert_eq!(loaded.exercise, "two-fer");
    assert!(loaded.settings.is_none());
    assert!(loaded.task_metrics_id.is_none());
    assert!(loaded.started_at.is_none());
    assert!(loaded.finished_at.is_none());
}

#[tokio::test]
async fn task_settings_are_persisted() {
    let db = memory_db().await;
    let run = RunRepo::new(Arc::clone(&db))
        .create(&json!({}))
        .await
        .expect("run");
    let mut task = Task::new(run.id, "go", "bob");
    task.settings = Some(json!({"mode": "architect"}));

    let repo = TaskRepo::new(Arc::clone(&db));
    let created = repo.create(&task).await.expect("create");
    let loaded = repo.get_by_id(created.id).await.expect("get");

    assert_eq!(loaded.settings_map().get("mode"), Some(&json!("architect")));
}

#[tokio::test]
async fn mark_started_links_metrics_and_stamps_start() {
    let db = memory_db().await;
    let task = seeded_task(&db).await;
    let metrics = TaskMetricsRepo::new(Arc::clone(&db))
        .create(&TaskMetrics::zeroed())
        .await
        .expect("metrics");
    let repo = TaskRepo::new(Arc::clone(&db));
    let started_at = Utc::now();

    repo.mark_started(task.id, metrics.id, started_at)
        .await
        .expect("mark started");
    let loaded = repo.get_by_id(task.id).await.expect("get");

    assert_eq!(loaded.task_metrics_id, Some(metrics.id));
    assert_eq!(
        loaded.started_at.map(|ts| ts.timestamp_millis()),
        Some(started_at.timestamp_millis())
    );
    assert!(loaded.finished_at.is_none());
}

#[tokio::test]
async fn mark_finished_stamps_finish() {
    let db = memory_db().await;
    let task = seeded_task(&db).await;
    let repo = TaskRepo::new(Arc::clone(&db));

    repo.mark_finished(task.id, Utc::now()).await.expect("mark finished");

    assert!(repo.get_by_id(task.id).await.expect("get").finished_at.is_some());
}

#[tokio::test]
async fn missing_task_is_not_found() {
    let db = memory_db().await;
    let err = TaskRepo::new(db).get_by_id(42).await.expect_err("must fail");
    assert!(matches!(err, AppError::NotFound(ref msg) if msg.contains("42")));
}

// ── Task metrics ────────────────────────────────────────────────────────────

#[tokio::test]
async fn metrics_are_created_zeroed() {
    let db = memory_db().await;
    let repo = TaskMetricsRepo::new(Arc::clone(&db));

    let created = repo.create(&TaskMetrics::zeroed()).await.expect("create");
    let loaded = repo
        .get_by_id(created.id)
        .await
        .expect("get")
        .expect("exists");

    assert!(created.id > 0);
    assert!(loaded.cost.abs() < f64::EPSILON);
    assert_eq!(loaded.tokens_in, 0);
    assert_eq!(loaded.tokens_out, 0);
    assert_eq!(loaded.duration, 0);
    assert!(loaded.tool_usage.is_empty());
    assert_eq!(repo.count().await.expect("count"), 1);
}

#[tokio::test]
async fn update_usage_replaces_counters() {
    let db = memory_db().await;
    let repo = TaskMetricsRepo::new(Arc::clone(&db));
    let id = repo.create(&TaskMetrics::zeroed()).await.expect("create").id;

    let update = UsageUpdate {
        cost: 1.0,
        tokens_in: 100,
        tokens_out: 50,
        tokens_context: 80,
        duration: 1_000,
        cache_writes: 3,
        cache_reads: 4,
    };
    repo.update_usage(id, &update).await.expect("first update");
    repo.update_usage(
        id,
        &UsageUpdate {
            cost: 2.5,
            tokens_in: 300,
            ..update
        },
    )
    .await
    .expect("second update");

    let loaded = repo.get_by_id(id).await.expect("get").expect("exists");
    assert!((loaded.cost - 2.5).abs() < f64::EPSILON);
    assert_eq!(loaded.tokens_in, 300);
    assert_eq!(loaded.tokens_out, 50);
    assert_eq!(loaded.cache_writes, 3);
    assert_eq!(loaded.cache_reads, 4);
}

#[tokio::test]
async fn update_tool_usage_round_trips() {
    let db = memory_db().await;
    let repo = TaskMetricsRepo::new(Arc::clone(&db));
    let id = repo.create(&TaskMetrics::zeroed()).await.expect("create").id;

    let mut usage = ToolUsage::new();
    usage.insert(
        "apply_diff".into(),
        ToolUsageEntry {
            attempts: 4,
            failures: 1,
        },
    );
    repo.update_tool_usage(id, &usage).await.expect("update");

    let loaded = repo.get_by_id(id).await.expect("get").expect("exists");
    assert_eq!(loaded.tool_usage, usage);
}

#[tokio::test]
async fn missing_metrics_is_none() {
    let db = memory_db().await;
    let loaded = TaskMetricsRepo::new(db).get_by_id(7).await.expect("get");
    assert!(loaded.is_none());
}

// ── Tool errors ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_errors_are_listed_in_insertion_order() {
    let db = memory_db().await;
    let task = seeded_task(&db).await;
    let repo = ToolErrorRepo::new(Arc::clone(&db));

    for (tool_name, error) in [("apply_diff", "parse error"), ("read_file", "not found")] {
        repo.create(&NewToolError {
            task_id: task.id,
            tool_name: tool_name.into(),
            error: error.into(),
        })
        .await
        .expect("create");
    }

    let errors = repo.list_for_task(task.id).await.expect("list");
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].tool_name, "apply_diff");
    assert_eq!(errors[0].error, "parse error");
    assert_eq!(errors[1].tool_name, "read_file");
    assert!(repo.list_for_task(task.id + 1).await.expect("list").is_empty());
}
