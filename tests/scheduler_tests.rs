//! Integration tests for the task scheduler.

mod common;

use async_trait::async_trait;
use common::mocks::ConcurrencyGauge;
use common::test_config;
use jnana::agents::{TaskContext, WorkerAgent};
use jnana::events::{EventBus, EventType};
use jnana::memory::ArtifactStore;
use jnana::scheduler::TaskScheduler;
use jnana::types::{AgentKind, AgentStatus, AppError, Result, Task, TaskKind, TaskStatus};
use jnana::utils::toml_config::SchedulerConfig;
use jnana::ResearchCoordinator;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Generation-kind agent that sleeps for `hold_ms` and logs task priorities.
struct RecordingAgent {
    id: String,
    seen: Arc<Mutex<Vec<u32>>>,
}

#[async_trait]
impl WorkerAgent for RecordingAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Generation
    }

    async fn execute(&self, task: &Task, ctx: &TaskContext) -> Result<Value> {
        self.seen.lock().push(task.priority);
        let hold = task
            .params
            .get("hold_ms")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        for _ in 0..hold / 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            ctx.checkpoint()?;
        }
        if task.opt_str_param("fail").is_some() {
            return Err(AppError::Capability("scripted failure".into()));
        }
        Ok(json!({"priority": task.priority}))
    }
}

struct Harness {
    scheduler: TaskScheduler,
    events: Arc<EventBus>,
    store: Arc<ArtifactStore>,
    seen: Arc<Mutex<Vec<u32>>>,
}

fn harness(max_workers: usize, agents: usize) -> Harness {
    let store = Arc::new(ArtifactStore::new());
    let events = Arc::new(EventBus::new(500));
    events.start();
    let ctx = TaskContext::new(Arc::clone(&store), Arc::clone(&events), 1200.0);
    let scheduler = TaskScheduler::new(
        SchedulerConfig {
            max_workers,
            poll_interval_ms: 5,
            ..SchedulerConfig::default()
        },
        ctx,
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    for n in 0..agents {
        scheduler
            .register_agent(Arc::new(RecordingAgent {
                id: format!("generation-{}", n),
                seen: Arc::clone(&seen),
            }))
            .unwrap();
    }
    scheduler.start();
    Harness {
        scheduler,
        events,
        store,
        seen,
    }
}

fn task(priority: u32) -> Task {
    Task::new(TaskKind::GenerateHypothesis).with_priority(priority)
}

async fn until_running(scheduler: &TaskScheduler, n: usize) {
    for _ in 0..400 {
        if scheduler.running_count() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("scheduler never reached {} running tasks", n);
}

#[tokio::test]
async fn test_lower_priority_number_runs_first() {
    let h = harness(1, 1);
    let blocker = h
        .scheduler
        .submit(task(9).with_param("hold_ms", 100))
        .unwrap();
    until_running(&h.scheduler, 1).await;

    let tickets = h
        .scheduler
        .submit_all(vec![task(3), task(1), task(2), task(1)])
        .unwrap();
    blocker.wait().await.unwrap();
    for ticket in tickets {
        assert_eq!(ticket.wait().await.unwrap().status, TaskStatus::Done);
    }

    assert_eq!(*h.seen.lock(), vec![9, 1, 1, 2, 3]);
}

#[tokio::test]
async fn test_failure_is_contained_to_its_task() {
    let h = harness(2, 2);
    let bad = h.scheduler.submit(task(1).with_param("fail", "yes")).unwrap();
    let good = h.scheduler.submit(task(1)).unwrap();

    let bad = bad.wait().await.unwrap();
    let good = good.wait().await.unwrap();

    assert_eq!(bad.status, TaskStatus::Failed);
    assert!(bad.error.unwrap().contains("scripted failure"));
    assert_eq!(good.status, TaskStatus::Done);
    assert_eq!(good.result, Some(json!({"priority": 1})));

    let stats = h.scheduler.statistics();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);

    let failed_agent = h
        .store
        .list_agent_states()
        .into_iter()
        .find(|s| s.tasks_failed == 1)
        .unwrap();
    assert_eq!(failed_agent.status, AgentStatus::Idle);

    assert!(h.events.flush(Duration::from_secs(1)).await);
    let errors = h.events.recent(EventType::AgentError, 10);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].payload_str("task_id"), Some(bad.id.as_str()));
}

#[tokio::test]
async fn test_cancel_request_event_fails_pending_task() {
    let h = harness(1, 1);
    let blocker = h
        .scheduler
        .submit(task(1).with_param("hold_ms", 150))
        .unwrap();
    until_running(&h.scheduler, 1).await;
    let queued = h.scheduler.submit(task(2)).unwrap();
    let queued_id = queued.task_id().to_string();

    h.events.emit(
        EventType::TaskCancelRequested,
        "test",
        json!({"task_id": queued_id}),
    );

    let cancelled = queued.wait().await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Failed);
    assert!(cancelled.error.unwrap().to_lowercase().contains("cancel"));
    assert_eq!(blocker.wait().await.unwrap().status, TaskStatus::Done);
    assert_eq!(*h.seen.lock(), vec![1]);
}

#[tokio::test]
async fn test_cancel_running_task_stops_at_checkpoint() {
    let h = harness(1, 1);
    let ticket = h
        .scheduler
        .submit(task(1).with_param("hold_ms", 5_000))
        .unwrap();
    let id = ticket.task_id().to_string();
    until_running(&h.scheduler, 1).await;

    h.scheduler.cancel(&id).unwrap();
    let finished = tokio::time::timeout(Duration::from_secs(2), ticket.wait())
        .await
        .expect("cancelled task should stop promptly")
        .unwrap();

    assert_eq!(finished.status, TaskStatus::Failed);
    assert!(matches!(
        h.scheduler.cancel("no-such-task"),
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_unsupported_kind_is_rejected_at_submit() {
    let h = harness(1, 1);
    let err = h
        .scheduler
        .submit(Task::new(TaskKind::TournamentMatch))
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(h.scheduler.statistics().submitted, 0);
}

#[tokio::test]
async fn test_wait_for_all_tasks() {
    let h = harness(2, 2);
    assert!(h.scheduler.wait_for_all_tasks(Duration::from_millis(10)).await);

    h.scheduler
        .submit_all((0..6).map(|_| task(1).with_param("hold_ms", 20)))
        .unwrap();
    assert!(!h.scheduler.wait_for_all_tasks(Duration::from_millis(1)).await);
    assert!(h.scheduler.wait_for_all_tasks(Duration::from_secs(5)).await);
    assert_eq!(h.scheduler.statistics().completed, 6);
    assert_eq!(h.scheduler.pending_count(), 0);
}

#[tokio::test]
async fn test_shutdown_fails_pending_tasks() {
    let h = harness(1, 1);
    let running = h
        .scheduler
        .submit(task(1).with_param("hold_ms", 5_000))
        .unwrap();
    until_running(&h.scheduler, 1).await;
    let pending = h.scheduler.submit(task(2)).unwrap();

    h.scheduler.shutdown().await;

    assert_eq!(pending.wait().await.unwrap().status, TaskStatus::Failed);
    let running = tokio::time::timeout(Duration::from_secs(2), running.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(running.status, TaskStatus::Failed);
    assert!(matches!(
        h.scheduler.submit(task(1)),
        Err(AppError::Cancelled(_))
    ));
}

#[tokio::test]
async fn test_ten_generations_with_four_workers() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.scheduler.max_workers = 4;
    config.agents.generation = 6;
    let gauge = Arc::new(ConcurrencyGauge::new(Duration::from_millis(20)));

    let coordinator = ResearchCoordinator::new(config, gauge.clone()).unwrap();
    coordinator.set_research_goal("Why do cells age?").unwrap();

    let ids = coordinator.generate(10, &[]).await.unwrap();

    assert_eq!(ids.len(), 10);
    assert_eq!(coordinator.store().len(), 10);
    assert!(gauge.peak() <= 4, "peak concurrency was {}", gauge.peak());
    assert!(gauge.peak() >= 2);
    let stats = coordinator.scheduler().statistics();
    assert_eq!(stats.completed, 10);
    assert_eq!(stats.failed, 0);
    coordinator.shutdown().await;
}
