//! Priority task scheduler over a bounded pool of worker agents
//!
//! # Architecture
//!
//! Submitted [`Task`]s wait in a [`queue::TaskQueue`] ordered by ascending
//! priority number, FIFO within a priority. A single dispatch loop is the
//! queue's only consumer: it takes a slot from a semaphore sized by
//! `max_workers`, pops the most urgent task whose agent kind has an idle
//! agent, claims that agent and spawns the execution. The loop never awaits
//! a task; when nothing is runnable it parks on a short poll.
//!
//! On completion the task is finished as `DONE` or `FAILED`, the agent's
//! [`AgentState`] is updated and `AgentCompleted` / `AgentError` is published.
//! Errors and panics raised by an agent stay inside that task.
//!
//! # Example
//!
//! ```rust,ignore
//! let scheduler = TaskScheduler::new(SchedulerConfig::default(), ctx);
//! scheduler.register_registry(&registry);
//! scheduler.start();
//!
//! let ticket = scheduler.submit(Task::new(TaskKind::GenerateHypothesis))?;
//! let finished = ticket.wait().await?;
//! ```

pub mod queue;

use crate::agents::{AgentRegistry, TaskContext, WorkerAgent};
use crate::events::{Event, EventHandler, EventType, SubscriptionId};
use crate::types::{AgentKind, AgentState, AgentStatus, AppError, Result, Task, TaskStatus};
use crate::utils::toml_config::SchedulerConfig;
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use queue::TaskQueue;
use serde::Serialize;
use serde_json::json;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SOURCE: &str = "scheduler";

/// Resolves to the finished task once it reaches `DONE` or `FAILED`.
#[derive(Debug)]
pub struct TaskTicket {
    task_id: String,
    rx: oneshot::Receiver<Task>,
}

impl TaskTicket {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub async fn wait(self) -> Result<Task> {
        self.rx.await.map_err(|_| {
            AppError::Cancelled(format!("Task {} was dropped by the scheduler", self.task_id))
        })
    }
}

/// Scheduler counters
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatistics {
    pub pending: usize,
    pub running: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub max_workers: usize,
    pub busy_agents: usize,
    /// Registered agents per kind
    pub agents: HashMap<String, usize>,
    pub running_loop: bool,
}

/// A registered agent and its claim flag
struct AgentSlot {
    agent: Arc<dyn WorkerAgent>,
    busy: AtomicBool,
}

struct RunningTask {
    agent_id: String,
    cancelled: Arc<AtomicBool>,
}

/// A task claimed by the dispatch loop, ready to execute
struct Dispatch {
    task: Task,
    slot: Arc<AgentSlot>,
    cancelled: Arc<AtomicBool>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    ctx: TaskContext,
    queue: Mutex<TaskQueue>,
    agents: RwLock<Vec<Arc<AgentSlot>>>,
    waiters: Mutex<HashMap<String, oneshot::Sender<Task>>>,
    running: Mutex<HashMap<String, RunningTask>>,
    slots: Arc<Semaphore>,
    /// Tasks submitted but not yet finished
    in_flight: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    wake: Notify,
    drained: Notify,
    shutdown: AtomicBool,
}

/// Dispatches tasks to registered worker agents.
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    cancel_subscription: Mutex<Option<SubscriptionId>>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig, ctx: TaskContext) -> Self {
        let workers = config.max_workers.max(1);
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                ctx,
                queue: Mutex::new(TaskQueue::new()),
                agents: RwLock::new(Vec::new()),
                waiters: Mutex::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
                slots: Arc::new(Semaphore::new(workers)),
                in_flight: AtomicUsize::new(0),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                wake: Notify::new(),
                drained: Notify::new(),
                shutdown: AtomicBool::new(false),
            }),
            dispatch: Mutex::new(None),
            cancel_subscription: Mutex::new(None),
        }
    }

    /// Register an agent and create its [`AgentState`] in the store.
    pub fn register_agent(&self, agent: Arc<dyn WorkerAgent>) -> Result<()> {
        let mut agents = self.inner.agents.write();
        if agents.iter().any(|slot| slot.agent.id() == agent.id()) {
            return Err(AppError::Validation(format!(
                "Agent {} is already registered with the scheduler",
                agent.id()
            )));
        }
        self.inner
            .ctx
            .store
            .set_agent_state(AgentState::new(agent.id(), agent.kind()));
        debug!(agent_id = %agent.id(), kind = %agent.kind(), "Agent registered");
        agents.push(Arc::new(AgentSlot {
            agent,
            busy: AtomicBool::new(false),
        }));
        drop(agents);
        self.inner.wake.notify_one();
        Ok(())
    }

    /// Register every agent in a registry.
    pub fn register_registry(&self, registry: &AgentRegistry) -> Result<()> {
        for agent in registry.agents() {
            self.register_agent(agent)?;
        }
        Ok(())
    }

    /// Starts the dispatch loop and the cancel-request subscription.
    pub fn start(&self) {
        let mut dispatch = self.dispatch.lock();
        if dispatch.is_some() {
            return;
        }
        self.inner.shutdown.store(false, Ordering::SeqCst);

        let weak = Arc::downgrade(&self.inner);
        *dispatch = Some(tokio::spawn(dispatch_loop(weak)));

        let handler = Arc::new(CancelRequestHandler {
            scheduler: Arc::downgrade(&self.inner),
        });
        let id = self
            .inner
            .ctx
            .events
            .subscribe(EventType::TaskCancelRequested, handler);
        *self.cancel_subscription.lock() = Some(id);

        info!(
            max_workers = self.inner.config.max_workers,
            agents = self.inner.agents.read().len(),
            "Task scheduler started"
        );
    }

    pub fn is_running(&self) -> bool {
        self.dispatch.lock().is_some()
    }

    /// Queue a task. Fails if no registered agent handles its kind.
    pub fn submit(&self, mut task: Task) -> Result<TaskTicket> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(AppError::Cancelled("Scheduler is shutting down".into()));
        }
        let kind = task.agent_kind();
        let supported = self
            .inner
            .agents
            .read()
            .iter()
            .any(|slot| slot.agent.supports(task.kind));
        if !supported {
            return Err(AppError::Validation(format!(
                "No {} agent registered for {:?} tasks",
                kind, task.kind
            )));
        }

        task.status = TaskStatus::Pending;
        let (tx, rx) = oneshot::channel();
        let task_id = task.id.clone();

        self.inner.waiters.lock().insert(task_id.clone(), tx);
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(task_id = %task_id, kind = ?task.kind, priority = task.priority, "Task submitted");
        self.inner.queue.lock().push(task);
        self.inner.wake.notify_one();

        Ok(TaskTicket { task_id, rx })
    }

    /// Submit several tasks; stops at the first rejected one.
    pub fn submit_all(&self, tasks: impl IntoIterator<Item = Task>) -> Result<Vec<TaskTicket>> {
        tasks.into_iter().map(|task| self.submit(task)).collect()
    }

    /// Cancel a task.
    ///
    /// A pending task is finished as `FAILED` right away. A running task has
    /// its cancellation flag set and stops at the agent's next checkpoint.
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        self.inner.cancel(task_id)
    }

    /// Wait until every submitted task has finished. Returns `false` on timeout.
    pub async fn wait_for_all_tasks(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let drained = self.inner.drained.notified();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, drained).await.is_err() {
                return self.inner.in_flight.load(Ordering::SeqCst) == 0;
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn running_count(&self) -> usize {
        self.inner.running.lock().len()
    }

    pub fn statistics(&self) -> SchedulerStatistics {
        let agents = self.inner.agents.read();
        let mut per_kind: HashMap<String, usize> = AgentKind::ALL
            .iter()
            .map(|kind| (kind.as_str().to_string(), 0))
            .collect();
        for slot in agents.iter() {
            *per_kind.entry(slot.agent.kind().as_str().to_string()).or_insert(0) += 1;
        }
        SchedulerStatistics {
            pending: self.pending_count(),
            running: self.running_count(),
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            max_workers: self.inner.config.max_workers,
            busy_agents: agents
                .iter()
                .filter(|slot| slot.busy.load(Ordering::SeqCst))
                .count(),
            agents: per_kind,
            running_loop: self.is_running(),
        }
    }

    /// Stop dispatching. Pending tasks are finished as cancelled and running
    /// tasks are asked to stop at their next checkpoint.
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.wake.notify_one();

        let handle = self.dispatch.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Dispatch loop ended abnormally: {}", e);
            }
        }
        if let Some(id) = self.cancel_subscription.lock().take() {
            self.inner.ctx.events.unsubscribe(id);
        }

        let pending = self.inner.queue.lock().drain();
        let dropped = pending.len();
        for task in pending {
            self.inner
                .finish(task, Err(AppError::Cancelled("Scheduler shut down".into())), None);
        }
        for running in self.inner.running.lock().values() {
            running.cancelled.store(true, Ordering::SeqCst);
        }
        info!(dropped, "Task scheduler stopped");
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.wake.notify_one();
    }
}

async fn dispatch_loop(weak: Weak<SchedulerInner>) {
    loop {
        let Some(inner) = weak.upgrade() else { break };
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let poll = inner.config.poll_interval();

        // Register interest before checking so a wake between the check and
        // the wait is not lost
        let woken = inner.wake.notified();
        tokio::pin!(woken);
        woken.as_mut().enable();

        if let Ok(permit) = Arc::clone(&inner.slots).try_acquire_owned() {
            match inner.next_runnable() {
                Some(dispatch) => {
                    tokio::spawn(run_task(Arc::clone(&inner), dispatch, permit));
                    continue;
                }
                None => drop(permit),
            }
        }

        let _ = tokio::time::timeout(poll, woken).await;
    }
    debug!("Dispatch loop exited");
}

async fn run_task(inner: Arc<SchedulerInner>, dispatch: Dispatch, permit: OwnedSemaphorePermit) {
    let Dispatch {
        task,
        slot,
        cancelled,
    } = dispatch;
    let agent_id = slot.agent.id().to_string();
    inner.ctx.store.update_agent_state(&agent_id, |state| {
        state.status = AgentStatus::Busy;
        state.last_activity = Utc::now();
    });
    inner.ctx.events.emit(
        EventType::AgentStarted,
        SOURCE,
        json!({"task_id": task.id, "agent_id": agent_id, "task_type": task.kind}),
    );
    debug!(task_id = %task.id, agent_id = %agent_id, "Task started");

    let ctx = inner.ctx.for_task(cancelled);
    // A cancel that landed between dispatch and start
    let outcome = match ctx.checkpoint() {
        Err(e) => Err(e),
        Ok(()) => AssertUnwindSafe(slot.agent.execute(&task, &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(AppError::Internal(format!(
                    "Agent panicked: {}",
                    panic_message(panic.as_ref())
                )))
            }),
    };

    inner.running.lock().remove(&task.id);
    slot.busy.store(false, Ordering::SeqCst);
    drop(permit);
    inner.finish(task, outcome, Some(&agent_id));
    inner.wake.notify_one();
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl SchedulerInner {
    /// Pops the most urgent runnable task, claims an idle agent for it and
    /// registers it as running.
    ///
    /// The queue lock is held until the task is in `running`, so a concurrent
    /// `cancel` always finds it in one of the two.
    fn next_runnable(&self) -> Option<Dispatch> {
        let agents = self.agents.read();
        let idle = |kind: AgentKind| {
            agents
                .iter()
                .any(|slot| slot.agent.kind() == kind && !slot.busy.load(Ordering::SeqCst))
        };
        let mut queue = self.queue.lock();
        let (mut task, seq) = queue.pop_runnable(idle)?;

        let claimed = agents.iter().find(|slot| {
            slot.agent.supports(task.kind)
                && slot
                    .busy
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
        });
        let Some(slot) = claimed else {
            // Only this loop claims agents, so this means no idle agent
            // supports the task after all. Put it back in its place.
            queue.requeue(task, seq);
            return None;
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        task.status = TaskStatus::Running;
        self.running.lock().insert(
            task.id.clone(),
            RunningTask {
                agent_id: slot.agent.id().to_string(),
                cancelled: Arc::clone(&cancelled),
            },
        );
        Some(Dispatch {
            task,
            slot: Arc::clone(slot),
            cancelled,
        })
    }

    fn cancel(&self, task_id: &str) -> Result<()> {
        let pending = self.queue.lock().remove(task_id);
        if let Some(task) = pending {
            info!(task_id = %task_id, "Pending task cancelled");
            self.finish(task, Err(AppError::Cancelled("Task was cancelled".into())), None);
            return Ok(());
        }
        if let Some(running) = self.running.lock().get(task_id) {
            info!(task_id = %task_id, agent_id = %running.agent_id, "Cancellation requested");
            running.cancelled.store(true, Ordering::SeqCst);
            return Ok(());
        }
        Err(AppError::NotFound(format!("Task {} is not pending or running", task_id)))
    }

    /// Records the outcome of a task and resolves its ticket.
    fn finish(&self, mut task: Task, outcome: Result<serde_json::Value>, agent_id: Option<&str>) {
        let succeeded = outcome.is_ok();
        match outcome {
            Ok(value) => {
                task.status = TaskStatus::Done;
                task.result = Some(value);
                self.completed.fetch_add(1, Ordering::Relaxed);
                debug!(task_id = %task.id, "Task done");
            }
            Err(e) => {
                task.status = TaskStatus::Failed;
                task.error = Some(e.to_string());
                self.failed.fetch_add(1, Ordering::Relaxed);
                match e {
                    AppError::Cancelled(_) => info!(task_id = %task.id, "Task cancelled"),
                    _ => error!(task_id = %task.id, error = %e, "Task failed"),
                }
            }
        }

        if let Some(agent_id) = agent_id {
            self.ctx.store.update_agent_state(agent_id, |state| {
                if succeeded {
                    state.tasks_completed += 1;
                } else {
                    state.tasks_failed += 1;
                }
                state.status = AgentStatus::Idle;
                state.last_activity = Utc::now();
            });
        }

        let event_type = if succeeded {
            EventType::AgentCompleted
        } else {
            EventType::AgentError
        };
        self.ctx.events.emit(
            event_type,
            SOURCE,
            json!({
                "task_id": task.id,
                "agent_id": agent_id,
                "task_type": task.kind,
                "status": task.status,
                "error": task.error,
            }),
        );

        if let Some(tx) = self.waiters.lock().remove(&task.id) {
            // The caller may have dropped its ticket
            let _ = tx.send(task);
        }
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Cancels the task named by a `TaskCancelRequested` event.
struct CancelRequestHandler {
    scheduler: Weak<SchedulerInner>,
}

#[async_trait]
impl EventHandler for CancelRequestHandler {
    async fn handle(&self, event: &Event) -> Result<()> {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return Ok(());
        };
        let task_id = event.payload_str("task_id").ok_or_else(|| {
            AppError::Validation("Cancel request is missing 'task_id'".into())
        })?;
        scheduler.cancel(task_id)
    }
}
