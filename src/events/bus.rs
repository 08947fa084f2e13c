use super::{Event, EventFilter, EventType, DEFAULT_HISTORY_SIZE};
use crate::types::Result;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Receives events of the types it was subscribed to.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) + Send + Sync,
{
    async fn handle(&self, event: &Event) -> Result<()> {
        (self.0)(event);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventStatistics {
    pub total_events: usize,
    pub published: u64,
    pub processed: u64,
    pub event_counts: HashMap<String, usize>,
    pub subscribers: HashMap<String, usize>,
    pub queue_size: u64,
    pub running: bool,
}

/// In-process event bus.
///
/// `publish` never blocks. One dispatch task drains the queue, so every
/// subscriber sees events in the order they were published. A failing or
/// panicking handler is logged and skipped.
pub struct EventBus {
    tx: mpsc::UnboundedSender<Event>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    subscribers: RwLock<HashMap<EventType, Vec<Subscription>>>,
    history: Mutex<VecDeque<Event>>,
    history_size: usize,
    next_subscription: AtomicU64,
    published: AtomicU64,
    processed: AtomicU64,
    processed_notify: Notify,
    running: AtomicBool,
    shutdown: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl EventBus {
    pub fn new(history_size: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            subscribers: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(history_size.min(4096))),
            history_size: history_size.max(1),
            next_subscription: AtomicU64::new(1),
            published: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            processed_notify: Notify::new(),
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    /// Starts the dispatch loop. Events published earlier are delivered first.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(mut rx) = self.rx.lock().take() else {
            self.running.store(false, Ordering::SeqCst);
            return;
        };

        let bus: Weak<EventBus> = Arc::downgrade(self);
        let shutdown = Arc::clone(&self.shutdown);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.notified() => break,
                    next = rx.recv() => {
                        let Some(event) = next else { break };
                        let Some(bus) = bus.upgrade() else { break };
                        bus.dispatch(event).await;
                    }
                }
            }
            // Hand the queue back so a later start() resumes where we left off
            if let Some(bus) = bus.upgrade() {
                *bus.rx.lock() = Some(rx);
                bus.running.store(false, Ordering::SeqCst);
            }
        });

        *self.task.lock() = Some(handle);
        info!("Event bus started");
    }

    /// Stops the dispatch loop. Undelivered events stay queued.
    pub async fn stop(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_one();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.running.store(false, Ordering::SeqCst);
        info!("Event bus stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.subscribers
            .write()
            .entry(event_type)
            .or_default()
            .push(Subscription { id, handler });
        debug!(event_type = %event_type, "Subscribed");
        id
    }

    /// Subscribes a synchronous closure.
    pub fn subscribe_fn<F>(&self, event_type: EventType, f: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(event_type, Arc::new(FnHandler(f)))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        for subs in subscribers.values_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn publish(&self, event: Event) {
        debug!(event_type = %event.event_type, source = %event.source, "Publishing event");
        self.published.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(event).is_err() {
            // Receiver only disappears when the bus itself is being dropped
            self.published.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn emit(&self, event_type: EventType, source: &str, payload: Value) {
        self.publish(Event::new(event_type, source, payload));
    }

    async fn dispatch(&self, event: Event) {
        {
            let mut history = self.history.lock();
            history.push_back(event.clone());
            while history.len() > self.history_size {
                history.pop_front();
            }
        }

        let handlers: Vec<Arc<dyn EventHandler>> = self
            .subscribers
            .read()
            .get(&event.event_type)
            .map(|subs| subs.iter().map(|s| Arc::clone(&s.handler)).collect())
            .unwrap_or_default();

        for handler in handlers {
            match AssertUnwindSafe(handler.handle(&event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(event_type = %event.event_type, error = %e, "Event handler failed")
                }
                Err(_) => error!(event_type = %event.event_type, "Event handler panicked"),
            }
        }

        self.processed.fetch_add(1, Ordering::SeqCst);
        self.processed_notify.notify_waiters();
    }

    /// Waits until every event published before this call has been dispatched.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let target = self.published.load(Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.processed_notify.notified();
            if self.processed.load(Ordering::SeqCst) >= target {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.processed.load(Ordering::SeqCst) >= target;
            }
        }
    }

    /// Matching events from history, most recent first.
    pub fn history(&self, filter: &EventFilter) -> Vec<Event> {
        self.history
            .lock()
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(filter.limit)
            .cloned()
            .collect()
    }

    pub fn recent(&self, event_type: EventType, limit: usize) -> Vec<Event> {
        self.history(&EventFilter::new().of_type(event_type).limit(limit))
    }

    pub fn statistics(&self) -> EventStatistics {
        let mut event_counts = HashMap::new();
        let total_events = {
            let history = self.history.lock();
            for event in history.iter() {
                *event_counts
                    .entry(event.event_type.as_str().to_string())
                    .or_insert(0) += 1;
            }
            history.len()
        };
        let subscribers = self
            .subscribers
            .read()
            .iter()
            .map(|(t, subs)| (t.as_str().to_string(), subs.len()))
            .collect();
        let published = self.published.load(Ordering::SeqCst);
        let processed = self.processed.load(Ordering::SeqCst);

        EventStatistics {
            total_events,
            published,
            processed,
            event_counts,
            subscribers,
            queue_size: published.saturating_sub(processed),
            running: self.is_running(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AppError;
    use serde_json::json;

    const FLUSH: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_history_is_bounded() {
        let bus = Arc::new(EventBus::new(3));
        bus.start();
        for i in 0..5 {
            bus.emit(EventType::AgentProgress, "test", json!({"i": i}));
        }
        assert!(bus.flush(FLUSH).await);

        let history = bus.history(&EventFilter::new());
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].payload["i"], 4);
        assert_eq!(history[2].payload["i"], 2);
    }

    #[tokio::test]
    async fn test_events_published_before_start_are_delivered() {
        let bus = Arc::new(EventBus::default());
        bus.emit(EventType::SessionStarted, "test", json!({}));
        assert_eq!(bus.statistics().queue_size, 1);

        bus.start();
        assert!(bus.flush(FLUSH).await);
        assert_eq!(bus.recent(EventType::SessionStarted, 10).len(), 1);
    }

    #[tokio::test]
    async fn test_failing_handler_is_isolated() {
        struct Failing;

        #[async_trait]
        impl EventHandler for Failing {
            async fn handle(&self, _event: &Event) -> Result<()> {
                Err(AppError::Internal("boom".into()))
            }
        }

        let bus = Arc::new(EventBus::default());
        let seen = Arc::new(AtomicU64::new(0));
        bus.subscribe(EventType::AgentError, Arc::new(Failing));
        bus.subscribe_fn(EventType::AgentError, |_| panic!("handler panic"));
        let counter = Arc::clone(&seen);
        bus.subscribe_fn(EventType::AgentError, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.start();
        bus.emit(EventType::AgentError, "test", json!({}));
        bus.emit(EventType::AgentError, "test", json!({}));
        assert!(bus.flush(FLUSH).await);

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(bus.is_running());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = Arc::new(EventBus::default());
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        let id = bus.subscribe_fn(EventType::UserAction, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.start();

        bus.emit(EventType::UserAction, "test", json!({}));
        assert!(bus.flush(FLUSH).await);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(EventType::UserAction, "test", json!({}));
        assert!(bus.flush(FLUSH).await);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_and_restart_keeps_queue() {
        let bus = Arc::new(EventBus::default());
        bus.start();
        bus.stop().await;
        assert!(!bus.is_running());

        bus.emit(EventType::UserAction, "test", json!({}));
        assert!(!bus.flush(Duration::from_millis(50)).await);

        bus.start();
        assert!(bus.flush(FLUSH).await);
        assert_eq!(bus.statistics().processed, 1);
    }
}
