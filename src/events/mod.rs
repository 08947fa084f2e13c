//! Ordered publish/subscribe notifications.
//!
//! Components publish [`Event`]s to the [`bus::EventBus`] without blocking; a
//! single dispatch task delivers them to subscribers in publish order and keeps
//! a bounded history for replay and filtering. The bus is in-process only.

/// Event bus with a single dispatch loop and bounded history.
pub mod bus;

pub use bus::{EventBus, EventHandler, EventStatistics, SubscriptionId};

use crate::types::{new_id, Params};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Default number of events retained in history.
pub const DEFAULT_HISTORY_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Hypothesis events
    HypothesisGenerated,
    HypothesisUpdated,
    HypothesisDeleted,
    HypothesisSelected,

    // Agent events
    AgentStarted,
    AgentCompleted,
    AgentError,
    AgentProgress,

    // User interaction events
    UserFeedback,
    UserAction,

    // Session events
    SessionStarted,
    SessionSaved,
    SessionLoaded,
    SystemError,

    // Tournament events
    TournamentStarted,
    TournamentMatch,
    TournamentCompleted,

    /// Control event asking the scheduler to cancel `payload.task_id`.
    TaskCancelRequested,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::HypothesisGenerated => "hypothesis_generated",
            EventType::HypothesisUpdated => "hypothesis_updated",
            EventType::HypothesisDeleted => "hypothesis_deleted",
            EventType::HypothesisSelected => "hypothesis_selected",
            EventType::AgentStarted => "agent_started",
            EventType::AgentCompleted => "agent_completed",
            EventType::AgentError => "agent_error",
            EventType::AgentProgress => "agent_progress",
            EventType::UserFeedback => "user_feedback",
            EventType::UserAction => "user_action",
            EventType::SessionStarted => "session_started",
            EventType::SessionSaved => "session_saved",
            EventType::SessionLoaded => "session_loaded",
            EventType::SystemError => "system_error",
            EventType::TournamentStarted => "tournament_started",
            EventType::TournamentMatch => "tournament_match",
            EventType::TournamentCompleted => "tournament_completed",
            EventType::TaskCancelRequested => "task_cancel_requested",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Component that published the event.
    pub source: String,
    pub payload: Params,
    /// Higher is more important. Informational only; delivery stays FIFO.
    pub priority: i32,
}

impl Event {
    /// Builds an event; a non-object payload is wrapped as `{"value": ...}`.
    pub fn new(event_type: EventType, source: &str, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Params::new(),
            other => {
                let mut map = Params::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self {
            id: new_id(),
            event_type,
            timestamp: Utc::now(),
            source: source.to_string(),
            payload,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

type EventPredicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// History query: every set condition must match.
#[derive(Clone)]
pub struct EventFilter {
    pub event_types: Option<Vec<EventType>>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
    predicate: Option<EventPredicate>,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            event_types: None,
            since: None,
            until: None,
            limit: 100,
            predicate: None,
        }
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFilter")
            .field("event_types", &self.event_types)
            .field("since", &self.since)
            .field("until", &self.until)
            .field("limit", &self.limit)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, event_type: EventType) -> Self {
        self.event_types
            .get_or_insert_with(Vec::new)
            .push(event_type);
        self
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Keeps events whose payload satisfies `predicate`.
    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Keeps events whose payload has `key == value`, e.g. a hypothesis id.
    pub fn with_payload(self, key: &str, value: &str) -> Self {
        let key = key.to_string();
        let value = value.to_string();
        self.matching(move |e| e.payload_str(&key) == Some(value.as_str()))
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if self.since.is_some_and(|since| event.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.timestamp > until) {
            return false;
        }
        self.predicate.as_ref().is_none_or(|p| p(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_non_object_payload_is_wrapped() {
        let event = Event::new(EventType::UserAction, "cli", json!("clicked"));
        assert_eq!(event.payload["value"], "clicked");

        let event = Event::new(EventType::UserAction, "cli", Value::Null);
        assert!(event.payload.is_empty());
    }

    #[test]
    fn test_filter_by_type_time_and_payload() {
        let event = Event::new(
            EventType::HypothesisUpdated,
            "reflection-0",
            json!({"hypothesis_id": "h1"}),
        );

        assert!(EventFilter::new().matches(&event));
        assert!(EventFilter::new()
            .of_type(EventType::HypothesisUpdated)
            .matches(&event));
        assert!(!EventFilter::new()
            .of_type(EventType::AgentError)
            .matches(&event));
        assert!(EventFilter::new()
            .with_payload("hypothesis_id", "h1")
            .matches(&event));
        assert!(!EventFilter::new()
            .with_payload("hypothesis_id", "h2")
            .matches(&event));

        let later = event.timestamp + Duration::seconds(5);
        assert!(!EventFilter::new().since(later).matches(&event));
        assert!(EventFilter::new()
            .between(event.timestamp - Duration::seconds(5), later)
            .matches(&event));
    }
}
