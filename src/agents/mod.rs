pub mod evolution;
pub mod generation;
pub mod meta_review;
pub mod proximity;
pub mod ranking;
pub mod reflection;
pub mod registry;

use crate::events::EventBus;
use crate::memory::ArtifactStore;
use crate::types::{AgentKind, AgentState, AppError, Result, Task, TaskKind};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Re-export commonly used types
pub use evolution::EvolutionAgent;
pub use generation::GenerationAgent;
pub use meta_review::MetaReviewAgent;
pub use proximity::ProximityAgent;
pub use ranking::RankingAgent;
pub use reflection::ReflectionAgent;
pub use registry::{AgentRegistry, AgentRegistryBuilder};

/// Base trait for all worker agents
///
/// Agents are opaque to the scheduler: it only knows their kind and hands
/// them tasks of the matching [`TaskKind`]s.
#[async_trait]
pub trait WorkerAgent: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> AgentKind;

    fn supports(&self, task: TaskKind) -> bool {
        task.agent_kind() == self.kind()
    }

    /// Execute the task, writing results through `ctx.store`
    async fn execute(&self, task: &Task, ctx: &TaskContext) -> Result<Value>;
}

/// Everything a running task may touch.
#[derive(Clone)]
pub struct TaskContext {
    pub store: Arc<ArtifactStore>,
    pub events: Arc<EventBus>,
    /// Rating given to newly created artifacts
    pub initial_rating: f64,
    cancelled: Arc<AtomicBool>,
}

impl TaskContext {
    pub fn new(store: Arc<ArtifactStore>, events: Arc<EventBus>, initial_rating: f64) -> Self {
        Self {
            store,
            events,
            initial_rating,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A copy sharing store and bus but with its own cancellation flag.
    pub fn for_task(&self, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            store: Arc::clone(&self.store),
            events: Arc::clone(&self.events),
            initial_rating: self.initial_rating,
            cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cooperative cancellation point.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(AppError::Cancelled("Task was cancelled".into()));
        }
        Ok(())
    }

    /// Bumps a metric on the agent's state and records its latest output.
    pub fn record(&self, agent_id: &str, metric: &str, output: Option<(&str, Value)>) {
        self.store.update_agent_state(agent_id, |state: &mut AgentState| {
            state.bump(metric);
            if let Some((key, value)) = output {
                state.outputs.insert(key.to_string(), value);
            }
        });
    }
}

/// Builds a flat object schema of string fields.
pub(crate) fn object_schema(fields: &[&str]) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|f| (f.to_string(), json!({"type": "string"})))
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": fields,
    })
}

/// Reads a string field from a capability response.
pub(crate) fn field(response: &Value, name: &str) -> Result<String> {
    response
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::Capability(format!("Response is missing '{}'", name)))
}

/// The research goal for a task: its own parameter or the store's goal.
pub(crate) fn research_goal(task: &Task, ctx: &TaskContext) -> Result<String> {
    if let Some(goal) = task.opt_str_param("research_goal").filter(|g| !g.is_empty()) {
        return Ok(goal.to_string());
    }
    ctx.store
        .research_goal()
        .map(|g| g.goal)
        .ok_or_else(|| AppError::Validation("Research goal must be set first".into()))
}

pub(crate) fn unsupported(agent_id: &str, task: &Task) -> AppError {
    AppError::Validation(format!(
        "Agent {} cannot execute {:?} tasks",
        agent_id, task.kind
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_schema() {
        let schema = object_schema(&["content", "summary"]);
        assert_eq!(schema["properties"]["content"]["type"], "string");
        assert_eq!(schema["required"][1], "summary");
    }

    #[test]
    fn test_field_rejects_blank() {
        let response = json!({"content": "  ", "summary": "ok"});
        assert!(field(&response, "content").is_err());
        assert_eq!(field(&response, "summary").unwrap(), "ok");
    }

    #[test]
    fn test_checkpoint_observes_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = TaskContext::new(
            Arc::new(ArtifactStore::new()),
            Arc::new(EventBus::default()),
            1200.0,
        )
        .for_task(Arc::clone(&flag));

        assert!(ctx.checkpoint().is_ok());
        flag.store(true, Ordering::SeqCst);
        assert!(matches!(ctx.checkpoint(), Err(AppError::Cancelled(_))));
    }
}
