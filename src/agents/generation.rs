use super::{field, object_schema, research_goal, unsupported, TaskContext, WorkerAgent};
use crate::events::EventType;
use crate::llm::Capability;
use crate::types::{AgentKind, Artifact, GenerationStrategy, Result, Task, TaskKind};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

/// Proposes new hypotheses for the research goal.
pub struct GenerationAgent {
    id: String,
    capability: Capability,
}

impl GenerationAgent {
    pub fn new(id: impl Into<String>, capability: Capability) -> Self {
        Self {
            id: id.into(),
            capability,
        }
    }

    fn prompt(goal: &str, strategy: GenerationStrategy) -> String {
        let approach = match strategy {
            GenerationStrategy::LiteratureExploration => {
                "Ground the hypothesis in what the existing literature leaves unexplained."
            }
            GenerationStrategy::ScientificDebate => {
                "Simulate a debate between experts and report the hypothesis that survives it."
            }
            GenerationStrategy::AssumptionsIdentification => {
                "List the assumptions behind current thinking and build on the weakest one."
            }
            GenerationStrategy::ResearchExpansion => {
                "Extend the most promising existing direction into new territory."
            }
        };
        format!(
            "Research goal:\n{}\n\nPropose one novel, testable research hypothesis. {}",
            goal, approach
        )
    }
}

#[async_trait]
impl WorkerAgent for GenerationAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Generation
    }

    async fn execute(&self, task: &Task, ctx: &TaskContext) -> Result<Value> {
        if task.kind != TaskKind::GenerateHypothesis {
            return Err(unsupported(&self.id, task));
        }
        let strategy = match task.opt_str_param("strategy") {
            Some(raw) => raw.parse::<GenerationStrategy>()?,
            None => GenerationStrategy::LiteratureExploration,
        };
        let goal = research_goal(task, ctx)?;

        let schema = object_schema(&["title", "content", "summary", "explanation"]);
        let response = self
            .capability
            .invoke_structured(&Self::prompt(&goal, strategy), &schema)
            .await?;
        ctx.checkpoint()?;

        let content = field(&response, "content")?;
        let summary = field(&response, "summary").unwrap_or_else(|_| content.clone());
        let mut artifact = Artifact::new(content, summary, &self.id)
            .with_metadata("generation_strategy", json!(strategy.as_str()))
            .with_metadata("task_id", json!(task.id));
        if let Ok(title) = field(&response, "title") {
            artifact = artifact.with_metadata("title", json!(title));
        }
        artifact.elo_rating = ctx.initial_rating;

        let artifact_id = ctx.store.create_artifact(artifact)?;
        ctx.store.set_dataset(&task.id, response.clone());
        ctx.record(
            &self.id,
            "hypotheses_generated",
            Some(("last_strategy", json!(strategy.as_str()))),
        );
        ctx.events.emit(
            EventType::HypothesisGenerated,
            &self.id,
            json!({"hypothesis_id": artifact_id, "strategy": strategy.as_str()}),
        );

        info!(agent_id = %self.id, hypothesis_id = %artifact_id, %strategy, "Hypothesis generated");
        Ok(json!({"hypothesis_id": artifact_id, "strategy": strategy.as_str()}))
    }
}
