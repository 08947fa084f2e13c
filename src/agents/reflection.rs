use super::{research_goal, unsupported, TaskContext, WorkerAgent};
use crate::events::EventType;
use crate::llm::Capability;
use crate::types::{AgentKind, AppError, Result, Review, ReviewType, Task, TaskKind};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

/// Critiques hypotheses and attaches reviews to them.
pub struct ReflectionAgent {
    id: String,
    capability: Capability,
}

impl ReflectionAgent {
    pub fn new(id: impl Into<String>, capability: Capability) -> Self {
        Self {
            id: id.into(),
            capability,
        }
    }

    fn schema(review_type: ReviewType) -> Value {
        let mut properties = json!({
            "assessment": {"type": "string"},
            "strengths": {"type": "array", "items": {"type": "string"}},
            "weaknesses": {"type": "array", "items": {"type": "string"}},
            "overall_score": {"type": "number"}
        });
        let extra = match review_type {
            ReviewType::InitialReview => "passes_initial_screen",
            ReviewType::FullReview => "scientific_validity",
            ReviewType::DeepVerification => "verified_assumptions",
            ReviewType::ObservationReview => "explained_observations",
            ReviewType::SimulationReview => "simulation_outcome",
        };
        properties[extra] = json!({"type": "string"});
        json!({"type": "object", "properties": properties, "required": ["assessment"]})
    }
}

#[async_trait]
impl WorkerAgent for ReflectionAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Reflection
    }

    async fn execute(&self, task: &Task, ctx: &TaskContext) -> Result<Value> {
        if task.kind != TaskKind::ReviewHypothesis {
            return Err(unsupported(&self.id, task));
        }
        let hypothesis_id = task.str_param("hypothesis_id")?;
        let review_type = match task.opt_str_param("review_type") {
            Some(raw) => raw.parse::<ReviewType>()?,
            None => ReviewType::InitialReview,
        };
        let artifact = ctx.store.get_artifact(hypothesis_id).ok_or_else(|| {
            AppError::Validation(format!("Unknown artifact id: {}", hypothesis_id))
        })?;
        let goal = research_goal(task, ctx).unwrap_or_default();

        let prompt = format!(
            "Research goal:\n{}\n\nHypothesis:\n{}\n\nPerform a {} of this hypothesis.",
            goal,
            artifact.content,
            review_type.as_str().replace('_', " ")
        );
        let content = self
            .capability
            .invoke_structured(&prompt, &Self::schema(review_type))
            .await?;
        ctx.checkpoint()?;

        let review = Review {
            review_type,
            agent_id: self.id.clone(),
            content: content.clone(),
            created_at: Utc::now(),
        };
        let updated = ctx
            .store
            .update_artifact(hypothesis_id, move |a| a.reviews.push(review))?;

        ctx.store.set_dataset(&task.id, content);
        ctx.record(
            &self.id,
            "reviews_completed",
            Some(("last_review_type", json!(review_type.as_str()))),
        );
        ctx.events.emit(
            EventType::HypothesisUpdated,
            &self.id,
            json!({"hypothesis_id": hypothesis_id, "review_type": review_type.as_str()}),
        );

        info!(agent_id = %self.id, %hypothesis_id, %review_type, "Review completed");
        Ok(json!({
            "hypothesis_id": hypothesis_id,
            "review_type": review_type.as_str(),
            "review_count": updated.reviews.len(),
        }))
    }
}
