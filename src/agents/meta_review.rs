use super::{research_goal, unsupported, TaskContext, WorkerAgent};
use crate::llm::Capability;
use crate::types::{AgentKind, MetaReviewKind, Result, Task, TaskKind};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

const TOP_FOR_OVERVIEW: usize = 5;

/// Synthesizes reviews and rankings into meta-reviews and research overviews.
pub struct MetaReviewAgent {
    id: String,
    capability: Capability,
}

impl MetaReviewAgent {
    pub fn new(id: impl Into<String>, capability: Capability) -> Self {
        Self {
            id: id.into(),
            capability,
        }
    }

    fn schema(kind: MetaReviewKind) -> Value {
        match kind {
            MetaReviewKind::MetaReview => json!({
                "type": "object",
                "properties": {
                    "recurring_strengths": {"type": "array", "items": {"type": "string"}},
                    "recurring_weaknesses": {"type": "array", "items": {"type": "string"}},
                    "recommendations": {"type": "array", "items": {"type": "string"}},
                    "summary": {"type": "string"}
                },
                "required": ["summary"]
            }),
            MetaReviewKind::ResearchOverview => json!({
                "type": "object",
                "properties": {
                    "research_areas": {"type": "array", "items": {"type": "string"}},
                    "open_questions": {"type": "array", "items": {"type": "string"}},
                    "summary": {"type": "string"}
                },
                "required": ["summary"]
            }),
        }
    }
}

#[async_trait]
impl WorkerAgent for MetaReviewAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::MetaReview
    }

    async fn execute(&self, task: &Task, ctx: &TaskContext) -> Result<Value> {
        if task.kind != TaskKind::MetaReview {
            return Err(unsupported(&self.id, task));
        }
        let kind = match task.opt_str_param("kind") {
            Some(raw) => raw.parse::<MetaReviewKind>()?,
            None => MetaReviewKind::MetaReview,
        };
        let goal = research_goal(task, ctx)?;

        let body = match kind {
            MetaReviewKind::MetaReview => ctx
                .store
                .list_artifacts()
                .iter()
                .flat_map(|a| a.reviews.iter())
                .map(|r| format!("[{}] {}", r.review_type, r.content))
                .collect::<Vec<_>>()
                .join("\n"),
            MetaReviewKind::ResearchOverview => ctx
                .store
                .top_k(TOP_FOR_OVERVIEW)
                .iter()
                .map(|a| format!("({:.0}) {}", a.elo_rating, a.summary))
                .collect::<Vec<_>>()
                .join("\n"),
        };
        let prompt = format!(
            "Research goal:\n{}\n\nMaterial:\n{}\n\nWrite a {}.",
            goal,
            body,
            kind.as_str().replace('_', " ")
        );

        let output = self
            .capability
            .invoke_structured(&prompt, &Self::schema(kind))
            .await?;
        ctx.checkpoint()?;

        ctx.store.set_dataset(&task.id, output.clone());
        ctx.record(
            &self.id,
            "meta_reviews_completed",
            Some((kind.as_str(), output.clone())),
        );

        info!(agent_id = %self.id, %kind, "Meta review written");
        Ok(json!({"kind": kind.as_str(), "output": output}))
    }
}
