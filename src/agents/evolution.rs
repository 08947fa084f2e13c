use super::{field, object_schema, research_goal, unsupported, TaskContext, WorkerAgent};
use crate::events::EventType;
use crate::llm::Capability;
use crate::types::{AgentKind, AppError, Artifact, EvolutionType, Result, Task, TaskKind};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

/// Number of top-rated hypotheses that inspire out-of-the-box evolution.
const INSPIRATION_COUNT: usize = 3;

/// Derives new hypotheses from existing ones.
pub struct EvolutionAgent {
    id: String,
    capability: Capability,
}

impl EvolutionAgent {
    pub fn new(id: impl Into<String>, capability: Capability) -> Self {
        Self {
            id: id.into(),
            capability,
        }
    }

    fn sources(task: &Task, ctx: &TaskContext, evolution_type: EvolutionType) -> Result<Vec<Artifact>> {
        let ids = match evolution_type {
            EvolutionType::ImproveHypothesis | EvolutionType::SimplifyHypothesis => {
                vec![task.str_param("hypothesis_id")?.to_string()]
            }
            EvolutionType::CombineHypotheses => {
                let ids = task.str_list_param("hypothesis_ids")?;
                if ids.len() < 2 {
                    return Err(AppError::Validation(
                        "Combining needs at least 2 hypothesis_ids".into(),
                    ));
                }
                ids
            }
            EvolutionType::OutOfBoxThinking => {
                let top = ctx.store.top_k(INSPIRATION_COUNT);
                if top.is_empty() {
                    return Err(AppError::Validation(
                        "No hypotheses available for evolution".into(),
                    ));
                }
                return Ok(top);
            }
        };

        ids.iter()
            .map(|id| {
                ctx.store
                    .get_artifact(id)
                    .ok_or_else(|| AppError::Validation(format!("Unknown artifact id: {}", id)))
            })
            .collect()
    }

    fn prompt(goal: &str, evolution_type: EvolutionType, sources: &[Artifact]) -> String {
        let instruction = match evolution_type {
            EvolutionType::ImproveHypothesis => {
                "Improve this hypothesis, addressing the weaknesses its reviews identified."
            }
            EvolutionType::CombineHypotheses => {
                "Combine the strongest elements of these hypotheses into one."
            }
            EvolutionType::SimplifyHypothesis => {
                "Simplify this hypothesis while keeping it testable."
            }
            EvolutionType::OutOfBoxThinking => {
                "Using these as loose inspiration, propose a hypothesis that departs from all of them."
            }
        };
        let listed = sources
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let weaknesses = a
                    .reviews
                    .iter()
                    .filter_map(|r| r.content.get("weaknesses"))
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("Hypothesis {}:\n{}\nKnown weaknesses: {}", i + 1, a.content, weaknesses)
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        format!("Research goal:\n{}\n\n{}\n\n{}", goal, listed, instruction)
    }
}

#[async_trait]
impl WorkerAgent for EvolutionAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Evolution
    }

    async fn execute(&self, task: &Task, ctx: &TaskContext) -> Result<Value> {
        if task.kind != TaskKind::EvolveHypothesis {
            return Err(unsupported(&self.id, task));
        }
        let evolution_type = match task.opt_str_param("evolution_type") {
            Some(raw) => raw.parse::<EvolutionType>()?,
            None => EvolutionType::ImproveHypothesis,
        };
        let sources = Self::sources(task, ctx, evolution_type)?;
        let goal = research_goal(task, ctx)?;

        let schema = object_schema(&["content", "summary", "rationale"]);
        let response = self
            .capability
            .invoke_structured(&Self::prompt(&goal, evolution_type, &sources), &schema)
            .await?;
        ctx.checkpoint()?;

        let content = field(&response, "content")?;
        let summary = field(&response, "summary").unwrap_or_else(|_| content.clone());
        let parent_ids: Vec<&str> = sources.iter().map(|a| a.id.as_str()).collect();

        let mut artifact = Artifact::new(content, summary, &self.id)
            .with_metadata("evolution_type", json!(evolution_type.as_str()))
            .with_metadata("parent_ids", json!(parent_ids));
        if evolution_type != EvolutionType::OutOfBoxThinking {
            artifact = artifact.with_parent(parent_ids[0]);
        }
        artifact.elo_rating = ctx.initial_rating;

        let artifact_id = ctx.store.create_artifact(artifact)?;
        ctx.store.set_dataset(&task.id, response);
        ctx.record(
            &self.id,
            "evolutions_completed",
            Some(("last_evolution_type", json!(evolution_type.as_str()))),
        );
        ctx.events.emit(
            EventType::HypothesisGenerated,
            &self.id,
            json!({
                "hypothesis_id": artifact_id,
                "evolution_type": evolution_type.as_str(),
                "parent_ids": parent_ids,
            }),
        );

        info!(agent_id = %self.id, hypothesis_id = %artifact_id, %evolution_type, "Hypothesis evolved");
        Ok(json!({
            "hypothesis_id": artifact_id,
            "evolution_type": evolution_type.as_str(),
            "parent_ids": parent_ids,
        }))
    }
}
