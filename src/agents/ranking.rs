use super::{unsupported, TaskContext, WorkerAgent};
use crate::tournament::TournamentEngine;
use crate::types::{AgentKind, Result, Task, TaskKind};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Runs tournament matches and ranking refreshes through the engine.
pub struct RankingAgent {
    id: String,
    engine: Arc<TournamentEngine>,
}

impl RankingAgent {
    pub fn new(id: impl Into<String>, engine: Arc<TournamentEngine>) -> Self {
        Self {
            id: id.into(),
            engine,
        }
    }
}

#[async_trait]
impl WorkerAgent for RankingAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Ranking
    }

    async fn execute(&self, task: &Task, ctx: &TaskContext) -> Result<Value> {
        match task.kind {
            TaskKind::TournamentMatch => {
                let a = task.str_param("hypothesis1_id")?;
                let b = task.str_param("hypothesis2_id")?;
                ctx.checkpoint()?;

                let outcome = self.engine.play_match(a, b).await?;
                ctx.record(
                    &self.id,
                    "matches_conducted",
                    Some(("criteria_used", json!(self.engine.criteria()))),
                );
                Ok(json!({
                    "match_id": outcome.record.match_id,
                    "hypothesis1_id": a,
                    "hypothesis2_id": b,
                    "winner": outcome.record.winner,
                    "hypothesis1_new_rating": outcome.rating_a,
                    "hypothesis2_new_rating": outcome.rating_b,
                }))
            }
            TaskKind::UpdateRankings => {
                let rankings = self.engine.update_rankings();
                let statistics = ctx.store.tournament_state().statistics;
                ctx.record(&self.id, "rankings_completed", None);

                let top: Vec<_> = rankings.into_iter().take(10).collect();
                let result = json!({"rankings": top, "statistics": statistics});
                ctx.store.set_dataset(&task.id, result.clone());
                Ok(result)
            }
            _ => Err(unsupported(&self.id, task)),
        }
    }
}
