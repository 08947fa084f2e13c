use super::elo;
use crate::events::{EventBus, EventType};
use crate::llm::Capability;
use crate::memory::ArtifactStore;
use crate::types::{
    new_id, AppError, Artifact, CriterionOutcome, MatchRecord, RankingEntry, Result,
    TournamentStatistics, Verdict,
};
use crate::utils::toml_config::TournamentConfig;
use arc_swap::ArcSwap;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SOURCE: &str = "tournament";

/// Result of one played match.
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub record: MatchRecord,
    pub rating_a: f64,
    pub rating_b: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TournamentReport {
    pub requested: usize,
    pub played: usize,
    pub skipped: usize,
    pub matches: Vec<MatchRecord>,
    pub rankings: Vec<RankingEntry>,
}

/// Pairwise tournament over artifacts in the store.
///
/// Pairs are drawn uniformly at random; the judge is the injected capability.
/// Ratings change only here, through [`ArtifactStore::apply_match`].
pub struct TournamentEngine {
    store: Arc<ArtifactStore>,
    events: Arc<EventBus>,
    judge: Capability,
    config: ArcSwap<TournamentConfig>,
    rng: Mutex<StdRng>,
}

impl TournamentEngine {
    pub fn new(
        store: Arc<ArtifactStore>,
        events: Arc<EventBus>,
        judge: Capability,
        config: TournamentConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            store,
            events,
            judge,
            config: ArcSwap::from_pointee(config),
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> Arc<TournamentConfig> {
        self.config.load_full()
    }

    /// Swap in reloaded settings. K factor and criteria apply from the next
    /// match; the pairing seed is fixed at construction.
    pub fn set_config(&self, config: TournamentConfig) {
        self.config.store(Arc::new(config));
    }

    /// Criteria from the research plan, falling back to the configured list.
    pub fn criteria(&self) -> Vec<String> {
        self.store
            .research_goal()
            .and_then(|g| g.evaluation_criteria())
            .unwrap_or_else(|| self.config.load().criteria.clone())
    }

    /// Draws `match_count` pairs from `candidates`.
    ///
    /// Fails with `Validation` when fewer than two distinct, known candidates
    /// remain; nothing is mutated in that case.
    pub fn schedule(&self, candidates: &[String], match_count: usize) -> Result<Vec<(String, String)>> {
        let mut seen = HashSet::new();
        let pool: Vec<&String> = candidates.iter().filter(|id| seen.insert(*id)).collect();

        if let Some(unknown) = pool.iter().find(|id| !self.store.contains(id)) {
            return Err(AppError::Validation(format!("Unknown artifact id: {}", unknown)));
        }
        if pool.len() < 2 {
            return Err(AppError::Validation(format!(
                "A tournament needs at least 2 candidates, got {}",
                pool.len()
            )));
        }

        let mut rng = self.rng.lock();
        let pairs = (0..match_count)
            .map(|_| {
                let picked = rand::seq::index::sample(&mut *rng, pool.len(), 2);
                (pool[picked.index(0)].clone(), pool[picked.index(1)].clone())
            })
            .collect();
        Ok(pairs)
    }

    /// Judges one pair and applies the rating update.
    pub async fn play_match(&self, a_id: &str, b_id: &str) -> Result<MatchOutcome> {
        if a_id == b_id {
            return Err(AppError::Validation(format!(
                "Artifact {} cannot be matched against itself",
                a_id
            )));
        }
        let a = self.artifact(a_id)?;
        let b = self.artifact(b_id)?;
        let criteria = self.criteria();

        let prompt = self.judge_prompt(&a, &b, &criteria);
        let response = self
            .judge
            .invoke_structured(&prompt, &judge_schema())
            .await?;
        let (verdict, outcomes, reasoning) = parse_judgment(&response)?;

        let record = MatchRecord {
            match_id: new_id(),
            artifact_a: a.id.clone(),
            artifact_b: b.id.clone(),
            criteria: outcomes,
            winner: match verdict {
                Verdict::A => Some(a.id.clone()),
                Verdict::B => Some(b.id.clone()),
                Verdict::Tie => None,
            },
            reasoning,
            timestamp: Utc::now(),
        };

        let k = self.config.load().elo_k_factor;
        let (rating_a, rating_b) = self
            .store
            .apply_match(record.clone(), |ra, rb| elo::rate(ra, rb, verdict, k))?;

        debug!(
            match_id = %record.match_id,
            winner = ?record.winner,
            rating_a,
            rating_b,
            "Match played"
        );
        self.events.emit(
            EventType::TournamentMatch,
            SOURCE,
            json!({
                "match_id": record.match_id,
                "hypothesis1_id": record.artifact_a,
                "hypothesis2_id": record.artifact_b,
                "winner": record.winner,
                "hypothesis1_new_rating": rating_a,
                "hypothesis2_new_rating": rating_b,
            }),
        );

        Ok(MatchOutcome {
            record,
            rating_a,
            rating_b,
        })
    }

    /// Plays `match_count` matches in sequence, skipping failed ones.
    pub async fn run(&self, candidates: &[String], match_count: usize) -> Result<TournamentReport> {
        let pairs = self.schedule(candidates, match_count)?;
        self.publish_started(candidates.len(), pairs.len());

        let mut matches = Vec::with_capacity(pairs.len());
        let mut skipped = 0;
        for (a, b) in &pairs {
            match self.play_match(a, b).await {
                Ok(outcome) => matches.push(outcome.record),
                Err(e) => {
                    skipped += 1;
                    warn!(hypothesis1_id = %a, hypothesis2_id = %b, error = %e, "Skipping failed match");
                }
            }
        }

        let rankings = self.update_rankings();
        self.publish_completed(matches.len(), skipped);
        info!(played = matches.len(), skipped, "Tournament finished");

        Ok(TournamentReport {
            requested: pairs.len(),
            played: matches.len(),
            skipped,
            matches,
            rankings,
        })
    }

    pub fn publish_started(&self, candidates: usize, match_count: usize) {
        self.events.emit(
            EventType::TournamentStarted,
            SOURCE,
            json!({"candidates": candidates, "match_count": match_count}),
        );
    }

    pub fn publish_completed(&self, played: usize, skipped: usize) {
        self.events.emit(
            EventType::TournamentCompleted,
            SOURCE,
            json!({"played": played, "skipped": skipped}),
        );
    }

    /// Current ranking: rating descending, earlier creation first on ties.
    pub fn ranking_snapshot(&self) -> Vec<RankingEntry> {
        self.store
            .ranked()
            .into_iter()
            .enumerate()
            .map(|(i, a)| RankingEntry {
                rank: i + 1,
                artifact_id: a.id,
                elo_rating: a.elo_rating,
                summary: a.summary,
                created_at: a.created_at,
            })
            .collect()
    }

    /// Stores the current ranking and rating statistics in the tournament state.
    pub fn update_rankings(&self) -> Vec<RankingEntry> {
        let rankings = self.ranking_snapshot();
        let n = rankings.len();
        let avg_rating = if n == 0 {
            0.0
        } else {
            rankings.iter().map(|r| r.elo_rating).sum::<f64>() / n as f64
        };
        let rating_std = if n == 0 {
            0.0
        } else {
            (rankings
                .iter()
                .map(|r| (r.elo_rating - avg_rating).powi(2))
                .sum::<f64>()
                / n as f64)
                .sqrt()
        };

        let stored = rankings.clone();
        self.store.update_tournament_state(move |state| {
            state.statistics = Some(TournamentStatistics {
                match_count: state.matches.len(),
                artifact_count: n,
                avg_rating,
                rating_std,
                timestamp: Utc::now(),
            });
            state.rankings = stored;
        });
        rankings
    }

    fn artifact(&self, id: &str) -> Result<Artifact> {
        self.store
            .get_artifact(id)
            .ok_or_else(|| AppError::Validation(format!("Unknown artifact id: {}", id)))
    }

    fn judge_prompt(&self, a: &Artifact, b: &Artifact, criteria: &[String]) -> String {
        let goal = self
            .store
            .research_goal()
            .map(|g| g.goal)
            .unwrap_or_default();
        format!(
            "Judge a scientific debate between two research hypotheses.\n\n\
             Research goal:\n{}\n\nHypothesis A:\n{}\n\nHypothesis B:\n{}\n\n\
             Compare them on: {}. Name the stronger hypothesis per criterion and overall (A, B or tie).",
            goal,
            a.content,
            b.content,
            criteria.join(", ")
        )
    }
}

/// Response contract sent to the judge capability.
pub fn judge_schema() -> Value {
    let verdict = json!({"type": "string", "enum": ["A", "B", "tie"]});
    json!({
        "type": "object",
        "properties": {
            "criteria_comparison": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "criterion": {"type": "string"},
                        "winner": verdict
                    }
                }
            },
            "overall_winner": verdict,
            "reasoning": {"type": "string"}
        },
        "required": ["overall_winner"]
    })
}

/// Reads a judge response. An unrecognized overall winner is a capability failure.
pub fn parse_judgment(response: &Value) -> Result<(Verdict, Vec<CriterionOutcome>, String)> {
    let raw = response
        .get("overall_winner")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Capability("Judge response has no overall_winner".into()))?;
    let verdict = Verdict::parse(raw).ok_or_else(|| {
        AppError::Capability(format!("Judge returned an unrecognized winner: {}", raw))
    })?;

    let outcomes = response
        .get("criteria_comparison")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let criterion = item.get("criterion")?.as_str()?.to_string();
                    let winner = Verdict::parse(item.get("winner")?.as_str()?)?;
                    Some(CriterionOutcome { criterion, winner })
                })
                .collect()
        })
        .unwrap_or_default();

    let reasoning = response
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok((verdict, outcomes, reasoning))
}
