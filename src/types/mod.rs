use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Rating assigned to every artifact before its first tournament match.
pub const DEFAULT_ELO_RATING: f64 = 1200.0;

/// Free-form key/value parameters and metadata.
pub type Params = Map<String, Value>;

/// Generates a fresh, globally unique identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// ============= Artifact Types =============

/// A research hypothesis tracked, reviewed and ranked by the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub summary: String,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_rating")]
    pub elo_rating: f64,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default)]
    pub tournament_matches: Vec<MatchRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub metadata: Params,
}

fn default_rating() -> f64 {
    DEFAULT_ELO_RATING
}

impl Artifact {
    /// Creates a new artifact with a fresh id and the default rating.
    pub fn new(content: impl Into<String>, summary: impl Into<String>, agent_id: &str) -> Self {
        Self {
            id: new_id(),
            content: content.into(),
            summary: summary.into(),
            agent_id: agent_id.to_string(),
            created_at: Utc::now(),
            elo_rating: DEFAULT_ELO_RATING,
            reviews: Vec::new(),
            tournament_matches: Vec::new(),
            parent_id: None,
            metadata: Params::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Returns true when a review of the given type has already been recorded.
    pub fn has_review(&self, review_type: ReviewType) -> bool {
        self.reviews.iter().any(|r| r.review_type == review_type)
    }

    pub fn wins(&self) -> usize {
        self.tournament_matches
            .iter()
            .filter(|m| m.winner.as_deref() == Some(self.id.as_str()))
            .count()
    }
}

/// A review attached to an artifact by a reflection agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub review_type: ReviewType,
    pub agent_id: String,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

// ============= Tournament Types =============

/// Outcome of a single judged criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    A,
    B,
    Tie,
}

impl Verdict {
    /// Parses a judge's free-text winner label ("A", "Hypothesis B", "tie").
    pub fn parse(raw: &str) -> Option<Self> {
        let label = raw.trim().to_lowercase();
        if label.contains("tie") || label == "draw" {
            return Some(Verdict::Tie);
        }
        let last = label
            .trim_end_matches(|c: char| !c.is_alphanumeric())
            .chars()
            .last()?;
        match last {
            'a' => Some(Verdict::A),
            'b' => Some(Verdict::B),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionOutcome {
    pub criterion: String,
    pub winner: Verdict,
}

/// Record of one pairwise tournament match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub artifact_a: String,
    pub artifact_b: String,
    #[serde(default)]
    pub criteria: Vec<CriterionOutcome>,
    /// Winning artifact id, `None` on a tie.
    pub winner: Option<String>,
    #[serde(default)]
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

impl MatchRecord {
    pub fn is_tie(&self) -> bool {
        self.winner.is_none()
    }
}

/// One row of a ranking snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub artifact_id: String,
    pub elo_rating: f64,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentStatistics {
    pub match_count: usize,
    pub artifact_count: usize,
    pub avg_rating: f64,
    pub rating_std: f64,
    pub timestamp: DateTime<Utc>,
}

/// Tournament bookkeeping kept in the shared store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TournamentState {
    pub matches: Vec<MatchRecord>,
    pub rankings: Vec<RankingEntry>,
    pub statistics: Option<TournamentStatistics>,
}

// ============= Capability & Task Types =============

/// Worker agent kinds. Every task kind maps to exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Generation,
    Reflection,
    Ranking,
    Evolution,
    Proximity,
    MetaReview,
}

impl AgentKind {
    pub const ALL: [AgentKind; 6] = [
        AgentKind::Generation,
        AgentKind::Reflection,
        AgentKind::Ranking,
        AgentKind::Evolution,
        AgentKind::Proximity,
        AgentKind::MetaReview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Generation => "generation",
            AgentKind::Reflection => "reflection",
            AgentKind::Ranking => "ranking",
            AgentKind::Evolution => "evolution",
            AgentKind::Proximity => "proximity",
            AgentKind::MetaReview => "meta_review",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    GenerateHypothesis,
    ReviewHypothesis,
    TournamentMatch,
    UpdateRankings,
    EvolveHypothesis,
    ProximityAnalysis,
    MetaReview,
}

impl TaskKind {
    /// Dispatch table: which agent kind executes this task kind.
    pub fn agent_kind(&self) -> AgentKind {
        match self {
            TaskKind::GenerateHypothesis => AgentKind::Generation,
            TaskKind::ReviewHypothesis => AgentKind::Reflection,
            TaskKind::TournamentMatch | TaskKind::UpdateRankings => AgentKind::Ranking,
            TaskKind::EvolveHypothesis => AgentKind::Evolution,
            TaskKind::ProximityAnalysis => AgentKind::Proximity,
            TaskKind::MetaReview => AgentKind::MetaReview,
        }
    }

    /// Default scheduling priority; lower runs first.
    pub fn default_priority(&self) -> u32 {
        match self {
            TaskKind::GenerateHypothesis => 1,
            TaskKind::ReviewHypothesis => 2,
            TaskKind::TournamentMatch | TaskKind::EvolveHypothesis | TaskKind::MetaReview => 3,
            TaskKind::ProximityAnalysis => 3,
            TaskKind::UpdateRankings => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

/// A unit of scheduled work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub priority: u32,
    pub params: Params,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            id: new_id(),
            kind,
            priority: kind.default_priority(),
            params: Params::new(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn agent_kind(&self) -> AgentKind {
        self.kind.agent_kind()
    }

    /// Reads a required string parameter.
    pub fn str_param(&self, key: &str) -> Result<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Task {} ({:?}) is missing string parameter '{}'",
                    self.id, self.kind, key
                ))
            })
    }

    pub fn opt_str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Reads a required list of strings.
    pub fn str_list_param(&self, key: &str) -> Result<Vec<String>> {
        let values = self
            .params
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Task {} ({:?}) is missing list parameter '{}'",
                    self.id, self.kind, key
                ))
            })?;
        values
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    AppError::Validation(format!("Parameter '{}' must contain strings", key))
                })
            })
            .collect()
    }

    /// Parses an enum-valued parameter such as a strategy name.
    pub fn parsed_param<T: FromStr<Err = AppError>>(&self, key: &str) -> Result<T> {
        self.str_param(key)?.parse()
    }
}

// ============= Strategy Enums =============

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim() {
                    $($label => Ok($name::$variant),)+
                    other => Err(AppError::Validation(format!(
                        "Unknown {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// How a generation agent approaches a new hypothesis.
    GenerationStrategy {
        LiteratureExploration => "literature_exploration",
        ScientificDebate => "scientific_debate",
        AssumptionsIdentification => "assumptions_identification",
        ResearchExpansion => "research_expansion",
    }
);

string_enum!(
    ReviewType {
        InitialReview => "initial_review",
        FullReview => "full_review",
        DeepVerification => "deep_verification",
        ObservationReview => "observation_review",
        SimulationReview => "simulation_review",
    }
);

impl ReviewType {
    /// Review types scheduled when the caller does not name any.
    pub const DEFAULTS: &'static [ReviewType] = &[ReviewType::InitialReview, ReviewType::FullReview];
}

string_enum!(
    EvolutionType {
        ImproveHypothesis => "improve_hypothesis",
        CombineHypotheses => "combine_hypotheses",
        SimplifyHypothesis => "simplify_hypothesis",
        OutOfBoxThinking => "out_of_box_thinking",
    }
);

string_enum!(
    MetaReviewKind {
        MetaReview => "meta_review",
        ResearchOverview => "research_overview",
    }
);

// ============= Agent State =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Disabled,
}

/// Bookkeeping for one registered worker agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    pub agent_kind: AgentKind,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    /// Kind-specific counters, e.g. `hypotheses_generated`.
    pub metrics: HashMap<String, u64>,
    /// Latest structured outputs, e.g. `meta_review` or `proximity_graph`.
    pub outputs: Params,
    pub last_activity: DateTime<Utc>,
    pub status: AgentStatus,
}

impl AgentState {
    pub fn new(agent_id: &str, agent_kind: AgentKind) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            agent_kind,
            tasks_completed: 0,
            tasks_failed: 0,
            metrics: HashMap::new(),
            outputs: Params::new(),
            last_activity: Utc::now(),
            status: AgentStatus::Idle,
        }
    }

    pub fn bump(&mut self, metric: &str) {
        *self.metrics.entry(metric.to_string()).or_insert(0) += 1;
    }

    pub fn metric(&self, metric: &str) -> u64 {
        self.metrics.get(metric).copied().unwrap_or(0)
    }
}

// ============= Session Types =============

/// The research goal and its parsed plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchGoal {
    pub goal: String,
    #[serde(default)]
    pub plan: Params,
    pub set_at: DateTime<Utc>,
}

impl ResearchGoal {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            plan: Params::new(),
            set_at: Utc::now(),
        }
    }

    /// Evaluation criteria from the plan, if the plan specifies any.
    pub fn evaluation_criteria(&self) -> Option<Vec<String>> {
        self.plan
            .get("evaluation_criteria")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    #[default]
    Interactive,
    Batch,
    Hybrid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    #[serde(default)]
    pub hypotheses_generated: u64,
    #[serde(default)]
    pub feedback_entries: u64,
    #[serde(default)]
    pub tournament_matches: u64,
    #[serde(default)]
    pub agent_interactions: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    #[serde(default)]
    pub research_goal: String,
    #[serde(default, alias = "current_mode")]
    pub mode: SessionMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, alias = "active_hypothesis_id")]
    pub active_artifact_id: Option<String>,
    #[serde(default)]
    pub stats: SessionStats,
    #[serde(default)]
    pub metadata: Params,
}

impl SessionState {
    pub fn new(research_goal: impl Into<String>, mode: SessionMode) -> Self {
        let now = Utc::now();
        Self {
            session_id: new_id(),
            research_goal: research_goal.into(),
            mode,
            created_at: now,
            updated_at: now,
            active_artifact_id: None,
            stats: SessionStats::default(),
            metadata: Params::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Format(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_table_covers_every_task_kind() {
        assert_eq!(TaskKind::TournamentMatch.agent_kind(), AgentKind::Ranking);
        assert_eq!(TaskKind::UpdateRankings.agent_kind(), AgentKind::Ranking);
        assert_eq!(TaskKind::ReviewHypothesis.agent_kind(), AgentKind::Reflection);
        assert_eq!(TaskKind::MetaReview.agent_kind(), AgentKind::MetaReview);
    }

    #[test]
    fn test_strategy_parsing() {
        let strategy: GenerationStrategy = "scientific_debate".parse().unwrap();
        assert_eq!(strategy, GenerationStrategy::ScientificDebate);

        let err = "wild_guess".parse::<GenerationStrategy>().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_verdict_parsing() {
        assert_eq!(Verdict::parse("A"), Some(Verdict::A));
        assert_eq!(Verdict::parse("Hypothesis B"), Some(Verdict::B));
        assert_eq!(Verdict::parse(" TIE "), Some(Verdict::Tie));
        assert_eq!(Verdict::parse("b."), Some(Verdict::B));
        assert_eq!(Verdict::parse("neither"), None);
        assert_eq!(Verdict::parse(""), None);
    }

    #[test]
    fn test_task_params() {
        let task = Task::new(TaskKind::ReviewHypothesis)
            .with_param("hypothesis_id", "h1")
            .with_param("review_type", "full_review");

        assert_eq!(task.priority, 2);
        assert_eq!(task.str_param("hypothesis_id").unwrap(), "h1");
        assert_eq!(
            task.parsed_param::<ReviewType>("review_type").unwrap(),
            ReviewType::FullReview
        );
        assert!(matches!(
            task.str_param("missing"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_research_goal_criteria() {
        let mut goal = ResearchGoal::new("why do cells age");
        assert!(goal.evaluation_criteria().is_none());

        goal.plan.insert(
            "evaluation_criteria".to_string(),
            serde_json::json!(["novelty", "impact"]),
        );
        assert_eq!(
            goal.evaluation_criteria().unwrap(),
            vec!["novelty".to_string(), "impact".to_string()]
        );
    }
}
