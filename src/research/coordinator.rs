use crate::agents::{AgentRegistryBuilder, TaskContext};
use crate::events::{EventBus, EventStatistics, EventType};
use crate::llm::{Capability, LLMClient};
use crate::memory::ArtifactStore;
use crate::scheduler::{SchedulerStatistics, TaskScheduler, TaskTicket};
use crate::session::SessionPersistence;
use crate::tournament::TournamentEngine;
use crate::types::{
    AgentState, AppError, Artifact, EvolutionType, GenerationStrategy, MetaReviewKind,
    RankingEntry, ResearchGoal, Result, ReviewType, SessionMode, SessionState, Task, TaskKind,
    TaskStatus,
};
use crate::utils::toml_config::{JnanaConfig, JnanaConfigManager};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SOURCE: &str = "coordinator";

/// Candidates considered by evolution when no ids are given.
const EVOLUTION_CANDIDATES: usize = 5;

/// Options for [`ResearchCoordinator::run_full_cycle`].
#[derive(Debug, Clone, Copy)]
pub struct CycleOptions {
    pub initial_count: usize,
    pub iterations: usize,
    pub matches_per_iteration: usize,
    /// Fresh hypotheses generated at the end of each iteration
    pub new_per_iteration: usize,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            initial_count: 5,
            iterations: 2,
            matches_per_iteration: 10,
            new_per_iteration: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub iterations: usize,
    pub generated: usize,
    pub reviewed: usize,
    pub matches_played: usize,
    pub evolved: usize,
    pub meta_review: Option<Value>,
    pub research_overview: Option<Value>,
    pub top: Vec<RankingEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResearchStatistics {
    pub session: Option<SessionState>,
    pub artifact_count: usize,
    pub tournament_matches: usize,
    pub top_rating: Option<f64>,
    pub scheduler: SchedulerStatistics,
    pub events: EventStatistics,
    pub agents: Vec<AgentState>,
}

/// Control surface over the whole orchestration core.
///
/// Owns the store, bus, scheduler, tournament engine and session
/// persistence for one research session, and turns each call into tasks
/// for the worker agents.
///
/// Configuration comes from a [`JnanaConfigManager`]. Reloaded tournament
/// settings (K factor, criteria, default match count) apply from the next
/// operation; pool sizes and history size are fixed at construction.
pub struct ResearchCoordinator {
    settings: JnanaConfigManager,
    /// Configuration last pushed into the components
    applied: Mutex<Arc<JnanaConfig>>,
    store: Arc<ArtifactStore>,
    events: Arc<EventBus>,
    engine: Arc<TournamentEngine>,
    scheduler: TaskScheduler,
    persistence: Arc<SessionPersistence>,
}

impl ResearchCoordinator {
    /// Builds the default agent pool around `client`.
    pub fn new(config: JnanaConfig, client: Arc<dyn LLMClient>) -> Result<Self> {
        Self::with_agents(config, client, |builder| builder)
    }

    /// Like [`new`](Self::new), following reloads of `settings`.
    pub fn with_config_manager(settings: JnanaConfigManager, client: Arc<dyn LLMClient>) -> Result<Self> {
        Self::build(settings, client, |builder| builder)
    }

    /// Like [`new`](Self::new), letting the caller adjust the agent pool.
    pub fn with_agents<F>(config: JnanaConfig, client: Arc<dyn LLMClient>, customize: F) -> Result<Self>
    where
        F: FnOnce(AgentRegistryBuilder) -> AgentRegistryBuilder,
    {
        Self::build(JnanaConfigManager::from_config(config), client, customize)
    }

    fn build<F>(settings: JnanaConfigManager, client: Arc<dyn LLMClient>, customize: F) -> Result<Self>
    where
        F: FnOnce(AgentRegistryBuilder) -> AgentRegistryBuilder,
    {
        let config = settings.config();
        config.validate()?;

        let store = Arc::new(ArtifactStore::with_lock_timeout(
            config.scheduler.lock_timeout(),
        ));
        let events = Arc::new(EventBus::new(config.events.event_history_size));
        let capability = Capability::new(client, config.scheduler.capability_timeout());
        let engine = Arc::new(TournamentEngine::new(
            Arc::clone(&store),
            Arc::clone(&events),
            capability.clone(),
            config.tournament.clone(),
        ));

        let registry = customize(
            AgentRegistryBuilder::new()
                .with_pool(config.agents.clone())
                .with_capability(capability)
                .with_engine(Arc::clone(&engine)),
        )
        .build()?;

        let ctx = TaskContext::new(
            Arc::clone(&store),
            Arc::clone(&events),
            config.tournament.initial_rating,
        );
        let scheduler = TaskScheduler::new(config.scheduler.clone(), ctx);
        scheduler.register_registry(&registry)?;

        let persistence = Arc::new(SessionPersistence::new(
            Arc::clone(&store),
            Arc::clone(&events),
            config.session.clone(),
        ));

        info!(agents = registry.len(), "Research coordinator ready");
        Ok(Self {
            applied: Mutex::new(config),
            settings,
            store,
            events,
            engine,
            scheduler,
            persistence,
        })
    }

    /// The current configuration, after applying any reload.
    pub fn config(&self) -> Arc<JnanaConfig> {
        self.sync_config()
    }

    pub fn config_manager(&self) -> &JnanaConfigManager {
        &self.settings
    }

    /// Pushes a reloaded configuration into the running components.
    fn sync_config(&self) -> Arc<JnanaConfig> {
        let current = self.settings.config();
        let mut applied = self.applied.lock();
        if Arc::ptr_eq(&applied, &current) {
            return current;
        }
        self.engine.set_config(current.tournament.clone());
        if current.scheduler != applied.scheduler
            || current.agents != applied.agents
            || current.events != applied.events
            || current.session != applied.session
        {
            warn!("Scheduler, agent pool, event and session settings apply on restart");
        }
        info!(
            elo_k_factor = current.tournament.elo_k_factor,
            default_match_count = current.tournament.default_match_count,
            "Applied reloaded configuration"
        );
        *applied = Arc::clone(&current);
        current
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn engine(&self) -> &Arc<TournamentEngine> {
        &self.engine
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn persistence(&self) -> &Arc<SessionPersistence> {
        &self.persistence
    }

    /// Starts the event loop, the scheduler and auto-save. Idempotent.
    pub fn start(&self) {
        self.events.start();
        self.scheduler.start();
        self.persistence.start_auto_save();
    }

    /// Stops auto-save and the scheduler, then drains the event bus.
    pub async fn shutdown(&self) {
        self.persistence.stop_auto_save();
        self.scheduler.shutdown().await;
        if !self.events.flush(Duration::from_secs(2)).await {
            warn!("Event bus did not drain before shutdown");
        }
        self.events.stop().await;
        info!("Research coordinator stopped");
    }

    // ============= Research Goal =============

    /// Set the research goal and start a new session. Returns the session id.
    pub fn set_research_goal(&self, goal: &str) -> Result<String> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(AppError::Validation("Research goal must not be empty".into()));
        }
        let config = self.sync_config();
        let mut research_goal = ResearchGoal::new(goal);
        research_goal
            .plan
            .insert("evaluation_criteria".into(), json!(config.tournament.criteria));
        self.store.set_research_goal(research_goal);
        Ok(self.persistence.create_session(goal, SessionMode::Batch))
    }

    fn require_goal(&self) -> Result<()> {
        if self.store.research_goal().is_none() {
            return Err(AppError::Validation("Research goal must be set first".into()));
        }
        Ok(())
    }

    // ============= Task Plumbing =============

    /// Submits tasks and waits for all of them to finish.
    async fn run_tasks(&self, tasks: Vec<Task>) -> Result<Vec<Task>> {
        self.sync_config();
        self.start();
        let tickets = self.scheduler.submit_all(tasks)?;
        let finished: Vec<Task> = join_all(tickets.into_iter().map(TaskTicket::wait))
            .await
            .into_iter()
            .collect::<Result<_>>()?;

        for task in &finished {
            self.persistence.record_interaction();
            if task.status == TaskStatus::Failed {
                warn!(
                    task_id = %task.id,
                    kind = ?task.kind,
                    error = task.error.as_deref().unwrap_or_default(),
                    "Task failed"
                );
            }
        }
        Ok(finished)
    }

    async fn run_task(&self, task: Task) -> Result<Task> {
        let mut finished = self.run_tasks(vec![task]).await?;
        finished
            .pop()
            .ok_or_else(|| AppError::Internal("Scheduler returned no task".into()))
    }

    fn hypothesis_ids(tasks: &[Task]) -> Vec<String> {
        tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .filter_map(|t| t.result.as_ref()?.get("hypothesis_id")?.as_str())
            .map(str::to_string)
            .collect()
    }

    fn into_result(task: Task) -> Result<Value> {
        match task.status {
            TaskStatus::Done => Ok(task.result.unwrap_or(Value::Null)),
            _ => Err(AppError::Capability(
                task.error.unwrap_or_else(|| format!("Task {} failed", task.id)),
            )),
        }
    }

    fn known_ids(&self, ids: &[String]) -> Result<()> {
        match ids.iter().find(|id| !self.store.contains(id)) {
            Some(id) => Err(AppError::Validation(format!("Unknown artifact id: {}", id))),
            None => Ok(()),
        }
    }

    // ============= Operations =============

    /// Generate `count` hypotheses, cycling through `strategies` (all when empty).
    pub async fn generate(&self, count: usize, strategies: &[GenerationStrategy]) -> Result<Vec<String>> {
        self.require_goal()?;
        let strategies = if strategies.is_empty() {
            GenerationStrategy::ALL
        } else {
            strategies
        };

        let tasks = strategies
            .iter()
            .cycle()
            .take(count)
            .map(|s| Task::new(TaskKind::GenerateHypothesis).with_param("strategy", s.as_str()))
            .collect();
        let finished = self.run_tasks(tasks).await?;
        let ids = Self::hypothesis_ids(&finished);
        info!(requested = count, generated = ids.len(), "Generation finished");
        Ok(ids)
    }

    /// Review `ids` with `review_types` (defaults: initial and full review).
    ///
    /// With no ids, every artifact missing one of the requested review types
    /// is reviewed for the missing types. Returns the number of reviews written.
    pub async fn review(&self, ids: &[String], review_types: &[ReviewType]) -> Result<usize> {
        self.require_goal()?;
        self.known_ids(ids)?;
        let review_types = if review_types.is_empty() {
            ReviewType::DEFAULTS
        } else {
            review_types
        };

        let mut tasks = Vec::new();
        let targets = if ids.is_empty() {
            self.store.list_artifacts()
        } else {
            ids.iter().filter_map(|id| self.store.get_artifact(id)).collect()
        };
        for artifact in &targets {
            for review_type in review_types {
                if ids.is_empty() && artifact.has_review(*review_type) {
                    continue;
                }
                tasks.push(
                    Task::new(TaskKind::ReviewHypothesis)
                        .with_param("hypothesis_id", artifact.id.as_str())
                        .with_param("review_type", review_type.as_str()),
                );
            }
        }

        let finished = self.run_tasks(tasks).await?;
        let reviewed = finished
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .count();
        info!(reviewed, "Review finished");
        Ok(reviewed)
    }

    /// Run a tournament of `match_count` matches (configured default when
    /// `None`) over every artifact, then refresh and return the ranking.
    pub async fn run_tournament(&self, match_count: Option<usize>) -> Result<Vec<RankingEntry>> {
        let match_count =
            match_count.unwrap_or_else(|| self.sync_config().tournament.default_match_count);
        let candidates = self.store.artifact_ids();
        let pairs = self.engine.schedule(&candidates, match_count)?;
        self.engine.publish_started(candidates.len(), pairs.len());

        let tasks = pairs
            .iter()
            .map(|(a, b)| {
                Task::new(TaskKind::TournamentMatch)
                    .with_param("hypothesis1_id", a.as_str())
                    .with_param("hypothesis2_id", b.as_str())
            })
            .collect();
        let finished = self.run_tasks(tasks).await?;
        let played = finished
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .count();
        let skipped = finished.len() - played;

        let update = self.run_task(Task::new(TaskKind::UpdateRankings)).await?;
        if update.status == TaskStatus::Failed {
            warn!("Ranking refresh failed, computing the snapshot directly");
            self.engine.update_rankings();
        }
        self.engine.publish_completed(played, skipped);
        info!(played, skipped, "Tournament finished");
        Ok(self.engine.ranking_snapshot())
    }

    /// Evolve `ids` (top-rated when empty) with each of `evolution_types`
    /// (all when empty). Returns the ids of the new hypotheses.
    pub async fn evolve(&self, ids: &[String], evolution_types: &[EvolutionType]) -> Result<Vec<String>> {
        self.require_goal()?;
        self.known_ids(ids)?;
        let evolution_types = if evolution_types.is_empty() {
            EvolutionType::ALL
        } else {
            evolution_types
        };
        let candidates: Vec<String> = if ids.is_empty() {
            self.store
                .top_k(EVOLUTION_CANDIDATES)
                .into_iter()
                .map(|a| a.id)
                .collect()
        } else {
            ids.to_vec()
        };
        if candidates.is_empty() {
            return Err(AppError::Validation("No hypotheses available for evolution".into()));
        }

        let mut tasks = Vec::new();
        for evolution_type in evolution_types {
            let task = || {
                Task::new(TaskKind::EvolveHypothesis)
                    .with_param("evolution_type", evolution_type.as_str())
            };
            match evolution_type {
                EvolutionType::ImproveHypothesis | EvolutionType::SimplifyHypothesis => {
                    for id in &candidates {
                        tasks.push(task().with_param("hypothesis_id", id.as_str()));
                    }
                }
                EvolutionType::CombineHypotheses if candidates.len() >= 2 => {
                    tasks.push(task().with_param("hypothesis_ids", json!(candidates)));
                }
                EvolutionType::CombineHypotheses => {
                    info!("Skipping combination, fewer than 2 candidates");
                }
                EvolutionType::OutOfBoxThinking => tasks.push(task()),
            }
        }

        let finished = self.run_tasks(tasks).await?;
        let ids = Self::hypothesis_ids(&finished);
        info!(evolved = ids.len(), "Evolution finished");
        Ok(ids)
    }

    /// Build the similarity graph over all artifacts.
    pub async fn analyze_proximity(&self, threshold: Option<f64>) -> Result<Value> {
        let mut task = Task::new(TaskKind::ProximityAnalysis);
        if let Some(threshold) = threshold {
            task = task.with_param("threshold", threshold);
        }
        let task_id = task.id.clone();
        Self::into_result(self.run_task(task).await?)?;
        self.store
            .get_dataset(&task_id)
            .ok_or_else(|| AppError::Internal("Proximity graph was not recorded".into()))
    }

    /// Write a meta-review or research overview.
    pub async fn meta_review(&self, kind: MetaReviewKind) -> Result<Value> {
        self.require_goal()?;
        let mut task = Task::new(TaskKind::MetaReview).with_param("kind", kind.as_str());
        if kind == MetaReviewKind::ResearchOverview {
            task = task.with_priority(4);
        }
        let result = Self::into_result(self.run_task(task).await?)?;
        Ok(result.get("output").cloned().unwrap_or(result))
    }

    /// Generate, then iterate review, tournament, evolution and fresh
    /// generation, and finish with a meta-review and research overview.
    pub async fn run_full_cycle(&self, options: CycleOptions) -> Result<CycleReport> {
        self.require_goal()?;
        let mut report = CycleReport::default();

        report.generated += self.generate(options.initial_count, &[]).await?.len();

        for iteration in 1..=options.iterations {
            info!(iteration, "Research cycle iteration");
            report.reviewed += self.review(&[], &[]).await?;

            if self.store.len() >= 2 {
                let before = self.store.tournament_state().matches.len();
                self.run_tournament(Some(options.matches_per_iteration)).await?;
                report.matches_played += self.store.tournament_state().matches.len() - before;
            }

            report.evolved += self.evolve(&[], &[]).await?.len();
            report.generated += self.generate(options.new_per_iteration, &[]).await?.len();
            report.iterations = iteration;
        }

        report.meta_review = self
            .meta_review(MetaReviewKind::MetaReview)
            .await
            .map_err(|e| warn!(error = %e, "Meta review failed"))
            .ok();
        report.research_overview = self
            .meta_review(MetaReviewKind::ResearchOverview)
            .await
            .map_err(|e| warn!(error = %e, "Research overview failed"))
            .ok();
        report.top = self.engine.ranking_snapshot().into_iter().take(5).collect();
        Ok(report)
    }

    // ============= Queries =============

    pub fn get_top_k(&self, k: usize) -> Vec<Artifact> {
        self.store.top_k(k)
    }

    pub fn get_artifact(&self, id: &str) -> Option<Artifact> {
        self.store.get_artifact(id)
    }

    /// Explicitly delete an artifact. Its id is never reused.
    pub fn remove_artifact(&self, id: &str) -> Result<Artifact> {
        let removed = self.store.remove_artifact(id)?;
        self.events.emit(
            EventType::HypothesisDeleted,
            SOURCE,
            json!({"hypothesis_id": id}),
        );
        Ok(removed)
    }

    pub fn cancel_task(&self, task_id: &str) -> Result<()> {
        self.scheduler.cancel(task_id)
    }

    pub fn get_statistics(&self) -> ResearchStatistics {
        let top = self.store.top_k(1);
        ResearchStatistics {
            session: self.persistence.session_state(),
            artifact_count: self.store.len(),
            tournament_matches: self.store.tournament_state().matches.len(),
            top_rating: top.first().map(|a| a.elo_rating),
            scheduler: self.scheduler.statistics(),
            events: self.events.statistics(),
            agents: self.store.list_agent_states(),
        }
    }

    // ============= Persistence =============

    pub async fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        self.persistence.save(path).await
    }

    pub async fn load(&self, path: &Path) -> Result<String> {
        self.persistence.load(path).await
    }
}
