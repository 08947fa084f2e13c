use crate::types::{
    AgentState, AppError, Artifact, MatchRecord, ResearchGoal, Result, TournamentState,
};
use crate::utils::atomic_file::write_atomic;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a writer waits for a contested artifact before retrying.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

type ArtifactCell = Arc<Mutex<Artifact>>;

/// Point-in-time copy of the store, written by write-through persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub revision: u64,
    pub saved_at: DateTime<Utc>,
    pub research_goal: Option<ResearchGoal>,
    pub artifacts: Vec<Artifact>,
    pub tournament: TournamentState,
}

/// Concurrency-safe state shared by every component of a session.
///
/// Artifacts sit in their own `Mutex` cells behind a map-level `RwLock`, so
/// writers to different ids never contend while writers to the same id
/// serialize. No lock is ever held across an `.await`.
pub struct ArtifactStore {
    artifacts: RwLock<HashMap<String, ArtifactCell>>,
    retired: RwLock<HashSet<String>>,
    agent_states: RwLock<HashMap<String, AgentState>>,
    datasets: RwLock<HashMap<String, Value>>,
    tournament: Mutex<TournamentState>,
    research_goal: RwLock<Option<ResearchGoal>>,
    revision: AtomicU64,
    lock_timeout: Duration,
    write_through: RwLock<Option<mpsc::UnboundedSender<()>>>,
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            artifacts: RwLock::new(HashMap::new()),
            retired: RwLock::new(HashSet::new()),
            agent_states: RwLock::new(HashMap::new()),
            datasets: RwLock::new(HashMap::new()),
            tournament: Mutex::new(TournamentState::default()),
            research_goal: RwLock::new(None),
            revision: AtomicU64::new(0),
            lock_timeout,
            write_through: RwLock::new(None),
        }
    }

    /// Monotonic mutation counter.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn mark_dirty(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.write_through.read().as_ref() {
            let _ = tx.send(());
        }
    }

    fn cell(&self, id: &str) -> Result<ArtifactCell> {
        self.artifacts
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::Validation(format!("Unknown artifact id: {}", id)))
    }

    /// Locks one artifact cell, retrying once before reporting a conflict.
    fn lock_cell<'a>(&self, id: &str, cell: &'a Mutex<Artifact>) -> Result<MutexGuard<'a, Artifact>> {
        if let Some(guard) = cell.try_lock_for(self.lock_timeout) {
            return Ok(guard);
        }
        debug!(artifact_id = %id, "Artifact write contested, retrying once");
        cell.try_lock_for(self.lock_timeout).ok_or_else(|| {
            AppError::ConcurrencyConflict(format!("Artifact {} is locked by another writer", id))
        })
    }

    // ============= Artifacts =============

    /// Inserts a new artifact and returns its id.
    pub fn create_artifact(&self, artifact: Artifact) -> Result<String> {
        if artifact.id.trim().is_empty() {
            return Err(AppError::Validation("Artifact id must not be empty".into()));
        }
        if self.retired.read().contains(&artifact.id) {
            return Err(AppError::Validation(format!(
                "Artifact id {} was removed and cannot be reused",
                artifact.id
            )));
        }

        let id = artifact.id.clone();
        {
            let mut artifacts = self.artifacts.write();
            if artifacts.contains_key(&id) {
                return Err(AppError::Validation(format!(
                    "Artifact id {} already exists",
                    id
                )));
            }
            artifacts.insert(id.clone(), Arc::new(Mutex::new(artifact)));
        }
        self.mark_dirty();
        debug!(artifact_id = %id, "Artifact created");
        Ok(id)
    }

    pub fn get_artifact(&self, id: &str) -> Option<Artifact> {
        let cell = self.artifacts.read().get(id).cloned()?;
        let artifact = cell.lock().clone();
        Some(artifact)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.artifacts.read().contains_key(id)
    }

    /// Applies `f` to the artifact under its lock and returns the new value.
    ///
    /// Identity fields (id, content, creator, creation time), the Elo rating
    /// and the match history are restored after `f` runs; those change only
    /// through tournament results.
    pub fn update_artifact<F>(&self, id: &str, f: F) -> Result<Artifact>
    where
        F: FnOnce(&mut Artifact),
    {
        let cell = self.cell(id)?;
        let updated = {
            let mut guard = self.lock_cell(id, &cell)?;
            let original = guard.clone();
            f(&mut guard);
            guard.id = original.id;
            guard.content = original.content;
            guard.agent_id = original.agent_id;
            guard.created_at = original.created_at;
            guard.elo_rating = original.elo_rating;
            guard.tournament_matches = original.tournament_matches;
            guard.clone()
        };
        self.mark_dirty();
        Ok(updated)
    }

    /// Deletes an artifact. Its id is retired and never accepted again.
    pub fn remove_artifact(&self, id: &str) -> Result<Artifact> {
        let cell = self
            .artifacts
            .write()
            .remove(id)
            .ok_or_else(|| AppError::Validation(format!("Unknown artifact id: {}", id)))?;
        self.retired.write().insert(id.to_string());
        self.mark_dirty();

        let artifact = cell.lock().clone();
        info!(artifact_id = %id, "Artifact removed");
        Ok(artifact)
    }

    pub fn is_retired(&self, id: &str) -> bool {
        self.retired.read().contains(id)
    }

    pub fn retired_ids(&self) -> HashSet<String> {
        self.retired.read().clone()
    }

    /// All artifacts in creation order.
    pub fn list_artifacts(&self) -> Vec<Artifact> {
        let cells: Vec<ArtifactCell> = self.artifacts.read().values().cloned().collect();
        let mut artifacts: Vec<Artifact> = cells.iter().map(|c| c.lock().clone()).collect();
        artifacts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        artifacts
    }

    pub fn artifact_ids(&self) -> Vec<String> {
        self.list_artifacts().into_iter().map(|a| a.id).collect()
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every artifact ordered by descending rating, earlier creation first on ties.
    pub fn ranked(&self) -> Vec<Artifact> {
        let mut artifacts = self.list_artifacts();
        artifacts.sort_by(rank_order);
        artifacts
    }

    pub fn top_k(&self, k: usize) -> Vec<Artifact> {
        let mut ranked = self.ranked();
        ranked.truncate(k);
        ranked
    }

    /// Records a finished match on both artifacts and applies the rating update.
    ///
    /// Both cells are locked in id order, and `rate` receives the ratings as
    /// they are at that moment, so concurrent matches sharing an artifact
    /// serialize instead of overwriting each other.
    pub(crate) fn apply_match<F>(&self, record: MatchRecord, rate: F) -> Result<(f64, f64)>
    where
        F: FnOnce(f64, f64) -> (f64, f64),
    {
        let a_id = record.artifact_a.clone();
        let b_id = record.artifact_b.clone();
        if a_id == b_id {
            return Err(AppError::Validation(format!(
                "Artifact {} cannot be matched against itself",
                a_id
            )));
        }

        let cell_a = self.cell(&a_id)?;
        let cell_b = self.cell(&b_id)?;

        let ratings = {
            let (mut guard_a, mut guard_b) = if a_id < b_id {
                let ga = self.lock_cell(&a_id, &cell_a)?;
                let gb = self.lock_cell(&b_id, &cell_b)?;
                (ga, gb)
            } else {
                let gb = self.lock_cell(&b_id, &cell_b)?;
                let ga = self.lock_cell(&a_id, &cell_a)?;
                (ga, gb)
            };

            let (new_a, new_b) = rate(guard_a.elo_rating, guard_b.elo_rating);
            guard_a.elo_rating = new_a;
            guard_b.elo_rating = new_b;
            guard_a.tournament_matches.push(record.clone());
            guard_b.tournament_matches.push(record.clone());
            (new_a, new_b)
        };

        self.tournament.lock().matches.push(record);
        self.mark_dirty();
        Ok(ratings)
    }

    /// Swaps in a whole artifact set, as when a session is loaded.
    ///
    /// Retired ids stay retired.
    pub(crate) fn replace_artifacts(&self, artifacts: Vec<Artifact>, tournament: TournamentState) {
        let map = artifacts
            .into_iter()
            .map(|a| (a.id.clone(), Arc::new(Mutex::new(a))))
            .collect();
        *self.artifacts.write() = map;
        *self.tournament.lock() = tournament;
        self.mark_dirty();
    }

    // ============= Agent State =============

    pub fn set_agent_state(&self, state: AgentState) {
        self.agent_states
            .write()
            .insert(state.agent_id.clone(), state);
    }

    pub fn get_agent_state(&self, agent_id: &str) -> Option<AgentState> {
        self.agent_states.read().get(agent_id).cloned()
    }

    pub fn update_agent_state<F>(&self, agent_id: &str, f: F) -> Option<AgentState>
    where
        F: FnOnce(&mut AgentState),
    {
        let mut states = self.agent_states.write();
        let state = states.get_mut(agent_id)?;
        f(state);
        Some(state.clone())
    }

    pub fn list_agent_states(&self) -> Vec<AgentState> {
        let mut states: Vec<AgentState> = self.agent_states.read().values().cloned().collect();
        states.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        states
    }

    // ============= Datasets =============

    pub fn set_dataset(&self, task_id: &str, data: Value) {
        self.datasets.write().insert(task_id.to_string(), data);
    }

    pub fn get_dataset(&self, task_id: &str) -> Option<Value> {
        self.datasets.read().get(task_id).cloned()
    }

    // ============= Tournament State =============

    pub fn tournament_state(&self) -> TournamentState {
        self.tournament.lock().clone()
    }

    pub fn update_tournament_state<F>(&self, f: F)
    where
        F: FnOnce(&mut TournamentState),
    {
        f(&mut self.tournament.lock());
        self.mark_dirty();
    }

    // ============= Research Goal =============

    pub fn set_research_goal(&self, goal: ResearchGoal) {
        *self.research_goal.write() = Some(goal);
        self.mark_dirty();
    }

    pub fn research_goal(&self) -> Option<ResearchGoal> {
        self.research_goal.read().clone()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            revision: self.revision(),
            saved_at: Utc::now(),
            research_goal: self.research_goal(),
            artifacts: self.list_artifacts(),
            tournament: self.tournament_state(),
        }
    }

    // ============= Write-through =============

    /// Mirrors every mutation to `path` from a background task.
    ///
    /// Bursts of mutations coalesce into one write. A failed write is logged
    /// and leaves the in-memory state untouched.
    pub fn enable_write_through(self: &Arc<Self>, path: impl Into<PathBuf>) -> JoinHandle<()> {
        let path = path.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        *self.write_through.write() = Some(tx);

        let store: Weak<ArtifactStore> = Arc::downgrade(self);
        info!(path = %path.display(), "Store write-through enabled");

        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                while rx.try_recv().is_ok() {}

                let Some(store) = store.upgrade() else {
                    break;
                };
                let snapshot = store.snapshot();
                drop(store);

                let bytes = match serde_json::to_vec_pretty(&snapshot) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize store snapshot");
                        continue;
                    }
                };
                if let Err(e) = write_atomic(&path, &bytes).await {
                    warn!(error = %e, path = %path.display(), "Write-through failed, memory remains authoritative");
                }
            }
            debug!("Store write-through stopped");
        })
    }

    pub fn disable_write_through(&self) {
        *self.write_through.write() = None;
    }
}

/// Ranking order: rating descending, then creation time, then id.
pub fn rank_order(a: &Artifact, b: &Artifact) -> CmpOrdering {
    b.elo_rating
        .partial_cmp(&a.elo_rating)
        .unwrap_or(CmpOrdering::Equal)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}
