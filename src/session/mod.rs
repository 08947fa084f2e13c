//! Durable session snapshots
//!
//! [`SessionPersistence`] owns the active [`SessionState`] and writes the
//! store's artifact set to a JSON document, either on request or from an
//! auto-save loop that fires once the configured interval has elapsed and the
//! store has changed since the last save.
//!
//! Saves never lose work already on disk: artifacts in an existing native
//! document at the target path are carried over unless they are in memory or
//! were explicitly removed, and a target that cannot be read is kept as
//! `<name>.bak`. Writes go through [`write_atomic`].

pub mod format;

pub use format::{DecodedSession, SessionDocument, SessionFormat, FORMAT_VERSION};

use crate::events::{EventBus, EventType};
use crate::memory::ArtifactStore;
use crate::types::{AppError, Artifact, ResearchGoal, Result, SessionMode, SessionState};
use crate::utils::atomic_file::{recover_interrupted_write, write_atomic};
use crate::utils::toml_config::SessionConfig;
use chrono::Local;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SOURCE: &str = "session_manager";

#[derive(Debug, Clone, Copy)]
struct SaveMark {
    at: Instant,
    revision: u64,
}

/// Saves and restores sessions for one store.
pub struct SessionPersistence {
    store: Arc<ArtifactStore>,
    events: Arc<EventBus>,
    config: SessionConfig,
    state: RwLock<Option<SessionState>>,
    current_path: RwLock<Option<PathBuf>>,
    last_save: Mutex<SaveMark>,
    save_lock: tokio::sync::Mutex<()>,
    auto_save: Mutex<Option<JoinHandle<()>>>,
}

impl SessionPersistence {
    pub fn new(store: Arc<ArtifactStore>, events: Arc<EventBus>, config: SessionConfig) -> Self {
        let revision = store.revision();
        Self {
            store,
            events,
            config,
            state: RwLock::new(None),
            current_path: RwLock::new(None),
            last_save: Mutex::new(SaveMark {
                at: Instant::now(),
                revision,
            }),
            save_lock: tokio::sync::Mutex::new(()),
            auto_save: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a new session for `research_goal` and return its id.
    pub fn create_session(&self, research_goal: &str, mode: SessionMode) -> String {
        let state = SessionState::new(research_goal, mode);
        let session_id = state.session_id.clone();
        *self.state.write() = Some(state);
        *self.current_path.write() = None;
        self.mark_saved(self.store.revision());

        self.events.emit(
            EventType::SessionStarted,
            SOURCE,
            json!({"session_id": session_id, "research_goal": research_goal, "mode": mode}),
        );
        info!(session_id = %session_id, "Created new session");
        session_id
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.state.read().clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.read().as_ref().map(|s| s.session_id.clone())
    }

    /// Path of the last save or native load, reused by later saves.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.current_path.read().clone()
    }

    pub fn set_active_artifact(&self, artifact_id: Option<String>) {
        if let Some(state) = self.state.write().as_mut() {
            state.active_artifact_id = artifact_id;
            state.touch();
        }
    }

    /// Bump a session counter such as `agent_interactions`.
    pub fn record_interaction(&self) {
        if let Some(state) = self.state.write().as_mut() {
            state.stats.agent_interactions += 1;
            state.touch();
        }
    }

    /// True when the store changed since the last save or load.
    pub fn is_dirty(&self) -> bool {
        self.store.revision() != self.last_save.lock().revision
    }

    /// `<sessions_dir>/jnana_session_<YYYYmmdd_HHMMSS>.json`
    pub fn default_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        self.config
            .sessions_dir
            .join(format!("jnana_session_{}.json", stamp))
    }

    /// Save the active session to `path`, the current path, or a new default path.
    pub async fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let _guard = self.save_lock.lock().await;

        let path = match path {
            Some(p) => p.to_path_buf(),
            None => self.current_path().unwrap_or_else(|| self.default_path()),
        };

        let revision = self.store.revision();
        let mut artifacts = self.store.list_artifacts();
        let tournament = self.store.tournament_state();
        let state = {
            let mut guard = self.state.write();
            let state = guard
                .as_mut()
                .ok_or_else(|| AppError::Validation("No active session to save".into()))?;
            if let Some(goal) = self.store.research_goal() {
                state.research_goal = goal.goal;
            }
            state.stats.hypotheses_generated = artifacts.len() as u64;
            state.stats.tournament_matches = tournament.matches.len() as u64;
            state.touch();
            state.clone()
        };

        recover_interrupted_write(&path).await;
        let carried = self.carry_over(&path, &artifacts).await?;
        let carried_count = carried.len();
        artifacts.extend(carried);

        let bytes = format::encode(&state, &artifacts, &tournament)?;
        write_atomic(&path, &bytes).await?;

        *self.current_path.write() = Some(path.clone());
        self.mark_saved(revision);

        self.events.emit(
            EventType::SessionSaved,
            SOURCE,
            json!({
                "session_id": state.session_id,
                "output_path": path.display().to_string(),
                "hypotheses_count": artifacts.len(),
            }),
        );
        info!(
            path = %path.display(),
            hypotheses = artifacts.len(),
            carried_over = carried_count,
            "Saved session"
        );
        Ok(path)
    }

    /// Artifacts already committed at `path` that this save must keep.
    async fn carry_over(&self, path: &Path, in_memory: &[Artifact]) -> Result<Vec<Artifact>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(AppError::Persistence(format!(
                    "Failed to read existing session {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let existing = serde_json::from_slice::<Value>(&bytes)
            .map_err(AppError::from)
            .and_then(format::decode);
        match existing {
            Ok(decoded) if decoded.format == SessionFormat::Native => {
                let known: HashSet<&str> = in_memory.iter().map(|a| a.id.as_str()).collect();
                Ok(decoded
                    .artifacts
                    .into_iter()
                    .filter(|a| !known.contains(a.id.as_str()) && !self.store.is_retired(&a.id))
                    .collect())
            }
            other => {
                let backup = backup_path(path);
                if let Err(e) = &other {
                    warn!(path = %path.display(), error = %e, "Existing session is unreadable, keeping a backup");
                } else {
                    warn!(path = %path.display(), "Existing session is a legacy document, keeping a backup");
                }
                tokio::fs::rename(path, &backup).await.map_err(|e| {
                    AppError::Persistence(format!(
                        "Failed to back up {} to {}: {}",
                        path.display(),
                        backup.display(),
                        e
                    ))
                })?;
                Ok(Vec::new())
            }
        }
    }

    /// Load a session document, replacing the in-memory artifact set.
    ///
    /// On any error the current session and store are left untouched.
    pub async fn load(&self, path: &Path) -> Result<String> {
        let _guard = self.save_lock.lock().await;
        info!(path = %path.display(), "Loading session");

        recover_interrupted_write(path).await;
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            AppError::Persistence(format!("Failed to read session {}: {}", path.display(), e))
        })?;
        let doc: Value = serde_json::from_slice(&bytes)?;
        let decoded = format::decode(doc)?;

        let session_id = decoded.session_state.session_id.clone();
        let count = decoded.artifacts.len();
        let goal = decoded.session_state.research_goal.clone();

        self.store
            .replace_artifacts(decoded.artifacts, decoded.tournament);
        if !goal.is_empty() {
            self.store.set_research_goal(ResearchGoal::new(goal));
        }
        *self.state.write() = Some(decoded.session_state);
        // Legacy files are never written back in place
        *self.current_path.write() = match decoded.format {
            SessionFormat::Native => Some(path.to_path_buf()),
            _ => None,
        };
        self.mark_saved(self.store.revision());

        self.events.emit(
            EventType::SessionLoaded,
            SOURCE,
            json!({
                "session_id": session_id,
                "session_path": path.display().to_string(),
                "hypotheses_count": count,
                "format": decoded.format,
            }),
        );
        info!(session_id = %session_id, format = %decoded.format, hypotheses = count, "Loaded session");
        Ok(session_id)
    }

    /// Saves if auto-save is enabled, the interval has elapsed and the store
    /// changed. Failures are logged and retried after the next interval.
    pub async fn maybe_auto_save(&self) -> Option<PathBuf> {
        if !self.config.auto_save_enabled || self.state.read().is_none() {
            return None;
        }
        let due = {
            let mark = self.last_save.lock();
            mark.at.elapsed() >= self.config.auto_save_interval()
                && self.store.revision() != mark.revision
        };
        if !due {
            return None;
        }
        match self.save(None).await {
            Ok(path) => {
                debug!(path = %path.display(), "Auto-saved session");
                Some(path)
            }
            Err(e) => {
                // Retry after a full interval; the revision stays unsaved
                self.last_save.lock().at = Instant::now();
                warn!(error = %e, "Auto-save failed, will retry");
                None
            }
        }
    }

    /// Runs [`maybe_auto_save`](Self::maybe_auto_save) in the background.
    pub fn start_auto_save(self: &Arc<Self>) {
        let mut slot = self.auto_save.lock();
        if slot.is_some() || !self.config.auto_save_enabled {
            return;
        }
        let tick = (self.config.auto_save_interval() / 4)
            .clamp(Duration::from_millis(10), Duration::from_secs(5));
        let weak: Weak<SessionPersistence> = Arc::downgrade(self);

        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(persistence) = weak.upgrade() else { break };
                persistence.maybe_auto_save().await;
            }
        }));
        info!(
            interval_secs = self.config.auto_save_interval_seconds,
            "Session auto-save started"
        );
    }

    pub fn stop_auto_save(&self) {
        if let Some(handle) = self.auto_save.lock().take() {
            handle.abort();
            debug!("Session auto-save stopped");
        }
    }

    fn mark_saved(&self, revision: u64) {
        *self.last_save.lock() = SaveMark {
            at: Instant::now(),
            revision,
        };
    }
}

impl Drop for SessionPersistence {
    fn drop(&mut self) {
        if let Some(handle) = self.auto_save.get_mut().take() {
            handle.abort();
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path(Path::new("/tmp/s/session.json")),
            PathBuf::from("/tmp/s/session.json.bak")
        );
    }

    #[test]
    fn test_default_path_shape() {
        let persistence = SessionPersistence::new(
            Arc::new(ArtifactStore::new()),
            Arc::new(EventBus::default()),
            SessionConfig::default(),
        );
        let path = persistence.default_path();
        let name = path.file_name().unwrap().to_string_lossy().to_string();

        assert!(path.starts_with("sessions"));
        assert!(name.starts_with("jnana_session_"));
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), "jnana_session_20240101_120000.json".len());
    }

    #[tokio::test]
    async fn test_failed_auto_save_waits_a_full_interval() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let store = Arc::new(ArtifactStore::new());
        let persistence = SessionPersistence::new(
            Arc::clone(&store),
            Arc::new(EventBus::default()),
            SessionConfig {
                auto_save_enabled: true,
                auto_save_interval_seconds: 0.05,
                sessions_dir: blocker.join("sessions"),
            },
        );
        persistence.create_session("goal", SessionMode::Batch);
        store
            .create_artifact(Artifact::new("h", "h", "generation-0"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(persistence.maybe_auto_save().await.is_none());

        let interval = persistence.config().auto_save_interval();
        assert!(persistence.last_save.lock().at.elapsed() < interval);
        assert!(persistence.is_dirty());
        assert!(persistence.current_path().is_none());
    }

    #[tokio::test]
    async fn test_save_without_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = SessionPersistence::new(
            Arc::new(ArtifactStore::new()),
            Arc::new(EventBus::default()),
            SessionConfig::default(),
        );
        let err = persistence
            .save(Some(&dir.path().join("s.json")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
