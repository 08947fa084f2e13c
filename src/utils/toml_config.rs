//! TOML-based configuration for Jnana
//!
//! This module provides declarative configuration for the scheduler, the
//! tournament, session persistence, the event bus, the worker-agent pool and
//! logging via a TOML file (`jnana.toml`). Every field has a default, so an
//! empty file (or no file at all) is a valid configuration.
//!
//! # Environment Overrides
//!
//! A handful of options can be overridden with `JNANA_*` environment variables,
//! read after `.env` has been loaded with `dotenvy`.
//!
//! # Hot Reloading
//!
//! Use `JnanaConfigManager` for thread-safe access to the current configuration.
//! A reload that fails to parse or validate keeps the previous configuration.

use crate::types::AgentKind;
use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "jnana.toml";

/// Root configuration structure loaded from jnana.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JnanaConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub tournament: TournamentConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub events: EventsConfig,

    /// Number of worker agents registered per kind
    #[serde(default)]
    pub agents: AgentPoolConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// ============= Scheduler Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrently running tasks
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Dispatch-loop poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Timeout applied to each external capability call
    #[serde(default = "default_capability_timeout_secs")]
    pub capability_timeout_secs: u64,

    /// How long a store writer waits on a contested artifact
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_max_workers() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    25
}

fn default_capability_timeout_secs() -> u64 {
    120
}

fn default_lock_timeout_ms() -> u64 {
    500
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            capability_timeout_secs: default_capability_timeout_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

// ============= Tournament Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentConfig {
    #[serde(default = "default_k_factor")]
    pub elo_k_factor: f64,

    #[serde(default = "default_initial_rating")]
    pub initial_rating: f64,

    #[serde(default = "default_match_count")]
    pub default_match_count: usize,

    /// Used when the research plan names no evaluation criteria
    #[serde(default = "default_criteria")]
    pub criteria: Vec<String>,

    /// Seed for deterministic pairing
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_k_factor() -> f64 {
    32.0
}

fn default_initial_rating() -> f64 {
    crate::types::DEFAULT_ELO_RATING
}

fn default_match_count() -> usize {
    10
}

fn default_criteria() -> Vec<String> {
    vec![
        "novelty".to_string(),
        "plausibility".to_string(),
        "testability".to_string(),
    ]
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            elo_k_factor: default_k_factor(),
            initial_rating: default_initial_rating(),
            default_match_count: default_match_count(),
            criteria: default_criteria(),
            seed: None,
        }
    }
}

// ============= Session Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_true")]
    pub auto_save_enabled: bool,

    #[serde(default = "default_auto_save_interval")]
    pub auto_save_interval_seconds: f64,

    /// Directory for session files without an explicit path
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_auto_save_interval() -> f64 {
    300.0
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("sessions")
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_save_enabled: true,
            auto_save_interval_seconds: default_auto_save_interval(),
            sessions_dir: default_sessions_dir(),
        }
    }
}

impl SessionConfig {
    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_secs_f64(self.auto_save_interval_seconds.max(0.0))
    }
}

// ============= Event Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_event_history_size")]
    pub event_history_size: usize,
}

fn default_event_history_size() -> usize {
    crate::events::DEFAULT_HISTORY_SIZE
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            event_history_size: default_event_history_size(),
        }
    }
}

// ============= Agent Pool Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPoolConfig {
    #[serde(default = "default_generation_agents")]
    pub generation: usize,
    #[serde(default = "default_reflection_agents")]
    pub reflection: usize,
    #[serde(default = "default_one")]
    pub ranking: usize,
    #[serde(default = "default_one")]
    pub evolution: usize,
    #[serde(default = "default_one")]
    pub proximity: usize,
    #[serde(default = "default_one")]
    pub meta_review: usize,
}

fn default_generation_agents() -> usize {
    5
}

fn default_reflection_agents() -> usize {
    2
}

fn default_one() -> usize {
    1
}

impl Default for AgentPoolConfig {
    fn default() -> Self {
        Self {
            generation: default_generation_agents(),
            reflection: default_reflection_agents(),
            ranking: 1,
            evolution: 1,
            proximity: 1,
            meta_review: 1,
        }
    }
}

impl AgentPoolConfig {
    pub fn count(&self, kind: AgentKind) -> usize {
        match kind {
            AgentKind::Generation => self.generation,
            AgentKind::Reflection => self.reflection,
            AgentKind::Ranking => self.ranking,
            AgentKind::Evolution => self.evolution,
            AgentKind::Proximity => self.proximity,
            AgentKind::MetaReview => self.meta_review,
        }
    }
}

// ============= Logging Configuration =============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' has an invalid value: {1}")]
    InvalidEnvVar(String, String),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),
}

impl From<ConfigError> for crate::types::AppError {
    fn from(err: ConfigError) -> Self {
        crate::types::AppError::Configuration(err.to_string())
    }
}

impl JnanaConfig {
    /// Load configuration from a TOML file, apply `JNANA_*` overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut config: JnanaConfig = toml::from_str(&content)?;
        config.apply_env_overrides()?;

        config.validate()?;

        Ok(config)
    }

    /// Like [`JnanaConfig::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        let mut config = JnanaConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: JnanaConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Applies overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any key lookup (the environment in production)
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T, ConfigError> {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnvVar(key.to_string(), raw))
        }

        if let Some(v) = lookup("JNANA_MAX_WORKERS") {
            self.scheduler.max_workers = parse("JNANA_MAX_WORKERS", v)?;
        }
        if let Some(v) = lookup("JNANA_ELO_K_FACTOR") {
            self.tournament.elo_k_factor = parse("JNANA_ELO_K_FACTOR", v)?;
        }
        if let Some(v) = lookup("JNANA_DEFAULT_MATCH_COUNT") {
            self.tournament.default_match_count = parse("JNANA_DEFAULT_MATCH_COUNT", v)?;
        }
        if let Some(v) = lookup("JNANA_AUTO_SAVE_INTERVAL_SECONDS") {
            self.session.auto_save_interval_seconds =
                parse("JNANA_AUTO_SAVE_INTERVAL_SECONDS", v)?;
        }
        if let Some(v) = lookup("JNANA_EVENT_HISTORY_SIZE") {
            self.events.event_history_size = parse("JNANA_EVENT_HISTORY_SIZE", v)?;
        }
        if let Some(v) = lookup("JNANA_LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_workers == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.max_workers must be at least 1".into(),
            ));
        }
        if self.scheduler.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.poll_interval_ms must be positive".into(),
            ));
        }
        if !(self.tournament.elo_k_factor.is_finite() && self.tournament.elo_k_factor > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "tournament.elo_k_factor must be positive, got {}",
                self.tournament.elo_k_factor
            )));
        }
        if !self.tournament.initial_rating.is_finite() {
            return Err(ConfigError::ValidationError(
                "tournament.initial_rating must be finite".into(),
            ));
        }
        if self.tournament.criteria.is_empty() {
            return Err(ConfigError::ValidationError(
                "tournament.criteria must name at least one criterion".into(),
            ));
        }
        if !(self.session.auto_save_interval_seconds.is_finite()
            && self.session.auto_save_interval_seconds > 0.0)
        {
            return Err(ConfigError::ValidationError(format!(
                "session.auto_save_interval_seconds must be positive, got {}",
                self.session.auto_save_interval_seconds
            )));
        }
        if self.events.event_history_size == 0 {
            return Err(ConfigError::ValidationError(
                "events.event_history_size must be at least 1".into(),
            ));
        }
        if self.agents.generation == 0 {
            return Err(ConfigError::ValidationError(
                "agents.generation must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ============= Hot Reloading Configuration Manager =============

/// Delay between a file event and re-reading the file, so a write in
/// progress is not parsed half way.
const RELOAD_SETTLE: Duration = Duration::from_millis(100);

/// Events closer together than this collapse into one reload.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

/// Shared, hot-reloadable configuration.
///
/// Clones share the same current configuration, so a `ResearchCoordinator`
/// built from a clone sees every reload. Only the handle that called
/// [`start_watching`](Self::start_watching) owns the file watcher.
pub struct JnanaConfigManager {
    current: Arc<ArcSwap<JnanaConfig>>,
    path: PathBuf,
    watcher: RwLock<Option<RecommendedWatcher>>,
}

impl JnanaConfigManager {
    /// Load `path` (defaults when it does not exist) and manage it.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        // Watching needs an absolute path
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(ConfigError::ReadError)?
                .join(path)
        };

        let config = JnanaConfig::load_or_default(&path)?;
        Ok(Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            path,
            watcher: RwLock::new(None),
        })
    }

    /// Manage an in-memory configuration. Reloads read `jnana.toml` in the
    /// working directory.
    pub fn from_config(config: JnanaConfig) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            path: PathBuf::from(DEFAULT_CONFIG_FILE),
            watcher: RwLock::new(None),
        }
    }

    /// The current configuration. Lock-free.
    pub fn config(&self) -> Arc<JnanaConfig> {
        self.current.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file now. On error the current configuration is kept.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let config = JnanaConfig::load(&self.path)?;
        self.current.store(Arc::new(config));
        info!(path = %self.path.display(), "Configuration reloaded");
        Ok(())
    }

    /// Reload automatically whenever the file is written.
    pub fn start_watching(&self) -> Result<(), ConfigError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let file_name = self.path.file_name().map(|n| n.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if ours && (event.kind.is_modify() || event.kind.is_create()) {
                        let _ = tx.send(());
                    }
                }
                Err(e) => error!(error = %e, "Config watcher error"),
            }
        })?;
        // Editors often replace the file, so watch its directory
        if let Some(parent) = self.path.parent() {
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }
        *self.watcher.write() = Some(watcher);

        let path = self.path.clone();
        let current = Arc::clone(&self.current);
        tokio::spawn(async move {
            let mut last_reload: Option<std::time::Instant> = None;
            while rx.recv().await.is_some() {
                if last_reload.is_some_and(|t| t.elapsed() < RELOAD_DEBOUNCE) {
                    continue;
                }
                tokio::time::sleep(RELOAD_SETTLE).await;
                match JnanaConfig::load(&path) {
                    Ok(config) => {
                        current.store(Arc::new(config));
                        last_reload = Some(std::time::Instant::now());
                        info!(path = %path.display(), "Configuration hot-reloaded");
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Rejected config change, keeping the previous one");
                    }
                }
            }
        });

        info!(path = %self.path.display(), "Watching configuration for changes");
        Ok(())
    }

    /// Stop reloading on file changes. Dropping the watcher also ends the
    /// reload task.
    pub fn stop_watching(&self) {
        if self.watcher.write().take().is_some() {
            info!(path = %self.path.display(), "Stopped watching configuration");
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.read().is_some()
    }
}

impl Clone for JnanaConfigManager {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
            path: self.path.clone(),
            watcher: RwLock::new(None),
        }
    }
}
