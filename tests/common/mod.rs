//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod mocks;

use jnana::events::EventBus;
use jnana::llm::{Capability, LLMClient};
use jnana::memory::ArtifactStore;
use jnana::tournament::TournamentEngine;
use jnana::types::Artifact;
use jnana::utils::toml_config::TournamentConfig;
use jnana::JnanaConfig;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Configuration with sessions under `dir`, auto-save off and seeded pairing.
pub fn test_config(dir: &Path) -> JnanaConfig {
    let mut config = JnanaConfig::default();
    config.session.sessions_dir = dir.to_path_buf();
    config.session.auto_save_enabled = false;
    config.scheduler.poll_interval_ms = 5;
    config.scheduler.capability_timeout_secs = 10;
    config.tournament.seed = Some(7);
    config
}

/// A store holding one artifact per content, in creation order.
pub fn store_with(contents: &[&str]) -> (Arc<ArtifactStore>, Vec<String>) {
    let store = Arc::new(ArtifactStore::new());
    let ids = contents
        .iter()
        .map(|content| {
            store
                .create_artifact(Artifact::new(*content, *content, "generation-0"))
                .unwrap()
        })
        .collect();
    (store, ids)
}

pub fn engine_with(store: &Arc<ArtifactStore>, judge: Arc<dyn LLMClient>) -> (TournamentEngine, Arc<EventBus>) {
    let events = Arc::new(EventBus::new(100));
    let engine = TournamentEngine::new(
        Arc::clone(store),
        Arc::clone(&events),
        Capability::new(judge, Duration::from_secs(5)),
        TournamentConfig {
            seed: Some(42),
            ..TournamentConfig::default()
        },
    );
    (engine, events)
}

pub fn total_rating(store: &ArtifactStore) -> f64 {
    store.list_artifacts().iter().map(|a| a.elo_rating).sum()
}
