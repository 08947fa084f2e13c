//! Agent Registry for the worker-agent pool
//!
//! Agents are registered by id. [`AgentRegistryBuilder`] creates the default
//! pool from the `[agents]` section of `jnana.toml`, naming each agent
//! `<kind>-<n>` (e.g. `generation-0`, `meta_review-0`).

use super::{
    EvolutionAgent, GenerationAgent, MetaReviewAgent, ProximityAgent, RankingAgent,
    ReflectionAgent, WorkerAgent,
};
use crate::llm::Capability;
use crate::tournament::TournamentEngine;
use crate::types::{AgentKind, AppError, Result};
use crate::utils::toml_config::AgentPoolConfig;
use std::collections::HashMap;
use std::sync::Arc;

/// Registered worker agents keyed by id
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn WorkerAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Ids must be unique.
    pub fn register(&mut self, agent: Arc<dyn WorkerAgent>) -> Result<()> {
        let id = agent.id().to_string();
        if self.agents.contains_key(&id) {
            return Err(AppError::Validation(format!(
                "Agent {} is already registered",
                id
            )));
        }
        self.agents.insert(id, agent);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn WorkerAgent>> {
        self.agents.get(id).cloned()
    }

    /// All agents, sorted by id
    pub fn agents(&self) -> Vec<Arc<dyn WorkerAgent>> {
        let mut agents: Vec<_> = self.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id().cmp(b.id()));
        agents
    }

    pub fn count(&self, kind: AgentKind) -> usize {
        self.agents.values().filter(|a| a.kind() == kind).count()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Get the standard id for the n-th agent of a kind
    pub fn agent_id(kind: AgentKind, n: usize) -> String {
        format!("{}-{}", kind.as_str(), n)
    }
}

/// Builder for the default agent pool
pub struct AgentRegistryBuilder {
    pool: AgentPoolConfig,
    capability: Option<Capability>,
    engine: Option<Arc<TournamentEngine>>,
    extra: Vec<Arc<dyn WorkerAgent>>,
}

impl AgentRegistryBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            pool: AgentPoolConfig::default(),
            capability: None,
            engine: None,
            extra: Vec::new(),
        }
    }

    /// Set the per-kind agent counts
    pub fn with_pool(mut self, pool: AgentPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set the capability shared by capability-backed agents
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    /// Set the tournament engine used by ranking agents
    pub fn with_engine(mut self, engine: Arc<TournamentEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Add a custom agent alongside the default pool
    pub fn with_agent(mut self, agent: Arc<dyn WorkerAgent>) -> Self {
        self.extra.push(agent);
        self
    }

    /// Build the registry
    pub fn build(self) -> Result<AgentRegistry> {
        let capability = self.capability.ok_or_else(|| {
            AppError::Configuration("AgentRegistryBuilder needs a capability".into())
        })?;
        let engine = self.engine.ok_or_else(|| {
            AppError::Configuration("AgentRegistryBuilder needs a tournament engine".into())
        })?;

        let mut registry = AgentRegistry::new();
        for kind in AgentKind::ALL {
            for n in 0..self.pool.count(kind) {
                let id = AgentRegistry::agent_id(kind, n);
                let agent: Arc<dyn WorkerAgent> = match kind {
                    AgentKind::Generation => Arc::new(GenerationAgent::new(id, capability.clone())),
                    AgentKind::Reflection => Arc::new(ReflectionAgent::new(id, capability.clone())),
                    AgentKind::Ranking => Arc::new(RankingAgent::new(id, Arc::clone(&engine))),
                    AgentKind::Evolution => Arc::new(EvolutionAgent::new(id, capability.clone())),
                    AgentKind::Proximity => Arc::new(ProximityAgent::new(id)),
                    AgentKind::MetaReview => Arc::new(MetaReviewAgent::new(id, capability.clone())),
                };
                registry.register(agent)?;
            }
        }
        for agent in self.extra {
            registry.register(agent)?;
        }
        Ok(registry)
    }
}

impl Default for AgentRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::llm::OfflineClient;
    use crate::memory::ArtifactStore;
    use crate::utils::toml_config::TournamentConfig;
    use std::time::Duration;

    fn capability() -> Capability {
        Capability::new(Arc::new(OfflineClient::new()), Duration::from_secs(5))
    }

    fn engine() -> Arc<TournamentEngine> {
        Arc::new(TournamentEngine::new(
            Arc::new(ArtifactStore::new()),
            Arc::new(EventBus::default()),
            capability(),
            TournamentConfig::default(),
        ))
    }

    #[test]
    fn test_agent_id() {
        assert_eq!(AgentRegistry::agent_id(AgentKind::Generation, 0), "generation-0");
        assert_eq!(AgentRegistry::agent_id(AgentKind::MetaReview, 2), "meta_review-2");
    }

    #[test]
    fn test_builder_creates_default_pool() {
        let registry = AgentRegistryBuilder::new()
            .with_capability(capability())
            .with_engine(engine())
            .build()
            .unwrap();

        assert_eq!(registry.count(AgentKind::Generation), 5);
        assert_eq!(registry.count(AgentKind::Reflection), 2);
        assert_eq!(registry.count(AgentKind::Ranking), 1);
        assert_eq!(registry.len(), 11);
        assert!(registry.get("proximity-0").is_some());
    }

    #[test]
    fn test_builder_requires_capability() {
        let result = AgentRegistryBuilder::new().with_engine(engine()).build();
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut registry = AgentRegistry::new();
        registry
            .register(Arc::new(ProximityAgent::new("proximity-0")))
            .unwrap();
        let err = registry
            .register(Arc::new(ProximityAgent::new("proximity-0")))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
