//! # Jnana - research hypothesis orchestration
//!
//! Jnana coordinates a pool of worker agents that generate, review, rank and
//! evolve research hypotheses. Everything the agents produce lives in one
//! shared artifact store; hypotheses are ranked by an Elo tournament and the
//! whole session can be saved to and restored from disk.
//!
//! Text generation and pairwise judging are an injected capability
//! ([`LLMClient`]). The crate ships a deterministic [`OfflineClient`] for demos
//! and tests; real model backends implement the same trait.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use jnana::{JnanaConfig, OfflineClient, ResearchCoordinator};
//! use jnana::research::CycleOptions;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = JnanaConfig::load_or_default("jnana.toml")?;
//!     let coordinator = ResearchCoordinator::new(config, Arc::new(OfflineClient::new()))?;
//!     coordinator.start();
//!
//!     coordinator.set_research_goal("Why do cells age?")?;
//!     let report = coordinator.run_full_cycle(CycleOptions::default()).await?;
//!     for entry in report.top {
//!         println!("{} {:.1} {}", entry.rank, entry.elo_rating, entry.summary);
//!     }
//!
//!     coordinator.save(None).await?;
//!     coordinator.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`memory`] - Shared artifact store
//! - [`events`] - Publish/subscribe event bus with bounded history
//! - [`scheduler`] - Priority task queue and bounded worker pool
//! - [`agents`] - Worker agents (generation, reflection, ranking, evolution,
//!   proximity, meta-review)
//! - [`tournament`] - Elo tournament ranking engine
//! - [`session`] - Session save/load, legacy formats and auto-save
//! - [`research`] - The coordinator that ties it all together
//! - [`llm`] - Generation/judgment capability
//! - [`types`] - Common types and error handling
//!
//! ## Configuration
//!
//! All runtime options live in `jnana.toml` (see [`JnanaConfig`]); `JNANA_*`
//! environment variables override a subset of them. A coordinator built with
//! [`ResearchCoordinator::with_config_manager`] follows reloads of the file
//! made through [`JnanaConfigManager`].

#![warn(rustdoc::missing_crate_level_docs)]

/// Worker agents and the agent registry.
pub mod agents;
/// Command-line interface.
pub mod cli;
/// Event bus and event types.
pub mod events;
/// Generation/judgment capability.
pub mod llm;
/// Shared artifact store.
pub mod memory;
/// Research coordinator.
pub mod research;
/// Task queue and worker pool.
pub mod scheduler;
/// Session persistence.
pub mod session;
/// Elo tournament ranking.
pub mod tournament;
/// Core types (artifacts, tasks, sessions, errors).
pub mod types;
/// Configuration, logging and file utilities.
pub mod utils;

// Re-export commonly used types
pub use agents::{AgentRegistry, AgentRegistryBuilder, TaskContext, WorkerAgent};
pub use events::{Event, EventBus, EventType};
pub use llm::{Capability, LLMClient, LLMResponse, OfflineClient};
pub use memory::ArtifactStore;
pub use research::{CycleOptions, ResearchCoordinator};
pub use scheduler::TaskScheduler;
pub use session::SessionPersistence;
pub use tournament::TournamentEngine;
pub use types::{AppError, Result};
pub use utils::toml_config::{JnanaConfig, JnanaConfigManager};
