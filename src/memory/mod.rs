//! Shared state for the research session.
//!
//! The [`store::ArtifactStore`] is the only piece of shared mutable state in the
//! crate. Agents, the tournament engine and session persistence all receive an
//! `Arc<ArtifactStore>` and go through its typed accessors:
//!
//! - artifacts (hypotheses) behind per-key locks
//! - per-agent [`AgentState`](crate::types::AgentState)
//! - per-task datasets
//! - tournament bookkeeping and the research goal
//!
//! # Example
//!
//! ```ignore
//! use jnana::memory::ArtifactStore;
//! use jnana::types::Artifact;
//!
//! let store = ArtifactStore::new();
//! let id = store.create_artifact(Artifact::new("content", "summary", "generation-0"))?;
//! let top = store.top_k(5);
//! ```

/// Artifact store with per-key locking and optional write-through.
pub mod store;

pub use store::{ArtifactStore, StoreSnapshot};
