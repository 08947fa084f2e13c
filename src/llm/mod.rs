//! Generation/Judgment Capability
//!
//! The orchestration core treats text generation and pairwise judging as an
//! injected, opaque capability:
//! - [`LLMClient`] - the trait any backend implements (`invoke(prompt, schema)`)
//! - [`Capability`] - shared handle that enforces per-call timeouts and
//!   classifies failures as `AppError::Capability`
//! - [`OfflineClient`] - deterministic local backend for demos
//!
//! # Example
//!
//! ```ignore
//! use jnana::llm::{Capability, OfflineClient};
//! use std::{sync::Arc, time::Duration};
//!
//! let capability = Capability::new(Arc::new(OfflineClient::new()), Duration::from_secs(30));
//! let response = capability.invoke("Propose a hypothesis", None).await?;
//! ```

/// Capability trait, response type and timeout wrapper.
pub mod client;
/// Offline schema-filling backend.
pub mod offline;

pub use client::{Capability, LLMClient, LLMResponse};
pub use offline::OfflineClient;
