//! Research orchestration
//!
//! [`coordinator::ResearchCoordinator`] is the control surface used by the CLI
//! and by embedding applications. It wires the shared store, the event bus,
//! the task scheduler with its worker agents, the tournament engine and
//! session persistence together, and turns each research step into tasks:
//!
//! 1. **Goal** - `set_research_goal` starts a session
//! 2. **Generation** - `generate` fans out one task per hypothesis
//! 3. **Review** - `review` attaches critiques
//! 4. **Tournament** - `run_tournament` plays pairwise matches and re-ranks
//! 5. **Evolution** - `evolve` derives new hypotheses from the best ones
//!
//! ```ignore
//! use jnana::research::ResearchCoordinator;
//!
//! let coordinator = ResearchCoordinator::new(config, Arc::new(OfflineClient::new()))?;
//! coordinator.set_research_goal("Why do cells age?")?;
//! coordinator.generate(5, &[]).await?;
//! let ranking = coordinator.run_tournament(None).await?;
//! ```

pub mod coordinator;

pub use coordinator::{CycleOptions, CycleReport, ResearchCoordinator, ResearchStatistics};
