//! Tournament ranking.
//!
//! [`engine::TournamentEngine`] draws random pairs of artifacts, asks the judge
//! capability which is stronger on the evaluation criteria, and applies the
//! Elo update from [`elo`]. Ties leave both ratings unchanged but are still
//! recorded in the match history.

pub mod elo;
pub mod engine;

pub use engine::{MatchOutcome, TournamentEngine, TournamentReport};
