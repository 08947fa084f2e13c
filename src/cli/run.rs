//! `run` and `inspect` command implementations

use super::output::Output;
use crate::llm::OfflineClient;
use crate::research::{CycleOptions, ResearchCoordinator};
use crate::session::format;
use crate::memory::store::rank_order;
use crate::utils::toml_config::JnanaConfigManager;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Arguments of the `run` command
pub struct RunArgs {
    pub goal: String,
    pub hypotheses: usize,
    pub iterations: usize,
    pub matches: Option<usize>,
    pub output: Option<PathBuf>,
}

/// Runs a full research cycle and saves the session.
///
/// A K factor or criteria edited in the config file while the cycle runs is
/// picked up by the next tournament when `settings` is watching.
pub async fn run(settings: JnanaConfigManager, args: RunArgs, output: &Output) -> anyhow::Result<PathBuf> {
    output.banner();
    output.header("Research cycle");

    let matches = args
        .matches
        .unwrap_or(settings.config().tournament.default_match_count);
    let coordinator =
        ResearchCoordinator::with_config_manager(settings, Arc::new(OfflineClient::new()))
            .context("Failed to build the research coordinator")?;
    coordinator.start();

    output.step(1, 3, "Setting research goal");
    let session_id = coordinator.set_research_goal(&args.goal)?;
    output.kv("session", &session_id);

    output.step(2, 3, "Generating, reviewing, ranking and evolving");
    let report = coordinator
        .run_full_cycle(CycleOptions {
            initial_count: args.hypotheses,
            iterations: args.iterations,
            matches_per_iteration: matches,
            ..CycleOptions::default()
        })
        .await;
    let report = match report {
        Ok(report) => report,
        Err(e) => {
            coordinator.shutdown().await;
            return Err(e).context("Research cycle failed");
        }
    };
    output.kv("generated", &report.generated.to_string());
    output.kv("reviews", &report.reviewed.to_string());
    output.kv("matches", &report.matches_played.to_string());
    output.kv("evolved", &report.evolved.to_string());

    output.step(3, 3, "Saving session");
    let saved = coordinator.save(args.output.as_deref()).await;
    coordinator.shutdown().await;
    let path = saved.context("Failed to save the session")?;
    output.created("session", &path.display().to_string());

    output.header("Top hypotheses");
    for entry in &report.top {
        output.ranking_row(entry.rank, entry.elo_rating, &entry.artifact_id, &entry.summary);
    }
    output.complete("Research cycle finished");
    Ok(path)
}

/// Prints the detected format and the top `k` hypotheses of a session file.
pub fn inspect(path: &Path, k: usize, output: &Output) -> anyhow::Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let doc: serde_json::Value = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let decoded = format::decode(doc)?;

    output.header(&path.display().to_string());
    output.kv("format", &decoded.format.to_string());
    output.kv("session", &decoded.session_state.session_id);
    if !decoded.session_state.research_goal.is_empty() {
        output.kv("goal", &decoded.session_state.research_goal);
    }
    output.kv("hypotheses", &decoded.artifacts.len().to_string());
    output.kv("matches", &decoded.tournament.matches.len().to_string());

    let mut artifacts = decoded.artifacts;
    artifacts.sort_by(rank_order);
    output.newline();
    for (i, artifact) in artifacts.iter().take(k).enumerate() {
        output.ranking_row(i + 1, artifact.elo_rating, &artifact.id, &artifact.summary);
    }
    Ok(())
}
