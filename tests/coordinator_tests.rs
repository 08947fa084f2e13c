//! End-to-end tests for the research coordinator.

mod common;

use async_trait::async_trait;
use common::mocks::ScriptedJudge;
use common::test_config;
use jnana::agents::{TaskContext, WorkerAgent};
use jnana::events::EventType;
use jnana::research::CycleOptions;
use jnana::types::{
    AgentKind, AppError, Artifact, EvolutionType, GenerationStrategy, MetaReviewKind, Result,
    ReviewType, Task, TaskKind,
};
use jnana::{JnanaConfigManager, OfflineClient, ResearchCoordinator};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn offline(dir: &std::path::Path) -> ResearchCoordinator {
    ResearchCoordinator::new(test_config(dir), Arc::new(OfflineClient::new())).unwrap()
}

#[tokio::test]
async fn test_full_cycle_produces_ranked_hypotheses() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = offline(dir.path());
    coordinator.set_research_goal("What limits battery lifetime?").unwrap();

    let report = coordinator
        .run_full_cycle(CycleOptions {
            initial_count: 4,
            iterations: 1,
            matches_per_iteration: 6,
            new_per_iteration: 2,
        })
        .await
        .unwrap();

    assert_eq!(report.iterations, 1);
    assert_eq!(report.generated, 6);
    // Two default review types for each of the four initial hypotheses
    assert_eq!(report.reviewed, 8);
    assert!(report.matches_played <= 6);
    assert!(report.evolved >= 1);
    assert!(report.meta_review.is_some());
    assert!(report.research_overview.is_some());
    assert_eq!(report.top.len(), 5);
    assert!(report
        .top
        .windows(2)
        .all(|w| w[0].elo_rating >= w[1].elo_rating));

    let stats = coordinator.get_statistics();
    assert_eq!(stats.artifact_count, coordinator.store().len());
    assert_eq!(stats.tournament_matches, report.matches_played);
    assert!(stats.session.unwrap().stats.agent_interactions > 0);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_operations_require_a_goal() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = offline(dir.path());

    assert!(matches!(
        coordinator.set_research_goal("   "),
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        coordinator.generate(1, &[]).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        coordinator.meta_review(MetaReviewKind::MetaReview).await,
        Err(AppError::Validation(_))
    ));
    assert!(coordinator.store().is_empty());
}

#[tokio::test]
async fn test_generation_uses_requested_strategies() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = offline(dir.path());
    coordinator.set_research_goal("goal").unwrap();

    let ids = coordinator
        .generate(2, &[GenerationStrategy::ScientificDebate])
        .await
        .unwrap();

    for id in ids {
        let artifact = coordinator.get_artifact(&id).unwrap();
        assert_eq!(artifact.metadata["generation_strategy"], "scientific_debate");
        assert_eq!(artifact.elo_rating, 1200.0);
    }
}

#[tokio::test]
async fn test_review_only_fills_missing_reviews() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = offline(dir.path());
    coordinator.set_research_goal("goal").unwrap();
    let ids = coordinator.generate(2, &[]).await.unwrap();

    let first = coordinator
        .review(&ids[..1], &[ReviewType::InitialReview])
        .await
        .unwrap();
    assert_eq!(first, 1);

    // Only the missing types are reviewed when no ids are given
    let rest = coordinator
        .review(&[], &[ReviewType::InitialReview])
        .await
        .unwrap();
    assert_eq!(rest, 1);
    assert_eq!(
        coordinator
            .review(&[], &[ReviewType::InitialReview])
            .await
            .unwrap(),
        0
    );

    assert!(matches!(
        coordinator.review(&["missing".to_string()], &[]).await,
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn test_tournament_needs_two_hypotheses() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = offline(dir.path());
    coordinator.set_research_goal("goal").unwrap();
    coordinator.generate(1, &[]).await.unwrap();
    let revision = coordinator.store().revision();

    let err = coordinator.run_tournament(Some(3)).await.unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(coordinator.store().revision(), revision);
}

#[tokio::test]
async fn test_tournament_through_scheduler_keeps_ratings_zero_sum() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = offline(dir.path());
    coordinator.set_research_goal("goal").unwrap();
    coordinator.generate(4, &[]).await.unwrap();

    let rankings = coordinator.run_tournament(Some(8)).await.unwrap();

    assert_eq!(rankings.len(), 4);
    let total: f64 = rankings.iter().map(|r| r.elo_rating).sum();
    assert!((total - 4.0 * 1200.0).abs() < 1e-6);
    let state = coordinator.store().tournament_state();
    assert_eq!(state.rankings, rankings);
    assert!(state.statistics.is_some());

    assert!(coordinator.events().flush(Duration::from_secs(2)).await);
    let completed = coordinator.events().recent(EventType::TournamentCompleted, 1);
    let played = completed[0].payload.get("played").and_then(Value::as_u64).unwrap();
    assert_eq!(played as usize, state.matches.len());
}

#[tokio::test]
async fn test_evolution_links_children_to_parents() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = offline(dir.path());
    coordinator.set_research_goal("goal").unwrap();
    let parents = coordinator.generate(2, &[]).await.unwrap();

    let improved = coordinator
        .evolve(&parents, &[EvolutionType::ImproveHypothesis])
        .await
        .unwrap();
    assert_eq!(improved.len(), 2);
    for id in &improved {
        let child = coordinator.get_artifact(id).unwrap();
        assert!(parents.contains(child.parent_id.as_ref().unwrap()));
    }

    let combined = coordinator
        .evolve(&parents, &[EvolutionType::CombineHypotheses])
        .await
        .unwrap();
    assert_eq!(combined.len(), 1);
    let child = coordinator.get_artifact(&combined[0]).unwrap();
    assert_eq!(child.metadata["parent_ids"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_proximity_and_meta_review() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = offline(dir.path());
    coordinator.set_research_goal("goal").unwrap();
    coordinator.generate(3, &[]).await.unwrap();

    let graph = coordinator.analyze_proximity(Some(0.5)).await.unwrap();
    assert_eq!(graph["nodes"].as_array().unwrap().len(), 3);
    assert!(graph["clusters"].is_array());

    assert!(matches!(
        coordinator.analyze_proximity(Some(2.0)).await,
        Err(AppError::Capability(_))
    ));

    let overview = coordinator
        .meta_review(MetaReviewKind::ResearchOverview)
        .await
        .unwrap();
    assert!(overview.is_object());
}

#[tokio::test]
async fn test_remove_artifact_retires_its_id() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = offline(dir.path());
    coordinator.start();
    let artifact = Artifact::new("to be removed", "to be removed", "generation-0");
    let id = coordinator.store().create_artifact(artifact.clone()).unwrap();

    coordinator.remove_artifact(&id).unwrap();

    assert!(coordinator.get_artifact(&id).is_none());
    assert!(matches!(
        coordinator.remove_artifact(&id),
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        coordinator.store().create_artifact(artifact),
        Err(AppError::Validation(_))
    ));
    assert!(coordinator.events().flush(Duration::from_secs(1)).await);
    let deleted = coordinator.events().recent(EventType::HypothesisDeleted, 5);
    assert_eq!(deleted[0].payload_str("hypothesis_id"), Some(id.as_str()));
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_cancel_unknown_task() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = offline(dir.path());
    assert!(matches!(
        coordinator.cancel_task("nope"),
        Err(AppError::NotFound(_))
    ));
}

/// Extra proximity agent that reports a fixed graph.
struct FixedProximity;

#[async_trait]
impl WorkerAgent for FixedProximity {
    fn id(&self) -> &str {
        "proximity-fixed"
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Proximity
    }

    async fn execute(&self, task: &Task, ctx: &TaskContext) -> Result<Value> {
        assert_eq!(task.kind, TaskKind::ProximityAnalysis);
        let graph = json!({"nodes": [], "edges": [], "clusters": [], "threshold": 1.0});
        ctx.store.set_dataset(&task.id, graph);
        Ok(json!({"nodes": 0}))
    }
}

#[tokio::test]
async fn test_custom_agents_join_the_pool() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.agents.proximity = 0;
    let coordinator = ResearchCoordinator::with_agents(
        config,
        Arc::new(OfflineClient::new()),
        |builder| builder.with_agent(Arc::new(FixedProximity)),
    )
    .unwrap();

    let graph = coordinator.analyze_proximity(None).await.unwrap();

    assert_eq!(graph["threshold"], 1.0);
    let stats = coordinator.get_statistics();
    assert_eq!(stats.scheduler.agents["proximity"], 1);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_reloaded_tournament_settings_apply_to_the_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jnana.toml");
    let write_config = |k_factor: f64, matches: usize| {
        let toml = format!(
            "[tournament]\nelo_k_factor = {:.1}\ndefault_match_count = {}\nseed = 7\n\n\
             [session]\nauto_save_enabled = false\nsessions_dir = '{}'\n\n\
             [scheduler]\npoll_interval_ms = 5\n",
            k_factor,
            matches,
            dir.path().display()
        );
        std::fs::write(&path, toml).unwrap();
    };
    write_config(32.0, 3);

    let manager = JnanaConfigManager::new(&path).unwrap();
    let coordinator = ResearchCoordinator::with_config_manager(
        manager.clone(),
        Arc::new(ScriptedJudge::always("A")),
    )
    .unwrap();
    coordinator.set_research_goal("goal").unwrap();
    for content in ["first", "second"] {
        coordinator
            .store()
            .create_artifact(Artifact::new(content, content, "generation-0"))
            .unwrap();
    }

    write_config(64.0, 1);
    manager.reload().unwrap();

    let rankings = coordinator.run_tournament(None).await.unwrap();

    assert_eq!(coordinator.store().tournament_state().matches.len(), 1);
    assert_eq!(rankings[0].elo_rating, 1232.0);
    assert_eq!(rankings[1].elo_rating, 1168.0);
    assert_eq!(coordinator.engine().config().elo_k_factor, 64.0);
    assert_eq!(coordinator.config().tournament.default_match_count, 1);
    coordinator.shutdown().await;
}
