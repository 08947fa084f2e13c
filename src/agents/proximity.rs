use super::{unsupported, TaskContext, WorkerAgent};
use crate::types::{AgentKind, AppError, Artifact, Result, Task, TaskKind};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::info;

const DEFAULT_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Serialize)]
pub struct SimilarityEdge {
    pub source: String,
    pub target: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProximityGraph {
    pub nodes: Vec<String>,
    pub edges: Vec<SimilarityEdge>,
    pub clusters: Vec<Vec<String>>,
    pub threshold: f64,
}

/// Groups similar hypotheses by token overlap. Needs no capability.
pub struct ProximityAgent {
    id: String,
}

impl ProximityAgent {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Jaccard similarity of two token sets; two empty sets score 0.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn find(parent: &mut [usize], i: usize) -> usize {
    let mut root = i;
    while parent[root] != root {
        root = parent[root];
    }
    let mut node = i;
    while parent[node] != root {
        let next = parent[node];
        parent[node] = root;
        node = next;
    }
    root
}

/// Builds the similarity graph; clusters are connected components over
/// edges at or above `threshold`.
pub fn build_graph(artifacts: &[Artifact], threshold: f64) -> ProximityGraph {
    let token_sets: Vec<HashSet<String>> = artifacts.iter().map(|a| tokens(&a.content)).collect();
    let mut parent: Vec<usize> = (0..artifacts.len()).collect();
    let mut edges = Vec::new();

    for i in 0..artifacts.len() {
        for j in (i + 1)..artifacts.len() {
            let similarity = jaccard(&token_sets[i], &token_sets[j]);
            if similarity >= threshold {
                edges.push(SimilarityEdge {
                    source: artifacts[i].id.clone(),
                    target: artifacts[j].id.clone(),
                    similarity,
                });
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for i in 0..artifacts.len() {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(artifacts[i].id.clone());
    }

    ProximityGraph {
        nodes: artifacts.iter().map(|a| a.id.clone()).collect(),
        edges,
        clusters: groups.into_values().collect(),
        threshold,
    }
}

#[async_trait]
impl WorkerAgent for ProximityAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Proximity
    }

    async fn execute(&self, task: &Task, ctx: &TaskContext) -> Result<Value> {
        if task.kind != TaskKind::ProximityAnalysis {
            return Err(unsupported(&self.id, task));
        }
        let threshold = task
            .params
            .get("threshold")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_THRESHOLD);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AppError::Validation(format!(
                "threshold must be within [0, 1], got {}",
                threshold
            )));
        }

        let artifacts = ctx.store.list_artifacts();
        ctx.checkpoint()?;
        let graph = build_graph(&artifacts, threshold);
        let value = serde_json::to_value(&graph)?;

        ctx.store.set_dataset(&task.id, value.clone());
        ctx.record(&self.id, "analyses_completed", Some(("proximity_graph", value)));

        info!(
            agent_id = %self.id,
            nodes = graph.nodes.len(),
            clusters = graph.clusters.len(),
            "Proximity graph built"
        );
        Ok(json!({
            "nodes": graph.nodes.len(),
            "edges": graph.edges.len(),
            "clusters": graph.clusters.len(),
        }))
    }
}
