//! Subcommand implementations.

use crate::config::Config;
use anyhow::{bail, Context, Result};
use motif_cluster::{
    write_model, ChunkStore, CoordinationStore, FsChunkStore, LocalTransport, Membership,
    MemoryCoordinationStore, ModelKey, ModelManifest, PatternReplica, PatternServerClient,
};
use motif_core::UserAndEventsInfo;
use motif_runtime::{
    build_itree, collect_schema, CollectStats, CountSummary, CountingEngine, FileEventLog, ITree,
    ITreeRequest, LevelSummary, Miner, Pattern, PatternFactory,
};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Parse `A,B,C` into event names.
pub fn parse_pattern(input: &str) -> Result<Vec<String>> {
    let names: Vec<String> = input.split(',').map(|s| s.trim().to_string()).collect();
    if names.iter().any(|n| n.is_empty()) {
        bail!("Invalid pattern '{}': event names must be non-empty", input);
    }
    Ok(names)
}

/// Counts of one pattern as printed by `motif count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternReport {
    pub pattern: String,
    pub per_user_count: u64,
    pub total_user_count: u64,
    pub per_occurrence_count: u64,
}

impl From<&Pattern> for PatternReport {
    fn from(p: &Pattern) -> Self {
        Self {
            pattern: p.key(),
            per_user_count: p.per_user_count(),
            total_user_count: p.total_user_count(),
            per_occurrence_count: p.per_occurrence_count(),
        }
    }
}

pub fn schema(log: &Path) -> Result<(UserAndEventsInfo, CollectStats)> {
    let mut schema = UserAndEventsInfo::new();
    let stats = collect_schema(&FileEventLog::new(log), &mut schema)
        .with_context(|| format!("collecting schema from {}", log.display()))?;
    Ok((schema, stats))
}

pub fn count(log: &Path, patterns: &[Vec<String>], config: &Config) -> Result<(Vec<Pattern>, CountSummary)> {
    let (info, _) = schema(log)?;
    let factory = PatternFactory::new(Arc::new(info), config.counting.histogram);
    let mut counted = patterns
        .iter()
        .map(|names| factory.create(names.as_slice()))
        .collect::<Result<Vec<_>, _>>()?;
    let summary = CountingEngine::new(config.counting.clone())
        .count(&FileEventLog::new(log), &mut counted)
        .with_context(|| format!("counting patterns over {}", log.display()))?;
    Ok((counted, summary))
}

/// Result of `motif mine`.
#[derive(Debug, Clone, Serialize)]
pub struct MineReport {
    pub model: String,
    pub patterns: usize,
    pub chunks: usize,
    pub total_users: u64,
    pub total_event_count: u64,
    pub levels: Vec<LevelSummary>,
}

/// Mine a log and persist the model as chunks under `store_root`.
pub fn mine(log: &Path, key: &ModelKey, store_root: &Path, config: &Config) -> Result<MineReport> {
    let model = Miner::new(config.counting.clone())
        .run(&FileEventLog::new(log))
        .with_context(|| format!("mining {}", log.display()))?;
    let store = FsChunkStore::open(store_root)
        .with_context(|| format!("opening chunk store {}", store_root.display()))?;
    let start = model.collect.first_timestamp.unwrap_or(0);
    let end = model.collect.last_timestamp.unwrap_or(start);
    let total_event_count = model.total_event_count();
    let patterns = model.patterns.len();
    let manifest = write_model(
        &store,
        key,
        start,
        end,
        model.schema.clone(),
        model.patterns,
        config.server.patterns_per_chunk,
    )?;
    Ok(MineReport {
        model: key.to_string(),
        patterns,
        chunks: manifest.chunk_ids.len(),
        total_users: model.total_users,
        total_event_count,
        levels: model.levels,
    })
}

/// A single-replica pattern server over a chunk store, in this process.
pub struct LocalCluster {
    pub client: PatternServerClient,
    pub replica: Arc<PatternReplica>,
}

impl LocalCluster {
    pub fn open(store: Arc<dyn ChunkStore>, config: &Config) -> Result<Self> {
        let coordination: Arc<dyn CoordinationStore> =
            Arc::new(MemoryCoordinationStore::new(config.server.service_prefix.clone()));
        coordination.register(&config.server.address, config.server.lease_ttl())?;
        let membership = Membership::new(coordination)?;

        let replica = Arc::new(PatternReplica::new(config.server.address.clone(), store.clone()));
        let summary = replica.rebalance(membership.current())?;
        info!(chunks = summary.owned, "Local replica ready");

        let transport = Arc::new(LocalTransport::new());
        transport.add(replica.clone());
        let client = PatternServerClient::new(
            store,
            membership.subscribe(),
            transport,
            config.server.client_config(),
        );
        Ok(Self { client, replica })
    }

    /// Manifest of `model_id`, or the latest model of the project.
    pub fn manifest(&self, project_id: &str, model_id: Option<&str>) -> Result<ModelManifest> {
        match model_id {
            Some(model_id) => {
                let key = ModelKey::new(project_id, model_id)?;
                Ok(self.client.model_service(&key)?.manifest().clone())
            }
            None => Ok(self.client.latest_model(project_id)?),
        }
    }
}

/// Build an iTree against a model served from `store_root`.
pub fn itree(
    store_root: &Path,
    project_id: &str,
    model_id: Option<&str>,
    request: &ITreeRequest,
    config: &Config,
) -> Result<ITree> {
    let store = FsChunkStore::open(store_root)
        .with_context(|| format!("opening chunk store {}", store_root.display()))?;
    let cluster = LocalCluster::open(Arc::new(store), config)?;
    let manifest = cluster.manifest(project_id, model_id)?;
    info!(model = %manifest.key(), goal = %request.goal, "Building iTree");
    let service = cluster.client.service_for(manifest);
    Ok(build_itree(&service, request, &config.itree)?)
}

/// Indented text rendering, one node per line.
pub fn render_tree(tree: &ITree) -> String {
    let mut out = String::new();
    render_node(tree, 0, &mut out);
    out
}

fn render_node(tree: &ITree, id: usize, out: &mut String) {
    let Some(node) = tree.node(id) else {
        return;
    };
    let indent = "  ".repeat(node.depth);
    let _ = write!(
        out,
        "{}[{}] {}/{} ({:.1}%)",
        indent,
        node.event_names.join(" > "),
        node.goal_count,
        node.population,
        node.confidence * 100.0
    );
    if node.parent.is_some() {
        let _ = write!(
            out,
            " drop={:.4} gain={:+.1}%",
            node.information_drop,
            node.confidence_gain * 100.0
        );
    }
    out.push('\n');
    for &child in &node.children {
        render_node(tree, child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pattern() {
        assert_eq!(parse_pattern("A, B,C").unwrap(), vec!["A", "B", "C"]);
        assert!(parse_pattern("A,,C").is_err());
        assert!(parse_pattern("").is_err());
    }
}
