//! A pattern server replica: owns a membership-determined subset of chunks.
//!
//! The served state (membership snapshot plus chunk map) is one immutable
//! value behind an `Arc`. A rebalance builds the next state off to the side,
//! reusing chunks that stay owned, and swaps it in with a single write. Chunks
//! no longer owned are released when the last in-flight reader drops the old
//! state.
//!
//! Models published after the last membership change are picked up two ways:
//! a periodic rebalance in [`PatternReplica::run`], and a lazy load when a
//! read arrives for an owned chunk that is not yet in the map.

use crate::chunk::ChunkStore;
use crate::keys::ChunkKey;
use crate::membership::MembershipSnapshot;
use crate::metrics::ClusterMetrics;
use crate::ClusterError;
use motif_runtime::{InMemoryPatternService, Pattern, PatternServiceWrapper};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How often a running replica rescans the store for new models.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// A read against one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkQuery {
    /// The pattern with exactly these event names.
    Exact(Vec<String>),
    /// Patterns by first/last event; an empty filter matches anything.
    Filtered { start: String, end: String },
    /// Patterns mentioning the event at any position.
    Containing(String),
}

impl ChunkQuery {
    fn run(&self, request_id: &str, chunk: &InMemoryPatternService) -> Vec<Arc<Pattern>> {
        match self {
            ChunkQuery::Exact(names) => chunk
                .get_pattern(request_id, names)
                .ok()
                .flatten()
                .into_iter()
                .collect(),
            ChunkQuery::Filtered { start, end } => chunk
                .get_all_patterns(request_id, start, end)
                .unwrap_or_default(),
            ChunkQuery::Containing(event) => chunk
                .get_all_containing_patterns(request_id, event)
                .unwrap_or_default(),
        }
    }
}

#[derive(Default)]
struct ReplicaState {
    snapshot: Arc<MembershipSnapshot>,
    chunks: FxHashMap<String, Arc<InMemoryPatternService>>,
}

/// Outcome of one rebalance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalanceSummary {
    pub version: u64,
    pub owned: usize,
    pub loaded: usize,
    pub dropped: usize,
}

pub struct PatternReplica {
    address: String,
    store: Arc<dyn ChunkStore>,
    state: RwLock<Arc<ReplicaState>>,
    refresh_interval: Duration,
    metrics: Option<ClusterMetrics>,
}

impl PatternReplica {
    pub fn new(address: impl Into<String>, store: Arc<dyn ChunkStore>) -> Self {
        Self {
            address: address.into(),
            store,
            state: RwLock::new(Arc::new(ReplicaState::default())),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            metrics: None,
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_metrics(mut self, metrics: ClusterMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn state(&self) -> Result<Arc<ReplicaState>, ClusterError> {
        self.state
            .read()
            .map(|s| s.clone())
            .map_err(|_| ClusterError::Store(crate::chunk::StoreError::Poisoned))
    }

    /// Version of the snapshot the served chunks were assigned under.
    pub fn snapshot_version(&self) -> u64 {
        self.state().map(|s| s.snapshot.version).unwrap_or(0)
    }

    /// Chunk keys currently served, sorted.
    pub fn owned_chunks(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state()
            .map(|s| s.chunks.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Load newly owned chunks, swap the served state, release the rest.
    pub fn rebalance(&self, snapshot: Arc<MembershipSnapshot>) -> Result<RebalanceSummary, ClusterError> {
        let started = Instant::now();
        let result = self.build_state(snapshot);
        let duration = started.elapsed().as_secs_f64();
        match result {
            Ok((next, summary)) => {
                let peers = next.snapshot.len();
                let previous = {
                    let mut state = self
                        .state
                        .write()
                        .map_err(|_| ClusterError::Store(crate::chunk::StoreError::Poisoned))?;
                    std::mem::replace(&mut *state, Arc::new(next))
                };
                drop(previous);
                info!(
                    replica = %self.address,
                    version = summary.version,
                    owned = summary.owned,
                    loaded = summary.loaded,
                    dropped = summary.dropped,
                    "Rebalanced"
                );
                if let Some(m) = &self.metrics {
                    m.record_rebalance(true, summary.owned, peers, duration);
                }
                Ok(summary)
            }
            Err(e) => {
                warn!(replica = %self.address, "Rebalance failed: {}", e);
                if let Some(m) = &self.metrics {
                    m.record_rebalance(false, 0, 0, duration);
                }
                Err(e)
            }
        }
    }

    fn build_state(
        &self,
        snapshot: Arc<MembershipSnapshot>,
    ) -> Result<(ReplicaState, RebalanceSummary), ClusterError> {
        let current = self.state()?;
        let mut chunks = FxHashMap::default();
        let mut loaded = 0;

        for manifest in self.store.list_manifests(None)? {
            for key in manifest.chunk_keys() {
                let chunk_key = key.to_string();
                if !snapshot.is_owner(&chunk_key, &self.address) {
                    continue;
                }
                if let Some(existing) = current.chunks.get(&chunk_key) {
                    chunks.insert(chunk_key, existing.clone());
                    continue;
                }
                match self.store.get_chunk(&key)? {
                    Some(chunk) => {
                        debug!(replica = %self.address, chunk = %chunk_key, "Loading chunk");
                        let service = InMemoryPatternService::new(manifest.schema.clone(), chunk.patterns);
                        chunks.insert(chunk_key, Arc::new(service));
                        loaded += 1;
                    }
                    None => warn!("Chunk {} is listed in its manifest but missing", chunk_key),
                }
            }
        }

        let dropped = current.chunks.keys().filter(|k| !chunks.contains_key(*k)).count();
        let summary = RebalanceSummary {
            version: snapshot.version,
            owned: chunks.len(),
            loaded,
            dropped,
        };
        Ok((ReplicaState { snapshot, chunks }, summary))
    }

    /// Answer a read for one chunk, or report who owns it.
    pub fn query(
        &self,
        request_id: &str,
        chunk_key: &str,
        query: &ChunkQuery,
    ) -> Result<Vec<Arc<Pattern>>, ClusterError> {
        let state = self.state()?;
        let outcome = match state.chunks.get(chunk_key) {
            Some(chunk) => Ok(query.run(request_id, chunk)),
            None => match state.snapshot.owner_of(chunk_key) {
                Some(owner) if owner != self.address => Err(ClusterError::NotOwner {
                    chunk_key: chunk_key.to_string(),
                    owner: owner.to_string(),
                }),
                Some(_) => self
                    .load_owned(&state, chunk_key)
                    .map(|chunk| query.run(request_id, &chunk)),
                None => Err(ClusterError::NoPeers),
            },
        };
        if let Some(m) = &self.metrics {
            m.record_query(match &outcome {
                Ok(_) => "ok",
                Err(ClusterError::NotOwner { .. }) => "not_owner",
                Err(ClusterError::ChunkNotFound(_)) => "not_found",
                Err(_) => "error",
            });
        }
        outcome
    }

    /// Load an owned chunk published since the last rebalance and add it to
    /// the served state. Chunks without a visible manifest are not served.
    fn load_owned(
        &self,
        seen: &Arc<ReplicaState>,
        chunk_key: &str,
    ) -> Result<Arc<InMemoryPatternService>, ClusterError> {
        let not_found = || ClusterError::ChunkNotFound(chunk_key.to_string());
        let key: ChunkKey = chunk_key.parse().map_err(|_| not_found())?;
        let manifest = self.store.get_manifest(&key.model)?.ok_or_else(not_found)?;
        if !manifest.chunk_ids.contains(&key.chunk_id) {
            return Err(not_found());
        }
        let chunk = self.store.get_chunk(&key)?.ok_or_else(not_found)?;
        let service = Arc::new(InMemoryPatternService::new(manifest.schema.clone(), chunk.patterns));

        let mut state = self
            .state
            .write()
            .map_err(|_| ClusterError::Store(crate::chunk::StoreError::Poisoned))?;
        // A rebalance may have swapped the state in the meantime.
        if !Arc::ptr_eq(&state.snapshot, &seen.snapshot) {
            return Ok(service);
        }
        if let Some(existing) = state.chunks.get(chunk_key) {
            return Ok(existing.clone());
        }
        let mut chunks = state.chunks.clone();
        chunks.insert(chunk_key.to_string(), service.clone());
        *state = Arc::new(ReplicaState {
            snapshot: state.snapshot.clone(),
            chunks,
        });
        debug!(replica = %self.address, chunk = %chunk_key, "Loaded chunk on first read");
        Ok(service)
    }

    /// Background task: rebalance on every membership snapshot, and every
    /// refresh interval to pick up new models, until shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut snapshots: watch::Receiver<Arc<MembershipSnapshot>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut refresh = tokio::time::interval(self.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        refresh.tick().await;
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            let replica = self.clone();
            match tokio::task::spawn_blocking(move || replica.rebalance(snapshot)).await {
                Ok(_) => {}
                Err(e) => warn!("Rebalance task for {} panicked: {}", self.address, e),
            }
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = refresh.tick() => {
                    debug!(replica = %self.address, "Periodic refresh");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
