//! Routing client for the pattern server.
//!
//! Resolves a project to its models by timestamp range, each chunk to its
//! owner in the current membership snapshot, and fans reads out to the owning
//! replicas. A replica that no longer owns a chunk answers
//! [`ClusterError::NotOwner`]; the read is re-sent to the named owner, or
//! re-resolved against a fresh snapshot, until the request deadline.

use crate::chunk::{ChunkStore, ModelManifest};
use crate::keys::{ChunkKey, ModelKey};
use crate::membership::MembershipSnapshot;
use crate::metrics::ClusterMetrics;
use crate::replica::{ChunkQuery, PatternReplica};
use crate::ClusterError;
use motif_core::UserAndEventsInfo;
use motif_runtime::{
    CountEstimator, IndependenceEstimator, Pattern, PatternServiceWrapper, ServiceError, ServiceResult,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Delivers a chunk read to the replica at an address.
pub trait ReplicaTransport: Send + Sync {
    fn query(
        &self,
        address: &str,
        request_id: &str,
        chunk_key: &str,
        query: &ChunkQuery,
    ) -> Result<Vec<Arc<Pattern>>, ClusterError>;
}

/// In-process transport over replicas living in the same process.
#[derive(Default)]
pub struct LocalTransport {
    replicas: RwLock<FxHashMap<String, Arc<PatternReplica>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, replica: Arc<PatternReplica>) {
        if let Ok(mut replicas) = self.replicas.write() {
            replicas.insert(replica.address().to_string(), replica);
        }
    }

    pub fn remove(&self, address: &str) -> Option<Arc<PatternReplica>> {
        self.replicas.write().ok().and_then(|mut r| r.remove(address))
    }
}

impl ReplicaTransport for LocalTransport {
    fn query(
        &self,
        address: &str,
        request_id: &str,
        chunk_key: &str,
        query: &ChunkQuery,
    ) -> Result<Vec<Arc<Pattern>>, ClusterError> {
        let replica = self
            .replicas
            .read()
            .ok()
            .and_then(|r| r.get(address).cloned())
            .ok_or_else(|| ClusterError::UnknownReplica(address.to_string()))?;
        replica.query(request_id, chunk_key, query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub request_deadline_ms: u64,
    pub retry_backoff_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_deadline_ms: 5_000,
            retry_backoff_ms: 20,
        }
    }
}

impl ClientConfig {
    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

pub struct PatternServerClient {
    store: Arc<dyn ChunkStore>,
    membership: watch::Receiver<Arc<MembershipSnapshot>>,
    transport: Arc<dyn ReplicaTransport>,
    config: ClientConfig,
    estimator: Arc<dyn CountEstimator>,
    metrics: Option<ClusterMetrics>,
}

impl PatternServerClient {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        membership: watch::Receiver<Arc<MembershipSnapshot>>,
        transport: Arc<dyn ReplicaTransport>,
        config: ClientConfig,
    ) -> Self {
        Self {
            store,
            membership,
            transport,
            config,
            estimator: Arc::new(IndependenceEstimator),
            metrics: None,
        }
    }

    /// Policy for constrained counts on every model this client serves.
    pub fn with_estimator(mut self, estimator: Arc<dyn CountEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_metrics(mut self, metrics: ClusterMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Models of `project_id` whose window intersects `[start, end]`, oldest first.
    pub fn models_for(&self, project_id: &str, start: i64, end: i64) -> Result<Vec<ModelManifest>, ClusterError> {
        Ok(self
            .store
            .list_manifests(Some(project_id))?
            .into_iter()
            .filter(|m| m.overlaps(start, end))
            .collect())
    }

    /// The model with the latest window start.
    pub fn latest_model(&self, project_id: &str) -> Result<ModelManifest, ClusterError> {
        self.store
            .list_manifests(Some(project_id))?
            .pop()
            .ok_or_else(|| ClusterError::ModelNotFound(project_id.to_string()))
    }

    pub fn model_service(&self, key: &ModelKey) -> Result<ModelService<'_>, ClusterError> {
        let manifest = self
            .store
            .get_manifest(key)?
            .ok_or_else(|| ClusterError::ModelNotFound(key.to_string()))?;
        Ok(self.service_for(manifest))
    }

    pub fn service_for(&self, manifest: ModelManifest) -> ModelService<'_> {
        ModelService {
            client: self,
            manifest,
        }
    }

    /// Read one chunk from its owner, following misroutes until the deadline.
    pub fn query_chunk(
        &self,
        request_id: &str,
        chunk_key: &ChunkKey,
        query: &ChunkQuery,
    ) -> Result<Vec<Arc<Pattern>>, ClusterError> {
        let deadline = Instant::now() + self.config.request_deadline();
        let key = chunk_key.to_string();
        let mut redirect: Option<String> = None;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let owner = match redirect.take() {
                Some(owner) => Some(owner),
                None => self.membership.borrow().owner_of(&key).map(str::to_string),
            };
            let result = match &owner {
                Some(owner) => self.transport.query(owner, request_id, &key, query),
                None => Err(ClusterError::NoPeers),
            };

            match result {
                Ok(patterns) => return Ok(patterns),
                Err(ClusterError::NotOwner { owner: named, .. }) => {
                    warn!(
                        request_id,
                        chunk = %key,
                        tried = owner.as_deref().unwrap_or(""),
                        owner = %named,
                        "Misrouted chunk read"
                    );
                    if owner.as_deref() != Some(named.as_str()) {
                        redirect = Some(named);
                    }
                }
                Err(e) if e.is_retryable() => {
                    debug!(request_id, chunk = %key, "Retryable read failure: {}", e);
                }
                Err(e) => return Err(e),
            }

            if let Some(m) = &self.metrics {
                m.retries_total.inc();
            }
            let backoff = self.config.retry_backoff();
            if Instant::now() + backoff >= deadline {
                return Err(ClusterError::DeadlineExceeded {
                    request_id: request_id.to_string(),
                    attempts,
                });
            }
            std::thread::sleep(backoff);
        }
    }

    fn fan_out(
        &self,
        request_id: &str,
        manifest: &ModelManifest,
        query: &ChunkQuery,
    ) -> Result<Vec<Arc<Pattern>>, ClusterError> {
        let mut merged = Vec::new();
        for key in manifest.chunk_keys() {
            merged.extend(self.query_chunk(request_id, &key, query)?);
        }
        Ok(merged)
    }
}

fn to_service_error(e: ClusterError) -> ServiceError {
    match e {
        ClusterError::DeadlineExceeded { .. } => ServiceError::DeadlineExceeded(e.to_string()),
        other => ServiceError::Unavailable(other.to_string()),
    }
}

/// `PatternServiceWrapper` over one served model.
pub struct ModelService<'a> {
    client: &'a PatternServerClient,
    manifest: ModelManifest,
}

impl ModelService<'_> {
    pub fn manifest(&self) -> &ModelManifest {
        &self.manifest
    }
}

impl PatternServiceWrapper for ModelService<'_> {
    fn get_user_and_events_info(&self) -> ServiceResult<Arc<UserAndEventsInfo>> {
        Ok(self.manifest.schema.clone())
    }

    fn estimator(&self) -> &dyn CountEstimator {
        self.client.estimator.as_ref()
    }

    fn get_pattern(&self, request_id: &str, event_names: &[String]) -> ServiceResult<Option<Arc<Pattern>>> {
        let query = ChunkQuery::Exact(event_names.to_vec());
        for key in self.manifest.chunk_keys() {
            let found = self
                .client
                .query_chunk(request_id, &key, &query)
                .map_err(to_service_error)?;
            if let Some(pattern) = found.into_iter().next() {
                return Ok(Some(pattern));
            }
        }
        Ok(None)
    }

    fn get_all_patterns(&self, request_id: &str, start: &str, end: &str) -> ServiceResult<Vec<Arc<Pattern>>> {
        let query = ChunkQuery::Filtered {
            start: start.to_string(),
            end: end.to_string(),
        };
        self.client
            .fan_out(request_id, &self.manifest, &query)
            .map_err(to_service_error)
    }

    fn get_all_containing_patterns(&self, request_id: &str, event: &str) -> ServiceResult<Vec<Arc<Pattern>>> {
        self.client
            .fan_out(request_id, &self.manifest, &ChunkQuery::Containing(event.to_string()))
            .map_err(to_service_error)
    }

    fn get_total_event_count(&self, _request_id: &str) -> ServiceResult<u64> {
        Ok(self.manifest.total_event_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{write_model, MemoryChunkStore};
    use motif_runtime::histogram::HistogramLimits;

    fn setup(peers: &[&str]) -> (Arc<MemoryChunkStore>, Arc<LocalTransport>, Arc<MembershipSnapshot>) {
        let store = Arc::new(MemoryChunkStore::new());
        let schema = UserAndEventsInfo::new();
        let patterns = ["A", "B", "C", "D"]
            .iter()
            .map(|e| Pattern::new(&["A", *e], &schema, HistogramLimits::default()).unwrap())
            .collect();
        let key = ModelKey::new("shop", "m1").unwrap();
        write_model(store.as_ref(), &key, 0, 10, Arc::new(schema), patterns, 1).unwrap();

        let snapshot = Arc::new(MembershipSnapshot::new(1, peers.iter().map(|p| p.to_string())));
        let transport = Arc::new(LocalTransport::new());
        for peer in peers {
            let replica = Arc::new(PatternReplica::new(*peer, store.clone()));
            replica.rebalance(snapshot.clone()).unwrap();
            transport.add(replica);
        }
        (store, transport, snapshot)
    }

    #[test]
    fn test_model_service_fans_out() {
        let (store, transport, snapshot) = setup(&["a:1", "b:1", "c:1"]);
        let (_tx, rx) = watch::channel(snapshot);
        let client = PatternServerClient::new(store, rx, transport, ClientConfig::default());
        let service = client.model_service(&ModelKey::new("shop", "m1").unwrap()).unwrap();

        assert_eq!(service.get_all_patterns("r", "A", "").unwrap().len(), 4);
        assert_eq!(service.get_all_containing_patterns("r", "C").unwrap().len(), 1);
        let found = service
            .get_pattern("r", &["A".to_string(), "D".to_string()])
            .unwrap()
            .unwrap();
        assert_eq!(found.key(), "A,D");
        assert_eq!(service.get_pattern("r", &["D".to_string()]).unwrap(), None);
    }

    #[derive(Debug)]
    struct Fixed;

    impl CountEstimator for Fixed {
        fn position_probability(
            &self,
            _: &motif_runtime::pattern::PositionStats,
            _: usize,
            _: &motif_core::EventConstraints,
        ) -> f64 {
            1.0
        }

        fn estimate(&self, _: &Pattern, _: motif_runtime::CountType, _: &[motif_core::EventConstraints]) -> Option<u64> {
            Some(7)
        }
    }

    #[test]
    fn test_client_estimator_applies_to_served_models() {
        let (store, transport, snapshot) = setup(&["a:1", "b:1"]);
        let (_tx, rx) = watch::channel(snapshot);
        let client = PatternServerClient::new(store, rx, transport, ClientConfig::default())
            .with_estimator(Arc::new(Fixed));
        let service = client.model_service(&ModelKey::new("shop", "m1").unwrap()).unwrap();
        let names = ["A".to_string(), "B".to_string()];
        let constraints = vec![motif_core::EventConstraints::new()];
        assert_eq!(service.get_per_user_count("r", &names, Some(&constraints)), Ok(Some(7)));
        assert_eq!(service.get_per_user_count("r", &names, None), Ok(Some(0)));
    }

    #[test]
    fn test_unknown_model() {
        let (store, transport, snapshot) = setup(&["a:1"]);
        let (_tx, rx) = watch::channel(snapshot);
        let client = PatternServerClient::new(store, rx, transport, ClientConfig::default());
        assert!(matches!(
            client.model_service(&ModelKey::new("shop", "nope").unwrap()),
            Err(ClusterError::ModelNotFound(_))
        ));
        assert!(client.latest_model("other").is_err());
        assert_eq!(client.latest_model("shop").unwrap().model_id, "m1");
    }

    #[test]
    fn test_deadline_when_no_replica_answers() {
        let (store, _transport, snapshot) = setup(&["a:1"]);
        let (_tx, rx) = watch::channel(snapshot);
        let config = ClientConfig {
            request_deadline_ms: 50,
            retry_backoff_ms: 5,
        };
        let client = PatternServerClient::new(store, rx, Arc::new(LocalTransport::new()), config);
        let service = client.model_service(&ModelKey::new("shop", "m1").unwrap()).unwrap();
        match service.get_all_patterns("r", "", "") {
            Err(ServiceError::DeadlineExceeded(_)) => {}
            other => panic!("expected deadline, got {:?}", other.map(|v| v.len())),
        }
    }
}
