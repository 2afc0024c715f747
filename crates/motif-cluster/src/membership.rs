//! Versioned peer membership and chunk ownership.
//!
//! Each change in the registered peer set produces a new immutable
//! [`MembershipSnapshot`], published through a `tokio::sync::watch` channel.
//! Readers hold an `Arc` to the snapshot they resolved against, so ownership
//! is always computed over one consistent peer list.

use crate::coordination::CoordinationStore;
use crate::ClusterError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Delay before re-subscribing after the coordination watch closed.
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Ordinal of the peer owning `chunk_key` among `peers` sorted peers.
pub fn owner_ordinal(chunk_key: &str, peers: usize) -> Option<usize> {
    if peers == 0 {
        return None;
    }
    Some((xxh3_64(chunk_key.as_bytes()) % peers as u64) as usize)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipSnapshot {
    pub version: u64,
    peers: Vec<String>,
}

impl MembershipSnapshot {
    pub fn new(version: u64, peers: impl IntoIterator<Item = String>) -> Self {
        let mut peers: Vec<String> = peers.into_iter().collect();
        peers.sort();
        peers.dedup();
        Self { version, peers }
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.ordinal_of(address).is_some()
    }

    pub fn ordinal_of(&self, address: &str) -> Option<usize> {
        self.peers.binary_search_by(|p| p.as_str().cmp(address)).ok()
    }

    pub fn owner_of(&self, chunk_key: &str) -> Option<&str> {
        owner_ordinal(chunk_key, self.peers.len()).map(|i| self.peers[i].as_str())
    }

    pub fn is_owner(&self, chunk_key: &str, address: &str) -> bool {
        self.owner_of(chunk_key) == Some(address)
    }
}

/// Tracks the registered peer set and publishes snapshots on change.
pub struct Membership {
    store: Arc<dyn CoordinationStore>,
    snapshots: watch::Sender<Arc<MembershipSnapshot>>,
}

impl Membership {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Result<Self, ClusterError> {
        let initial = MembershipSnapshot::new(1, store.list()?);
        info!(
            "Membership v{} with {} peers",
            initial.version,
            initial.len()
        );
        let (snapshots, _) = watch::channel(Arc::new(initial));
        Ok(Self { store, snapshots })
    }

    pub fn current(&self) -> Arc<MembershipSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<MembershipSnapshot>> {
        self.snapshots.subscribe()
    }

    /// Re-read the peer set; publish a new snapshot only if it changed.
    pub fn refresh(&self) -> Result<Option<Arc<MembershipSnapshot>>, ClusterError> {
        let current = self.current();
        let next = MembershipSnapshot::new(current.version + 1, self.store.list()?);
        if next.peers == current.peers {
            return Ok(None);
        }
        info!(
            "Membership v{} -> v{}: {} peers",
            current.version,
            next.version,
            next.len()
        );
        let next = Arc::new(next);
        self.snapshots.send_replace(next.clone());
        Ok(Some(next))
    }

    fn refresh_logged(&self) {
        if let Err(e) = self.refresh() {
            warn!("Membership refresh failed: {}", e);
        }
    }

    /// Background task: follow coordination events until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.store.watch();
        // Catch changes made before the subscription.
        self.refresh_logged();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        debug!(?event, "Coordination event");
                        self.refresh_logged();
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Membership watch lagged by {} events, resyncing", missed);
                        self.refresh_logged();
                    }
                    Err(RecvError::Closed) => {
                        error!(
                            "Coordination watch closed, re-subscribing in {:?}",
                            WATCH_RETRY_DELAY
                        );
                        tokio::time::sleep(WATCH_RETRY_DELAY).await;
                        events = self.store.watch();
                        self.refresh_logged();
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{MemoryCoordinationStore, DEFAULT_LEASE_TTL};

    fn snapshot(peers: &[&str]) -> MembershipSnapshot {
        MembershipSnapshot::new(1, peers.iter().map(|p| p.to_string()))
    }

    #[test]
    fn test_snapshot_sorted_and_deduped() {
        let s = snapshot(&["c:1", "a:1", "c:1", "b:1"]);
        assert_eq!(s.peers(), &["a:1", "b:1", "c:1"]);
        assert_eq!(s.ordinal_of("b:1"), Some(1));
        assert!(!s.contains("d:1"));
    }

    #[test]
    fn test_owner_is_stable_and_in_range() {
        let s = snapshot(&["a:1", "b:1", "c:1"]);
        for i in 0..100 {
            let key = format!("shop:m:{}", i);
            let owner = s.owner_of(&key).unwrap();
            assert!(s.contains(owner));
            assert_eq!(s.owner_of(&key), Some(owner));
            assert_eq!(
                owner_ordinal(&key, 3).map(|o| s.peers()[o].as_str()),
                Some(owner)
            );
        }
    }

    #[test]
    fn test_no_owner_without_peers() {
        assert_eq!(owner_ordinal("p:m:0", 0), None);
        assert_eq!(MembershipSnapshot::default().owner_of("p:m:0"), None);
    }

    #[test]
    fn test_refresh_bumps_version_only_on_change() {
        let store = Arc::new(MemoryCoordinationStore::default());
        store.register("a:1", DEFAULT_LEASE_TTL).unwrap();
        let membership = Membership::new(store.clone()).unwrap();
        assert_eq!(membership.current().version, 1);

        assert!(membership.refresh().unwrap().is_none());
        store.register("b:1", DEFAULT_LEASE_TTL).unwrap();
        let next = membership.refresh().unwrap().unwrap();
        assert_eq!(next.version, 2);
        assert_eq!(next.peers(), &["a:1", "b:1"]);
        assert_eq!(membership.current(), next);
    }

    #[tokio::test]
    async fn test_run_follows_registrations() {
        let store = Arc::new(MemoryCoordinationStore::default());
        let membership = Arc::new(Membership::new(store.clone()).unwrap());
        let mut rx = membership.subscribe();
        let (tx, shutdown) = watch::channel(false);
        let task = tokio::spawn(membership.clone().run(shutdown));

        store.register("a:1", DEFAULT_LEASE_TTL).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !rx.borrow_and_update().contains("a:1") {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
