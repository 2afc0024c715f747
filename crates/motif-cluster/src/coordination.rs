//! Replica registration with lease TTLs.
//!
//! The namespace is flat: one entry `<prefix><address> -> <address>` per live
//! replica. A replica keeps its entry alive by renewing the lease; entries
//! whose lease lapsed are removed by [`CoordinationStore::expire_stale`].
//! Every put and delete is broadcast to watchers.

use crate::chunk::StoreError;
use crate::ClusterError;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

pub const DEFAULT_SERVICE_PREFIX: &str = "/motif/pattern-server/";

/// Default lease TTL; replicas renew at a third of it.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(15);

const WATCH_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinationEvent {
    Put { address: String },
    Delete { address: String },
}

/// Result of an expiry sweep across all leases.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExpireSweepResult {
    pub leases_checked: usize,
    pub expired: Vec<String>,
}

pub trait CoordinationStore: Send + Sync {
    fn prefix(&self) -> &str;

    /// Create or replace the entry for `address` with a fresh lease.
    fn register(&self, address: &str, ttl: Duration) -> Result<(), ClusterError>;

    fn keep_alive(&self, address: &str) -> Result<(), ClusterError>;

    fn deregister(&self, address: &str) -> Result<(), ClusterError>;

    /// Registered addresses, sorted.
    fn list(&self) -> Result<Vec<String>, ClusterError>;

    fn watch(&self) -> broadcast::Receiver<CoordinationEvent>;

    fn expire_stale(&self) -> Result<ExpireSweepResult, ClusterError>;
}

#[derive(Debug, Clone)]
struct Lease {
    address: String,
    ttl: Duration,
    renewed_at: Instant,
}

pub struct MemoryCoordinationStore {
    prefix: String,
    entries: Mutex<FxHashMap<String, Lease>>,
    events: broadcast::Sender<CoordinationEvent>,
}

impl MemoryCoordinationStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            prefix: prefix.into(),
            entries: Mutex::new(FxHashMap::default()),
            events,
        }
    }

    fn entry_key(&self, address: &str) -> String {
        format!("{}{}", self.prefix, address)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, FxHashMap<String, Lease>>, ClusterError> {
        self.entries
            .lock()
            .map_err(|_| ClusterError::Store(StoreError::Poisoned))
    }

    fn notify(&self, event: CoordinationEvent) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.events.send(event);
    }

    /// Expire every lease not renewed within its TTL as of `now`.
    pub fn expire_stale_at(&self, now: Instant) -> Result<ExpireSweepResult, ClusterError> {
        let mut result = ExpireSweepResult::default();
        {
            let mut entries = self.lock()?;
            result.leases_checked = entries.len();
            entries.retain(|_, lease| {
                let idle = now.saturating_duration_since(lease.renewed_at);
                if idle > lease.ttl {
                    warn!(
                        "Lease for {} expired (not renewed for {:?})",
                        lease.address, idle
                    );
                    result.expired.push(lease.address.clone());
                    false
                } else {
                    true
                }
            });
        }
        result.expired.sort();
        for address in &result.expired {
            self.notify(CoordinationEvent::Delete {
                address: address.clone(),
            });
        }
        Ok(result)
    }
}

impl Default for MemoryCoordinationStore {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_PREFIX)
    }
}

impl CoordinationStore for MemoryCoordinationStore {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn register(&self, address: &str, ttl: Duration) -> Result<(), ClusterError> {
        let key = self.entry_key(address);
        self.lock()?.insert(
            key,
            Lease {
                address: address.to_string(),
                ttl,
                renewed_at: Instant::now(),
            },
        );
        info!("Registered {} under {} (lease {:?})", address, self.prefix, ttl);
        self.notify(CoordinationEvent::Put {
            address: address.to_string(),
        });
        Ok(())
    }

    fn keep_alive(&self, address: &str) -> Result<(), ClusterError> {
        let key = self.entry_key(address);
        let mut entries = self.lock()?;
        match entries.get_mut(&key) {
            Some(lease) => {
                lease.renewed_at = Instant::now();
                Ok(())
            }
            None => Err(ClusterError::LeaseNotFound(address.to_string())),
        }
    }

    fn deregister(&self, address: &str) -> Result<(), ClusterError> {
        let key = self.entry_key(address);
        let removed = self.lock()?.remove(&key).is_some();
        if removed {
            info!("Deregistered {}", address);
            self.notify(CoordinationEvent::Delete {
                address: address.to_string(),
            });
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, ClusterError> {
        let entries = self.lock()?;
        let mut addresses: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(&self.prefix))
            .map(|(_, lease)| lease.address.clone())
            .collect();
        addresses.sort();
        Ok(addresses)
    }

    fn watch(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.events.subscribe()
    }

    fn expire_stale(&self) -> Result<ExpireSweepResult, ClusterError> {
        self.expire_stale_at(Instant::now())
    }
}

/// Background task: renew `address`'s lease every `ttl / 3`, re-registering
/// if the lease was lost, until `shutdown` flips to true.
pub async fn keep_alive_loop(
    store: Arc<dyn CoordinationStore>,
    address: String,
    ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval((ttl / 3).max(Duration::from_millis(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        match store.keep_alive(&address) {
            Ok(()) => debug!("Lease renewed for {}", address),
            Err(ClusterError::LeaseNotFound(_)) => {
                warn!("Lease for {} lost, registering again", address);
                if let Err(e) = store.register(&address, ttl) {
                    warn!("Re-registration of {} failed: {}", address, e);
                }
            }
            Err(e) => warn!("Lease renewal for {} failed: {}", address, e),
        }
    }
    if let Err(e) = store.deregister(&address) {
        warn!("Deregistration of {} failed: {}", address, e);
    }
}

/// Background task: sweep lapsed leases every `interval` until shutdown.
pub async fn expiry_loop(
    store: Arc<dyn CoordinationStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = store.expire_stale() {
                    warn!("Lease sweep failed: {}", e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_list_sorted() {
        let store = MemoryCoordinationStore::default();
        store.register("10.0.0.3:7000", DEFAULT_LEASE_TTL).unwrap();
        store.register("10.0.0.1:7000", DEFAULT_LEASE_TTL).unwrap();
        store.register("10.0.0.1:7000", DEFAULT_LEASE_TTL).unwrap();
        assert_eq!(store.list().unwrap(), vec!["10.0.0.1:7000", "10.0.0.3:7000"]);
    }

    #[test]
    fn test_keep_alive_unknown_address() {
        let store = MemoryCoordinationStore::default();
        assert!(matches!(
            store.keep_alive("nobody:1"),
            Err(ClusterError::LeaseNotFound(_))
        ));
    }

    #[test]
    fn test_expire_stale_leases() {
        let store = MemoryCoordinationStore::default();
        store.register("a:1", Duration::from_secs(5)).unwrap();
        store.register("b:1", Duration::from_secs(60)).unwrap();

        let later = Instant::now() + Duration::from_secs(10);
        let result = store.expire_stale_at(later).unwrap();
        assert_eq!(result.leases_checked, 2);
        assert_eq!(result.expired, vec!["a:1"]);
        assert_eq!(store.list().unwrap(), vec!["b:1"]);
    }

    #[test]
    fn test_fresh_leases_survive_sweep() {
        let store = MemoryCoordinationStore::default();
        store.register("a:1", Duration::from_secs(5)).unwrap();
        let result = store.expire_stale().unwrap();
        assert!(result.expired.is_empty());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_watch_sees_puts_and_deletes() {
        let store = MemoryCoordinationStore::default();
        let mut rx = store.watch();
        store.register("a:1", DEFAULT_LEASE_TTL).unwrap();
        store.deregister("a:1").unwrap();
        store.deregister("a:1").unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            CoordinationEvent::Put { address: "a:1".into() }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            CoordinationEvent::Delete { address: "a:1".into() }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_keep_alive_loop_deregisters_on_shutdown() {
        let ttl = Duration::from_millis(60);
        let store: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordinationStore::default());
        store.register("a:1", ttl).unwrap();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(keep_alive_loop(store.clone(), "a:1".into(), ttl, rx));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.expire_stale().unwrap().expired.is_empty());
        assert_eq!(store.list().unwrap(), vec!["a:1"]);

        tx.send(true).unwrap();
        task.await.unwrap();
        assert!(store.list().unwrap().is_empty());
    }
}
