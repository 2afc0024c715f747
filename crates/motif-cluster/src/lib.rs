//! # Motif Cluster
//!
//! Sharded serving of trained pattern models.
//!
//! A trained model is the set of counted patterns of one project over one
//! time window. It is written to a [`ChunkStore`] as a manifest plus a list of
//! chunks, and each chunk is owned by exactly one replica at a time.
//!
//! ## Architecture
//!
//! - **Coordination store**: Replicas register their address under a service
//!   prefix with a lease TTL and keep it alive. Lapsed leases are expired.
//! - **Membership**: Every change in the registered set produces a new
//!   immutable, versioned [`MembershipSnapshot`] that is swapped in atomically.
//!   A chunk is owned by the peer at ordinal `xxh3(chunk_key) mod peers`.
//! - **Replicas**: On each snapshot a replica loads the chunks it now owns,
//!   swaps its chunk map, then drops chunks it no longer owns. Reads for a
//!   chunk it does not own fail with the retryable [`ClusterError::NotOwner`].
//! - **Client**: Resolves project to models, chunks to owners, fans out and
//!   merges. Misrouted reads are retried against the re-resolved owner until
//!   the request deadline.

pub mod chunk;
pub mod client;
pub mod coordination;
pub mod keys;
pub mod membership;
pub mod metrics;
pub mod replica;

// Re-exports
pub use chunk::{
    write_model, ChunkStore, FsChunkStore, MemoryChunkStore, ModelChunk, ModelManifest, StoreError,
};
pub use client::{ClientConfig, LocalTransport, ModelService, PatternServerClient, ReplicaTransport};
pub use coordination::{
    expiry_loop, keep_alive_loop, CoordinationEvent, CoordinationStore, ExpireSweepResult,
    MemoryCoordinationStore, DEFAULT_LEASE_TTL, DEFAULT_SERVICE_PREFIX,
};
pub use keys::{ChunkKey, ModelKey};
pub use membership::{owner_ordinal, Membership, MembershipSnapshot};
pub use metrics::ClusterMetrics;
pub use replica::{ChunkQuery, PatternReplica, RebalanceSummary, DEFAULT_REFRESH_INTERVAL};

/// Errors that can occur in the pattern server.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Chunk {chunk_key} is owned by {owner}")]
    NotOwner { chunk_key: String, owner: String },

    #[error("Chunk not found: {0}")]
    ChunkNotFound(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("No peers registered")]
    NoPeers,

    #[error("Unknown replica: {0}")]
    UnknownReplica(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Lease not found: {0}")]
    LeaseNotFound(String),

    #[error("Request {request_id} exceeded its deadline after {attempts} attempts")]
    DeadlineExceeded { request_id: String, attempts: u32 },

    #[error("Chunk store error: {0}")]
    Store(#[from] StoreError),
}

impl ClusterError {
    /// Whether the read may succeed against a re-resolved owner.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClusterError::NotOwner { .. } | ClusterError::NoPeers | ClusterError::UnknownReplica(_)
        )
    }
}
