//! Persisted models: a manifest plus fixed-size chunks of counted patterns.
//!
//! [`FsChunkStore`] lays models out as
//! `<root>/<project>/<model>/manifest.json` and `<root>/<project>/<model>/<chunkId>.json`.
//! Chunks are written before the manifest, so a visible manifest always
//! refers to complete chunks.

use crate::keys::{ChunkKey, ModelKey};
use motif_core::UserAndEventsInfo;
use motif_runtime::Pattern;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::info;

const MANIFEST_FILE: &str = "manifest.json";

/// Error type for chunk store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub project_id: String,
    pub model_id: String,
    /// Inclusive timestamp range of the events the model was trained on.
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub chunk_ids: Vec<String>,
    pub schema: Arc<UserAndEventsInfo>,
    pub total_event_count: u64,
    pub total_user_count: u64,
    pub created_at_ms: i64,
}

impl ModelManifest {
    pub fn key(&self) -> ModelKey {
        ModelKey {
            project_id: self.project_id.clone(),
            model_id: self.model_id.clone(),
        }
    }

    pub fn chunk_keys(&self) -> Vec<ChunkKey> {
        let model = self.key();
        self.chunk_ids
            .iter()
            .map(|chunk_id| ChunkKey {
                model: model.clone(),
                chunk_id: chunk_id.clone(),
            })
            .collect()
    }

    /// Whether the model window intersects `[start, end]`.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.start_timestamp <= end && start <= self.end_timestamp
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelChunk {
    pub chunk_id: String,
    pub patterns: Vec<Pattern>,
}

/// Trait for model storage backends.
pub trait ChunkStore: Send + Sync {
    fn put_manifest(&self, manifest: &ModelManifest) -> Result<(), StoreError>;

    fn get_manifest(&self, key: &ModelKey) -> Result<Option<ModelManifest>, StoreError>;

    /// Manifests ordered by project, start timestamp, then model id.
    fn list_manifests(&self, project_id: Option<&str>) -> Result<Vec<ModelManifest>, StoreError>;

    fn put_chunk(&self, key: &ChunkKey, chunk: &ModelChunk) -> Result<(), StoreError>;

    fn get_chunk(&self, key: &ChunkKey) -> Result<Option<ModelChunk>, StoreError>;
}

fn sort_manifests(manifests: &mut [ModelManifest]) {
    manifests.sort_by(|a, b| {
        a.project_id
            .cmp(&b.project_id)
            .then(a.start_timestamp.cmp(&b.start_timestamp))
            .then_with(|| a.model_id.cmp(&b.model_id))
    });
}

/// In-memory chunk store for tests and single-process serving.
#[derive(Default)]
pub struct MemoryChunkStore {
    manifests: RwLock<FxHashMap<ModelKey, ModelManifest>>,
    chunks: RwLock<FxHashMap<ChunkKey, ModelChunk>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put_manifest(&self, manifest: &ModelManifest) -> Result<(), StoreError> {
        let mut manifests = self.manifests.write().map_err(|_| StoreError::Poisoned)?;
        manifests.insert(manifest.key(), manifest.clone());
        Ok(())
    }

    fn get_manifest(&self, key: &ModelKey) -> Result<Option<ModelManifest>, StoreError> {
        let manifests = self.manifests.read().map_err(|_| StoreError::Poisoned)?;
        Ok(manifests.get(key).cloned())
    }

    fn list_manifests(&self, project_id: Option<&str>) -> Result<Vec<ModelManifest>, StoreError> {
        let manifests = self.manifests.read().map_err(|_| StoreError::Poisoned)?;
        let mut listed: Vec<ModelManifest> = manifests
            .values()
            .filter(|m| project_id.map_or(true, |p| m.project_id == p))
            .cloned()
            .collect();
        sort_manifests(&mut listed);
        Ok(listed)
    }

    fn put_chunk(&self, key: &ChunkKey, chunk: &ModelChunk) -> Result<(), StoreError> {
        let mut chunks = self.chunks.write().map_err(|_| StoreError::Poisoned)?;
        chunks.insert(key.clone(), chunk.clone());
        Ok(())
    }

    fn get_chunk(&self, key: &ChunkKey) -> Result<Option<ModelChunk>, StoreError> {
        let chunks = self.chunks.read().map_err(|_| StoreError::Poisoned)?;
        Ok(chunks.get(key).cloned())
    }
}

/// File-based chunk store, one directory per model.
pub struct FsChunkStore {
    root: PathBuf,
}

impl FsChunkStore {
    /// Open or create a store rooted at the given directory
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn model_dir(&self, key: &ModelKey) -> PathBuf {
        self.root.join(&key.project_id).join(&key.model_id)
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let data = serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &data).map_err(|e| StoreError::Io(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| StoreError::Io(e.to_string()))
    }

    fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, StoreError> {
        match std::fs::read(path) {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    fn subdirs(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };
        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io(e.to_string()))?;
            if entry.path().is_dir() {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }
}

impl ChunkStore for FsChunkStore {
    fn put_manifest(&self, manifest: &ModelManifest) -> Result<(), StoreError> {
        Self::write_json(&self.model_dir(&manifest.key()).join(MANIFEST_FILE), manifest)
    }

    fn get_manifest(&self, key: &ModelKey) -> Result<Option<ModelManifest>, StoreError> {
        Self::read_json(&self.model_dir(key).join(MANIFEST_FILE))
    }

    fn list_manifests(&self, project_id: Option<&str>) -> Result<Vec<ModelManifest>, StoreError> {
        let projects = match project_id {
            Some(p) => vec![self.root.join(p)],
            None => Self::subdirs(&self.root)?,
        };
        let mut listed = Vec::new();
        for project in projects {
            for model in Self::subdirs(&project)? {
                if let Some(manifest) = Self::read_json::<ModelManifest>(&model.join(MANIFEST_FILE))? {
                    listed.push(manifest);
                }
            }
        }
        sort_manifests(&mut listed);
        Ok(listed)
    }

    fn put_chunk(&self, key: &ChunkKey, chunk: &ModelChunk) -> Result<(), StoreError> {
        let path = self.model_dir(&key.model).join(format!("{}.json", key.chunk_id));
        Self::write_json(&path, chunk)
    }

    fn get_chunk(&self, key: &ChunkKey) -> Result<Option<ModelChunk>, StoreError> {
        Self::read_json(&self.model_dir(&key.model).join(format!("{}.json", key.chunk_id)))
    }
}

/// Split counted patterns into chunks of at most `patterns_per_chunk` and
/// persist them with their manifest. Chunk ids are `0`, `1`, ...
pub fn write_model(
    store: &dyn ChunkStore,
    key: &ModelKey,
    start_timestamp: i64,
    end_timestamp: i64,
    schema: Arc<UserAndEventsInfo>,
    patterns: Vec<Pattern>,
    patterns_per_chunk: usize,
) -> Result<ModelManifest, StoreError> {
    let total_event_count = patterns
        .iter()
        .filter(|p| p.len() == 1)
        .map(|p| p.per_occurrence_count())
        .sum();
    let total_user_count = patterns.iter().map(|p| p.total_user_count()).max().unwrap_or(0);

    let mut chunk_ids = Vec::new();
    let mut remaining = patterns.into_iter().peekable();
    while remaining.peek().is_some() {
        let chunk_id = chunk_ids.len().to_string();
        let chunk = ModelChunk {
            chunk_id: chunk_id.clone(),
            patterns: remaining.by_ref().take(patterns_per_chunk.max(1)).collect(),
        };
        let chunk_key = ChunkKey {
            model: key.clone(),
            chunk_id: chunk_id.clone(),
        };
        store.put_chunk(&chunk_key, &chunk)?;
        chunk_ids.push(chunk_id);
    }

    let manifest = ModelManifest {
        project_id: key.project_id.clone(),
        model_id: key.model_id.clone(),
        start_timestamp,
        end_timestamp,
        chunk_ids,
        schema,
        total_event_count,
        total_user_count,
        created_at_ms: chrono::Utc::now().timestamp_millis(),
    };
    store.put_manifest(&manifest)?;
    info!(
        model = %key,
        chunks = manifest.chunk_ids.len(),
        events = total_event_count,
        "Model written"
    );
    Ok(manifest)
}
