//! Model and chunk keys: `projectId:modelId` and `projectId:modelId:chunkId`.

use crate::ClusterError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const KEY_SEPARATOR: char = ':';

fn check_component(kind: &str, value: &str) -> Result<(), ClusterError> {
    if value.is_empty() || value.contains(KEY_SEPARATOR) || value.contains('/') {
        return Err(ClusterError::InvalidKey(format!("{} {:?}", kind, value)));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub project_id: String,
    pub model_id: String,
}

impl ModelKey {
    pub fn new(project_id: impl Into<String>, model_id: impl Into<String>) -> Result<Self, ClusterError> {
        let key = Self {
            project_id: project_id.into(),
            model_id: model_id.into(),
        };
        check_component("project", &key.project_id)?;
        check_component("model", &key.model_id)?;
        Ok(key)
    }

    pub fn chunk(&self, chunk_id: impl Into<String>) -> Result<ChunkKey, ClusterError> {
        let chunk_id = chunk_id.into();
        check_component("chunk", &chunk_id)?;
        Ok(ChunkKey {
            model: self.clone(),
            chunk_id,
        })
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.project_id, KEY_SEPARATOR, self.model_id)
    }
}

impl FromStr for ModelKey {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split(KEY_SEPARATOR).collect::<Vec<_>>().as_slice() {
            [project, model] => ModelKey::new(*project, *model),
            _ => Err(ClusterError::InvalidKey(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub model: ModelKey,
    pub chunk_id: String,
}

impl ChunkKey {
    pub fn new(
        project_id: impl Into<String>,
        model_id: impl Into<String>,
        chunk_id: impl Into<String>,
    ) -> Result<Self, ClusterError> {
        ModelKey::new(project_id, model_id)?.chunk(chunk_id)
    }

    pub fn project_id(&self) -> &str {
        &self.model.project_id
    }

    pub fn model_id(&self) -> &str {
        &self.model.model_id
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.model, KEY_SEPARATOR, self.chunk_id)
    }
}

impl FromStr for ChunkKey {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split(KEY_SEPARATOR).collect::<Vec<_>>().as_slice() {
            [project, model, chunk] => ChunkKey::new(*project, *model, *chunk),
            _ => Err(ClusterError::InvalidKey(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let key = ChunkKey::new("shop", "2026-10", "3").unwrap();
        assert_eq!(key.to_string(), "shop:2026-10:3");
        assert_eq!(key.model.to_string(), "shop:2026-10");
        assert_eq!("shop:2026-10:3".parse::<ChunkKey>().unwrap(), key);
        assert_eq!("shop:2026-10".parse::<ModelKey>().unwrap(), key.model);
    }

    #[test]
    fn test_rejects_bad_components() {
        assert!(ChunkKey::new("a:b", "m", "0").is_err());
        assert!(ModelKey::new("", "m").is_err());
        assert!(ModelKey::new("p", "../m").is_err());
        assert!("p:m".parse::<ChunkKey>().is_err());
        assert!("p:m:0:1".parse::<ChunkKey>().is_err());
    }
}
