use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::DownloadError;
use crate::fs;

/// Original segment name → standardized local name, persisted as
/// `hls/ts_mapping.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameMapping {
    entries: BTreeMap<String, String>,
}

impl NameMapping {
    /// Load a mapping file; a missing file is an empty mapping.
    pub async fn load(path: &Path) -> Result<Self, DownloadError> {
        match tokio::fs::read(path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Self::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn insert(&mut self, original: impl Into<String>, local: impl Into<String>) {
        self.entries.insert(original.into(), local.into());
    }

    pub fn get(&self, original: &str) -> Option<&str> {
        self.entries.get(original).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries of `other` win over existing ones.
    pub fn extend(&mut self, other: &NameMapping) {
        for (original, local) in &other.entries {
            self.entries.insert(original.clone(), local.clone());
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), DownloadError> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| DownloadError::mapping_write(path, e.to_string()))?;
        fs::write_atomic(path, json)
            .await
            .map_err(|e| DownloadError::mapping_write(path, e.to_string()))
    }

    /// Merge `new_entries` into the mapping stored at `path` and return the
    /// merged result. Existing entries are never dropped.
    pub async fn merge_into(path: &Path, new_entries: &NameMapping) -> Result<NameMapping, DownloadError> {
        let mut merged = Self::load(path)
            .await
            .map_err(|e| DownloadError::mapping_write(path, e.to_string()))?;
        let before = merged.len();
        merged.extend(new_entries);
        merged.save(path).await?;
        debug!(
            path = %path.display(),
            before,
            after = merged.len(),
            "Name mapping merged"
        );
        Ok(merged)
    }
}
