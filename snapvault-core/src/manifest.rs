//! Snapshot manifest persistence.
//!
//! A snapshot lives in `snapshots/<id>/` as two JSON documents: `tree.json`
//! (path to `{hash, size, mode}`) and `meta.json`. The tree is written first;
//! the meta file is what makes a snapshot visible, so a directory without a
//! valid meta file is treated as never committed.

use crate::error::{Error, Result};
use crate::models::{Snapshot, SnapshotMeta, Tree};
use crate::walker::check_relative;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

pub const META_FILE: &str = "meta.json";
pub const TREE_FILE: &str = "tree.json";

#[derive(Debug, Serialize, Deserialize)]
struct TreeManifest {
    files: Tree,
}

#[derive(Debug, Clone)]
pub struct ManifestStore {
    snapshots_dir: PathBuf,
}

impl ManifestStore {
    pub fn new(snapshots_dir: PathBuf) -> Self {
        Self { snapshots_dir }
    }

    pub fn snapshots_dir(&self) -> &Path {
        &self.snapshots_dir
    }

    pub fn snapshot_dir(&self, id: &str) -> Result<PathBuf> {
        if !is_valid_id(id) {
            return Err(Error::InvalidManifest(format!("invalid snapshot id '{id}'")));
        }
        Ok(self.snapshots_dir.join(id))
    }

    /// Persist both manifests of a snapshot.
    pub async fn write(&self, snapshot: &Snapshot) -> Result<()> {
        let dir = self.snapshot_dir(&snapshot.id)?;
        tokio::fs::create_dir_all(&dir).await?;

        let tree = serde_json::to_vec_pretty(&TreeManifest {
            files: snapshot.tree.clone(),
        })?;
        atomic_write(&dir.join(TREE_FILE), &tree).await?;

        let meta = serde_json::to_vec_pretty(&snapshot.meta())?;
        atomic_write(&dir.join(META_FILE), &meta).await?;
        Ok(())
    }

    /// Load and validate a snapshot's meta file. Any problem yields `None`.
    pub async fn read_meta(&self, id: &str) -> Option<SnapshotMeta> {
        let dir = self.snapshot_dir(id).ok()?;
        let meta: SnapshotMeta = read_json(&dir.join(META_FILE)).await?;
        match validate_meta(&meta, id) {
            Ok(()) => Some(meta),
            Err(e) => {
                debug!("Excluding snapshot {}: {}", id, e);
                None
            }
        }
    }

    /// Load and validate both manifests. Any problem yields `None`.
    pub async fn read(&self, id: &str) -> Option<Snapshot> {
        let meta = self.read_meta(id).await?;
        let dir = self.snapshot_dir(id).ok()?;
        let tree: TreeManifest = read_json(&dir.join(TREE_FILE)).await?;
        if let Err(e) = validate_tree(&tree.files) {
            debug!("Excluding snapshot {}: {}", id, e);
            return None;
        }
        Some(Snapshot::from_parts(meta, tree.files))
    }

    /// Names of every directory under `snapshots/`, committed or not.
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.snapshots_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
        Ok(ids)
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let dir = self.snapshot_dir(id)?;
        tokio::fs::remove_dir_all(dir).await?;
        Ok(())
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\'])
}

fn validate_meta(meta: &SnapshotMeta, dir_name: &str) -> Result<()> {
    if meta.id.is_empty() {
        return Err(Error::InvalidManifest("empty id".to_string()));
    }
    if meta.id != dir_name {
        return Err(Error::InvalidManifest(format!(
            "id '{}' does not match directory '{}'",
            meta.id, dir_name
        )));
    }
    Ok(())
}

fn validate_tree(tree: &Tree) -> Result<()> {
    for path in tree.keys() {
        if path.is_empty() {
            return Err(Error::InvalidManifest("empty path in tree".to_string()));
        }
        check_relative(path)?;
    }
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("Cannot read manifest {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Malformed manifest {}: {}", path.display(), e);
            None
        }
    }
}

/// Write via a temp file in the same directory, then rename into place.
pub(crate) async fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::InvalidManifest(format!("no parent for {}", path.display())))?;
    let temp_path = parent.join(format!(".tmp-{}", Uuid::new_v4().simple()));

    if let Err(e) = tokio::fs::write(&temp_path, content).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}
