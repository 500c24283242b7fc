//! Snapshot creation.
//!
//! `create` runs a fixed pipeline: discover candidate files, hash and store
//! them in bounded concurrent batches, aggregate the per-file results into a
//! tree, then persist the manifests. Failures on individual files are logged
//! and the file is left out; they never abort the snapshot.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hash::hash_file;
use crate::manifest::ManifestStore;
use crate::models::{CreateOptions, Progress, ProgressFn, Snapshot, Tree, TreeEntry};
use crate::object_store::ObjectStore;
use crate::walker::{TreeWalker, UntrackedFiles};
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct SnapshotWriter {
    root: PathBuf,
    config: Config,
    objects: ObjectStore,
    manifests: ManifestStore,
    untracked: Option<Arc<dyn UntrackedFiles>>,
}

/// Shared state for the per-file tasks of one `create` call.
struct FileContext {
    root: PathBuf,
    objects: ObjectStore,
    max_file_size: u64,
    total: usize,
    progress: Option<ProgressFn>,
    completed: Mutex<usize>,
}

impl SnapshotWriter {
    /// `root` must already be canonical.
    pub fn new(
        root: PathBuf,
        config: Config,
        objects: ObjectStore,
        manifests: ManifestStore,
        untracked: Option<Arc<dyn UntrackedFiles>>,
    ) -> Self {
        Self {
            root,
            config,
            objects,
            manifests,
            untracked,
        }
    }

    pub async fn create(&self, options: &CreateOptions) -> Result<String> {
        let now = Utc::now();
        let id = generate_id(now);

        let files = self.discover(options).await?;
        debug!("Snapshot {}: {} candidate files", id, files.len());

        let entries = self.process(files, options).await?;
        let snapshot = aggregate(id.clone(), now, options, entries);

        self.manifests.write(&snapshot).await?;
        info!(
            "Created snapshot {} ({} files, {} bytes)",
            id, snapshot.files_count, snapshot.total_size
        );
        Ok(id)
    }

    /// Walk the root (or the filtered subtree) and merge untracked files.
    pub async fn discover(&self, options: &CreateOptions) -> Result<Vec<String>> {
        let walker =
            TreeWalker::from_config(self.root.clone(), &self.config, &options.ignore_patterns)?;
        let subpath = options.path_filter.as_deref();
        let files = walker.walk(subpath).await?;

        if !options.include_untracked {
            return Ok(files);
        }
        match &self.untracked {
            Some(provider) => match provider.untracked_files(&self.root) {
                Ok(extra) => Ok(walker.merge(files, extra, subpath)),
                Err(e) => {
                    warn!("Untracked file listing failed, continuing without it: {}", e);
                    Ok(files)
                }
            },
            None => Ok(files),
        }
    }

    /// Hash and store files in sequential batches of concurrent tasks.
    pub async fn process(
        &self,
        files: Vec<String>,
        options: &CreateOptions,
    ) -> Result<Vec<(String, TreeEntry)>> {
        let ctx = Arc::new(FileContext {
            root: self.root.clone(),
            objects: self.objects.clone(),
            max_file_size: self.config.max_file_size,
            total: files.len(),
            progress: options.progress.clone(),
            completed: Mutex::new(0),
        });
        let mut entries = Vec::with_capacity(files.len());

        for batch in files.chunks(self.config.batch_size.max(1)) {
            if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                return Err(Error::Cancelled);
            }

            let mut tasks = JoinSet::new();
            for rel in batch {
                let ctx = Arc::clone(&ctx);
                let rel = rel.clone();
                tasks.spawn(async move {
                    let result = process_file(&ctx, &rel).await;
                    (rel, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let (rel, result) = joined?;
                match result {
                    Ok(Some(entry)) => entries.push((rel, entry)),
                    Ok(None) => debug!("Skipping non-regular file {}", rel),
                    Err(e) if e.is_recoverable_file_error() => {
                        warn!("Skipping {}: {}", rel, e)
                    }
                    Err(e) => warn!("Failed to snapshot {}: {}", rel, e),
                }
            }
        }

        Ok(entries)
    }
}

async fn process_file(ctx: &FileContext, rel: &str) -> Result<Option<TreeEntry>> {
    let path = resolve_within_root(&ctx.root, rel).await?;

    let metadata = tokio::fs::symlink_metadata(&path).await?;
    if !metadata.file_type().is_file() {
        return Ok(None);
    }
    if metadata.len() > ctx.max_file_size {
        return Err(Error::SizeLimitExceeded {
            path,
            limit: ctx.max_file_size,
        });
    }

    let hash = hash_file(&path, ctx.max_file_size).await?;
    ctx.objects.store(&hash, &path).await?;

    if let Some(progress) = &ctx.progress {
        let mut completed = ctx.completed.lock().unwrap_or_else(|e| e.into_inner());
        *completed += 1;
        progress(Progress {
            current: *completed,
            total: ctx.total,
            file: rel.to_string(),
        });
    }

    Ok(Some(TreeEntry {
        hash,
        size: metadata.len(),
        mode: file_mode(&metadata),
    }))
}

/// Join `rel` onto `root`, rejecting anything that resolves outside it.
pub(crate) async fn resolve_within_root(root: &Path, rel: &str) -> Result<PathBuf> {
    crate::walker::check_relative(rel)?;
    let path = root.join(rel);
    let resolved = tokio::fs::canonicalize(&path).await?;
    if !resolved.starts_with(root) {
        return Err(Error::PathTraversal(rel.to_string()));
    }
    Ok(path)
}

fn aggregate(
    id: String,
    time: DateTime<Utc>,
    options: &CreateOptions,
    entries: Vec<(String, TreeEntry)>,
) -> Snapshot {
    let tree: Tree = entries.into_iter().collect();
    let total_size = tree.values().map(|e| e.size).sum();

    let mut tags = Vec::new();
    for tag in &options.tags {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }

    Snapshot {
        id,
        time,
        description: options.message.clone(),
        tags,
        files_count: tree.len(),
        total_size,
        tree,
    }
}

/// Timestamp prefix keeps ids sortable; the random suffix keeps them unique.
pub fn generate_id(time: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", time.format("%Y%m%dT%H%M%S%3fZ"), &suffix[..8])
}

#[cfg(unix)]
pub(crate) fn file_mode(metadata: &Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:o}", metadata.permissions().mode())
}

#[cfg(not(unix))]
pub(crate) fn file_mode(metadata: &Metadata) -> String {
    if metadata.permissions().readonly() {
        "100444".to_string()
    } else {
        "100644".to_string()
    }
}
