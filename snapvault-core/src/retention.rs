//! Retention policy and orphan sweep.

use crate::duration::parse_duration;
use crate::error::Result;
use crate::hash::ContentHash;
use crate::models::{CleanOptions, CleanReport, ListFilter, Snapshot};
use crate::object_store::ObjectStore;
use crate::repository::SnapshotRepository;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Retention {
    repository: SnapshotRepository,
    objects: ObjectStore,
}

impl Retention {
    pub fn new(repository: SnapshotRepository, objects: ObjectStore) -> Self {
        Self {
            repository,
            objects,
        }
    }

    /// Delete snapshots older than `options.older_than` (relative to `now`)
    /// that carry none of `options.keep_tags`, then sweep orphaned objects.
    pub async fn clean_at(&self, options: &CleanOptions, now: DateTime<Utc>) -> Result<CleanReport> {
        let max_age = options
            .older_than
            .as_deref()
            .map(parse_duration)
            .transpose()?;
        let mut report = CleanReport::default();

        if let Some(max_age) = max_age {
            let snapshots = self.repository.list(&ListFilter::default()).await?;
            for snapshot in snapshots {
                if !is_expired(&snapshot, now, max_age, &options.keep_tags) {
                    continue;
                }
                match self.repository.manifests().remove(&snapshot.id).await {
                    Ok(()) => {
                        info!("Deleted snapshot {}", snapshot.id);
                        report.snapshots_deleted += 1;
                    }
                    Err(e) => warn!("Failed to delete snapshot {}: {}", snapshot.id, e),
                }
            }
        }

        let (removed, freed) = self.sweep().await?;
        report.objects_removed = removed;
        report.bytes_freed = freed;
        Ok(report)
    }

    /// Remove every object not referenced by a listed snapshot.
    ///
    /// Returns the number of objects removed and their compressed size.
    pub async fn sweep(&self) -> Result<(usize, u64)> {
        let survivors = self.repository.list(&ListFilter::default()).await?;
        let referenced = referenced_hashes(&survivors);

        let mut removed = 0;
        let mut freed = 0;
        for (hash, size) in self.objects.list().await? {
            if referenced.contains(&hash) {
                continue;
            }
            match self.objects.remove(&hash).await {
                Ok(()) => {
                    debug!("Swept object {}", hash);
                    removed += 1;
                    freed += size;
                }
                Err(e) => debug!("Could not remove object {}: {}", hash, e),
            }
        }
        self.objects.prune_empty_shards().await;

        Ok((removed, freed))
    }
}

fn is_expired(
    snapshot: &Snapshot,
    now: DateTime<Utc>,
    max_age: chrono::Duration,
    keep_tags: &[String],
) -> bool {
    now - snapshot.time > max_age && !snapshot.has_any_tag(keep_tags)
}

pub fn referenced_hashes(snapshots: &[Snapshot]) -> HashSet<ContentHash> {
    snapshots
        .iter()
        .flat_map(|s| s.tree.values().map(|entry| entry.hash))
        .collect()
}
