//! Listing snapshots and resolving references to them.
//!
//! A reference is tried, in order, as:
//! 1. a relative index: `-1` is the most recent snapshot, `-2` the one before
//! 2. a relative duration (`2h`, `7d`, ...): the most recent snapshot taken at
//!    or before that long ago
//! 3. an exact snapshot id
//! 4. a substring of a snapshot description, most recent match first

use crate::duration::{looks_like_duration, parse_duration};
use crate::error::Result;
use crate::manifest::ManifestStore;
use crate::models::{ListFilter, Snapshot};
use chrono::{DateTime, Utc};
use std::cmp::Reverse;

#[derive(Debug, Clone)]
pub struct SnapshotRepository {
    manifests: ManifestStore,
}

impl SnapshotRepository {
    pub fn new(manifests: ManifestStore) -> Self {
        Self { manifests }
    }

    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    /// Committed snapshots, newest first. Corrupt or incomplete snapshots are
    /// left out rather than reported.
    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for id in self.manifests.list_ids().await? {
            if let Some(snapshot) = self.manifests.read(&id).await {
                snapshots.push(snapshot);
            }
        }

        if !filter.tags.is_empty() {
            snapshots.retain(|s| s.has_any_tag(&filter.tags));
        }
        snapshots.sort_by_key(|s| Reverse((s.time, s.id.clone())));
        if let Some(limit) = filter.limit {
            snapshots.truncate(limit);
        }
        Ok(snapshots)
    }

    pub async fn get_by_id(&self, id: &str) -> Option<Snapshot> {
        self.manifests.read(id).await
    }

    pub async fn get(&self, reference: &str) -> Result<Option<Snapshot>> {
        self.get_at(reference, Utc::now()).await
    }

    /// Resolve a reference with durations measured back from `now`.
    pub async fn get_at(&self, reference: &str, now: DateTime<Utc>) -> Result<Option<Snapshot>> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Ok(None);
        }

        if let Some(index) = parse_relative_index(reference) {
            let snapshots = self.list(&ListFilter::default()).await?;
            return Ok(index
                .checked_sub(1)
                .and_then(|i| snapshots.into_iter().nth(i)));
        }

        if looks_like_duration(reference) {
            let cutoff = parse_duration(reference)
                .ok()
                .and_then(|age| now.checked_sub_signed(age));
            if let Some(cutoff) = cutoff {
                let snapshots = self.list(&ListFilter::default()).await?;
                if let Some(found) = snapshots.into_iter().find(|s| s.time <= cutoff) {
                    return Ok(Some(found));
                }
            }
        }

        if let Some(snapshot) = self.get_by_id(reference).await {
            return Ok(Some(snapshot));
        }

        let snapshots = self.list(&ListFilter::default()).await?;
        Ok(snapshots.into_iter().find(|s| {
            s.description
                .as_deref()
                .is_some_and(|d| d.contains(reference))
        }))
    }
}

fn parse_relative_index(reference: &str) -> Option<usize> {
    let digits = reference.strip_prefix('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
