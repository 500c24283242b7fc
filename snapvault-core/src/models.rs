use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Path (relative to the working root, `/`-separated) to file entry.
pub type Tree = BTreeMap<String, TreeEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub hash: ContentHash,
    pub size: u64,
    /// Unix permission bits as an octal string, e.g. `"100644"`.
    pub mode: String,
}

/// Contents of a snapshot's `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub id: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub files_count: usize,
    pub total_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub time: DateTime<Utc>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub files_count: usize,
    pub total_size: u64,
    pub tree: Tree,
}

impl Snapshot {
    pub fn from_parts(meta: SnapshotMeta, tree: Tree) -> Self {
        Self {
            id: meta.id,
            time: meta.time,
            description: meta.description,
            tags: meta.tags,
            files_count: meta.files_count,
            total_size: meta.total_size,
            tree,
        }
    }

    pub fn meta(&self) -> SnapshotMeta {
        SnapshotMeta {
            id: self.id.clone(),
            time: self.time,
            description: self.description.clone(),
            tags: self.tags.clone(),
            files_count: self.files_count,
            total_size: self.total_size,
        }
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ChangeStatus::Added => "added",
            ChangeStatus::Modified => "modified",
            ChangeStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "added" => Some(ChangeStatus::Added),
            "modified" => Some(ChangeStatus::Modified),
            "deleted" => Some(ChangeStatus::Deleted),
            _ => None,
        }
    }
}

/// One file's difference between two trees, as handed to formatters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub file: String,
    pub status: ChangeStatus,
    pub additions: usize,
    pub deletions: usize,
    pub diff: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub file: String,
}

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

#[derive(Clone, Default)]
pub struct CreateOptions {
    pub path_filter: Option<String>,
    pub include_untracked: bool,
    pub ignore_patterns: Vec<String>,
    pub tags: Vec<String>,
    pub message: Option<String>,
    pub progress: Option<ProgressFn>,
    pub cancel: Option<CancellationToken>,
}

impl CreateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_path_filter(mut self, path: impl Into<String>) -> Self {
        self.path_filter = Some(path.into());
        self
    }

    pub fn with_ignore_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.ignore_patterns.push(pattern.into());
        self
    }

    pub fn with_untracked(mut self) -> Self {
        self.include_untracked = true;
        self
    }

    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub tags: Vec<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct CleanOptions {
    /// Human duration such as `7d`; snapshots older than this are deleted.
    pub older_than: Option<String>,
    pub keep_tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub snapshots_deleted: usize,
    pub objects_removed: usize,
    pub bytes_freed: u64,
}
