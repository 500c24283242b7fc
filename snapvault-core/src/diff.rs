use crate::error::{Error, Result};
use crate::hash::{hash_bytes, ContentHash};
use crate::models::{Change, ChangeStatus, Snapshot, Tree};
use crate::object_store::ObjectStore;
use crate::writer::resolve_within_root;
use similar::TextDiff;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::warn;

const CONTEXT_LINES: usize = 3;

/// Classification of one path between two trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub path: String,
    pub status: ChangeStatus,
    pub old_hash: Option<ContentHash>,
    pub new_hash: Option<ContentHash>,
}

/// Paths only in `to` are added, only in `from` deleted, in both with a
/// different hash modified. Identical entries are omitted. Sorted by path.
pub fn classify(
    from: &BTreeMap<String, ContentHash>,
    to: &BTreeMap<String, ContentHash>,
) -> Vec<Delta> {
    let paths: BTreeSet<&String> = from.keys().chain(to.keys()).collect();
    let mut deltas = Vec::new();

    for path in paths {
        let old_hash = from.get(path).copied();
        let new_hash = to.get(path).copied();
        let status = match (old_hash, new_hash) {
            (None, Some(_)) => ChangeStatus::Added,
            (Some(_), None) => ChangeStatus::Deleted,
            (Some(a), Some(b)) if a != b => ChangeStatus::Modified,
            _ => continue,
        };
        deltas.push(Delta {
            path: path.clone(),
            status,
            old_hash,
            new_hash,
        });
    }

    deltas
}

pub fn tree_hashes(tree: &Tree) -> BTreeMap<String, ContentHash> {
    tree.iter().map(|(path, entry)| (path.clone(), entry.hash)).collect()
}

/// Unified patch between two texts with `a/` and `b/` headers.
pub fn unified_patch(path: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

/// Count added and deleted lines in a unified patch, ignoring the file
/// headers that precede the first hunk.
pub fn count_patch_lines(patch: &str) -> (usize, usize) {
    let mut additions = 0;
    let mut deletions = 0;
    let mut in_hunk = false;

    for line in patch.lines() {
        if line.starts_with("@@") {
            in_hunk = true;
            continue;
        }
        if !in_hunk {
            continue;
        }
        if line.starts_with('+') {
            additions += 1;
        } else if line.starts_with('-') {
            deletions += 1;
        }
    }

    (additions, deletions)
}

fn prefixed(content: &str, prefix: char) -> (String, usize) {
    let lines: Vec<String> = content.lines().map(|l| format!("{prefix}{l}")).collect();
    let count = lines.len();
    (lines.join("\n"), count)
}

pub fn added_change(path: &str, content: &str) -> Change {
    let (diff, additions) = prefixed(content, '+');
    Change {
        file: path.to_string(),
        status: ChangeStatus::Added,
        additions,
        deletions: 0,
        diff,
    }
}

pub fn deleted_change(path: &str, content: &str) -> Change {
    let (diff, deletions) = prefixed(content, '-');
    Change {
        file: path.to_string(),
        status: ChangeStatus::Deleted,
        additions: 0,
        deletions,
        diff,
    }
}

pub fn modified_change(path: &str, old: &str, new: &str) -> Change {
    let diff = unified_patch(path, old, new);
    let (additions, deletions) = count_patch_lines(&diff);
    Change {
        file: path.to_string(),
        status: ChangeStatus::Modified,
        additions,
        deletions,
        diff,
    }
}

/// Where the "new" side of a comparison reads its content from.
enum NewSide<'a> {
    Snapshot,
    WorkingTree(&'a BTreeMap<String, String>),
}

/// Builds change records between snapshots or against the live tree.
#[derive(Debug, Clone)]
pub struct Differ {
    objects: ObjectStore,
    max_file_size: u64,
}

impl Differ {
    pub fn new(objects: ObjectStore, max_file_size: u64) -> Self {
        Self {
            objects,
            max_file_size,
        }
    }

    pub async fn diff_snapshots(&self, from: &Snapshot, to: &Snapshot) -> Result<Vec<Change>> {
        let deltas = classify(&tree_hashes(&from.tree), &tree_hashes(&to.tree));
        self.render(deltas, NewSide::Snapshot).await
    }

    /// Compare a snapshot with the current content of `files` under `root`.
    ///
    /// Each file is read once; files that cannot be read are reported with a
    /// warning and left out of the comparison entirely.
    pub async fn diff_working_tree(
        &self,
        from: &Snapshot,
        root: &Path,
        files: Vec<String>,
    ) -> Result<Vec<Change>> {
        let mut current = BTreeMap::new();
        let mut contents = BTreeMap::new();
        let mut unreadable = BTreeSet::new();

        for rel in files {
            match read_working_file(root, &rel, self.max_file_size).await {
                Ok(bytes) => {
                    let hash = hash_bytes(&bytes);
                    if from.tree.get(&rel).map(|e| e.hash) != Some(hash) {
                        contents.insert(rel.clone(), String::from_utf8_lossy(&bytes).into_owned());
                    }
                    current.insert(rel, hash);
                }
                Err(e) => {
                    warn!("Skipping {} in working tree diff: {}", rel, e);
                    unreadable.insert(rel);
                }
            }
        }

        let mut previous = tree_hashes(&from.tree);
        previous.retain(|path, _| !unreadable.contains(path));

        let deltas = classify(&previous, &current);
        self.render(deltas, NewSide::WorkingTree(&contents)).await
    }

    async fn render(&self, deltas: Vec<Delta>, new_side: NewSide<'_>) -> Result<Vec<Change>> {
        let mut changes = Vec::with_capacity(deltas.len());

        for delta in deltas {
            let old = match &delta.old_hash {
                Some(hash) => Some(self.objects.read_to_string(hash).await?),
                None => None,
            };
            let new = match (&delta.new_hash, &new_side) {
                (Some(hash), NewSide::Snapshot) => Some(self.objects.read_to_string(hash).await?),
                (Some(_), NewSide::WorkingTree(contents)) => contents.get(&delta.path).cloned(),
                (None, _) => None,
            };

            let change = match (delta.status, old, new) {
                (ChangeStatus::Added, _, Some(new)) => added_change(&delta.path, &new),
                (ChangeStatus::Deleted, Some(old), _) => deleted_change(&delta.path, &old),
                (ChangeStatus::Modified, Some(old), Some(new)) => {
                    modified_change(&delta.path, &old, &new)
                }
                _ => continue,
            };
            changes.push(change);
        }

        Ok(changes)
    }
}

/// Read a working-tree file inside `root`, refusing anything over `max_size`.
async fn read_working_file(root: &Path, rel: &str, max_size: u64) -> Result<Vec<u8>> {
    let path = resolve_within_root(root, rel).await?;
    let too_big = |path: PathBuf| Error::SizeLimitExceeded {
        path,
        limit: max_size,
    };

    if tokio::fs::metadata(&path).await?.len() > max_size {
        return Err(too_big(path));
    }
    let bytes = tokio::fs::read(&path).await?;
    if bytes.len() as u64 > max_size {
        return Err(too_big(path));
    }
    Ok(bytes)
}
