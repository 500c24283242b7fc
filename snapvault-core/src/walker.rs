//! Tree walking: discovers candidate files under the working root.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ignore::{normalize, IgnoreRules};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use walkdir::WalkDir;

/// Source of files a version control system knows about but does not track.
pub trait UntrackedFiles: Send + Sync {
    /// Root-relative paths of untracked files.
    fn untracked_files(&self, root: &Path) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct TreeWalker {
    root: PathBuf,
    rules: Arc<IgnoreRules>,
}

impl TreeWalker {
    pub fn new(root: PathBuf, rules: IgnoreRules) -> Self {
        Self {
            root,
            rules: Arc::new(rules),
        }
    }

    /// Default ignores, the root's ignore file, configured patterns, then `extra`.
    pub fn from_config(root: PathBuf, config: &Config, extra: &[String]) -> Result<Self> {
        let mut rules = IgnoreRules::with_defaults();
        let store_dir = Path::new(&config.store_dir);
        if store_dir.is_relative() {
            rules.extend(&[format!("/{}/", normalize(&config.store_dir))])?;
        }
        rules.extend_from_file(&root.join(&config.ignore_file))?;
        rules.extend(&config.ignore_patterns)?;
        rules.extend(extra)?;
        Ok(Self::new(root, rules))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rules(&self) -> &IgnoreRules {
        &self.rules
    }

    /// Sorted, de-duplicated root-relative paths of every regular file under
    /// `subpath` (or the whole root) that no ignore rule excludes.
    pub async fn walk(&self, subpath: Option<&str>) -> Result<Vec<String>> {
        let start = match subpath {
            Some(sub) => {
                let sub = check_relative(sub)?;
                self.root.join(sub)
            }
            None => self.root.clone(),
        };
        let root = self.root.clone();
        let rules = Arc::clone(&self.rules);

        tokio::task::spawn_blocking(move || walk_blocking(&root, &start, &rules)).await?
    }

    /// Merge externally supplied paths into a walk result, applying the same
    /// ignore rules and subpath restriction.
    pub fn merge(&self, files: Vec<String>, extra: Vec<String>, subpath: Option<&str>) -> Vec<String> {
        let prefix = subpath.map(normalize).filter(|p| !p.is_empty());
        let mut merged: BTreeSet<String> = files.into_iter().collect();

        for path in extra {
            let path = normalize(&path);
            if path.is_empty() || check_relative(&path).is_err() {
                continue;
            }
            if let Some(prefix) = &prefix {
                if path != *prefix && !path.starts_with(&format!("{prefix}/")) {
                    continue;
                }
            }
            if !self.rules.is_ignored(&path, false) {
                merged.insert(path);
            }
        }

        merged.into_iter().collect()
    }
}

fn walk_blocking(root: &Path, start: &Path, rules: &IgnoreRules) -> Result<Vec<String>> {
    let mut files = BTreeSet::new();
    if !start.exists() {
        return Ok(Vec::new());
    }

    let walker = WalkDir::new(start)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| match relative_path(root, entry.path()) {
            Some(rel) if !rel.is_empty() => !rules.is_ignored(&rel, entry.file_type().is_dir()),
            _ => true,
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(e) => {
                warn!("Skipping unreadable path during walk: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(rel) = relative_path(root, entry.path()) {
            if !rel.is_empty() {
                files.insert(rel);
            }
        }
    }

    Ok(files.into_iter().collect())
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(normalize(&rel.to_string_lossy()))
}

/// Reject absolute paths and any `..` component.
pub(crate) fn check_relative(path: &str) -> Result<&str> {
    let escapes = Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        return Err(Error::PathTraversal(path.to_string()));
    }
    Ok(path)
}
