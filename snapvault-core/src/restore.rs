//! Writing snapshot content back into the working tree.

use crate::error::{Error, Result};
use crate::hash::hash_file;
use crate::ignore::normalize;
use crate::manifest::atomic_write;
use crate::models::{Snapshot, TreeEntry};
use crate::object_store::ObjectStore;
use crate::walker::check_relative;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Restore the files of `snapshot` (optionally only those under
/// `path_filter`) into `root`. Files already matching the snapshot are left
/// alone, as are files the snapshot does not contain.
///
/// Returns the restored paths.
pub async fn restore_snapshot(
    objects: &ObjectStore,
    root: &Path,
    snapshot: &Snapshot,
    path_filter: Option<&str>,
) -> Result<Vec<String>> {
    let prefix = path_filter.map(normalize).filter(|p| !p.is_empty());
    let mut restored = Vec::new();

    for (rel, entry) in &snapshot.tree {
        if let Some(prefix) = &prefix {
            if rel != prefix && !rel.starts_with(&format!("{prefix}/")) {
                continue;
            }
        }

        let target = target_path(root, rel).await?;
        if let Ok(current) = hash_file(&target, u64::MAX).await {
            if current == entry.hash {
                debug!("{} already up to date", rel);
                continue;
            }
        }

        let content = objects.read(&entry.hash).await?;
        atomic_write(&target, &content).await?;
        apply_mode(&target, entry).await;
        restored.push(rel.clone());
    }

    info!(
        "Restored {} files from snapshot {}",
        restored.len(),
        snapshot.id
    );
    Ok(restored)
}

/// Create the parent directories of `rel` one component at a time, refusing
/// symlinks and anything that is not a directory before creating below it.
async fn target_path(root: &Path, rel: &str) -> Result<PathBuf> {
    let rel_path = Path::new(check_relative(rel)?);
    let mut components: Vec<_> = rel_path.components().collect();
    let file_name = components
        .pop()
        .ok_or_else(|| Error::PathTraversal(rel.to_string()))?;

    let mut current = root.to_path_buf();
    for component in components {
        current.push(component);
        match tokio::fs::symlink_metadata(&current).await {
            Ok(meta) if meta.file_type().is_dir() => {}
            Ok(_) => return Err(Error::PathTraversal(rel.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir(&current).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let target = current.join(file_name);
    if let Ok(meta) = tokio::fs::symlink_metadata(&target).await {
        if meta.file_type().is_symlink() {
            return Err(Error::PathTraversal(rel.to_string()));
        }
    }
    Ok(target)
}

#[cfg(unix)]
async fn apply_mode(path: &Path, entry: &TreeEntry) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(mode) = u32::from_str_radix(&entry.mode, 8) {
        let perms = std::fs::Permissions::from_mode(mode & 0o7777);
        if let Err(e) = tokio::fs::set_permissions(path, perms).await {
            debug!("Could not set mode on {}: {}", path.display(), e);
        }
    }
}

#[cfg(not(unix))]
async fn apply_mode(_path: &Path, _entry: &TreeEntry) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::models::Tree;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    async fn setup(files: &[(&str, &str)]) -> (TempDir, PathBuf, ObjectStore, Snapshot) {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        let objects = ObjectStore::new(root.join(".snapvault/objects"), 3);
        let mut tree = Tree::new();
        for (path, content) in files {
            let source = root.join(format!(".src-{}", path.replace('/', "_")));
            fs::write(&source, content).unwrap();
            let hash = hash_bytes(content.as_bytes());
            objects.store(&hash, &source).await.unwrap();
            fs::remove_file(&source).unwrap();
            tree.insert(
                path.to_string(),
                TreeEntry {
                    hash,
                    size: content.len() as u64,
                    mode: "100600".to_string(),
                },
            );
        }
        let snapshot = Snapshot {
            id: "s1".to_string(),
            time: Utc::now(),
            description: None,
            tags: Vec::new(),
            files_count: tree.len(),
            total_size: 0,
            tree,
        };
        (dir, root, objects, snapshot)
    }

    #[tokio::test]
    async fn test_restore_recreates_and_overwrites() {
        let (_dir, root, objects, snapshot) =
            setup(&[("a.txt", "hello"), ("src/deep/b.rs", "fn b() {}")]).await;
        fs::write(root.join("a.txt"), "changed").unwrap();
        fs::write(root.join("extra.txt"), "untouched").unwrap();

        let restored = restore_snapshot(&objects, &root, &snapshot, None)
            .await
            .unwrap();

        assert_eq!(restored, vec!["a.txt", "src/deep/b.rs"]);
        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "hello");
        assert_eq!(
            fs::read_to_string(root.join("src/deep/b.rs")).unwrap(),
            "fn b() {}"
        );
        assert_eq!(fs::read_to_string(root.join("extra.txt")).unwrap(), "untouched");

        let again = restore_snapshot(&objects, &root, &snapshot, None)
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_restore_with_filter() {
        let (_dir, root, objects, snapshot) =
            setup(&[("a.txt", "hello"), ("src/b.rs", "b"), ("srcx/c.rs", "c")]).await;

        let restored = restore_snapshot(&objects, &root, &snapshot, Some("src"))
            .await
            .unwrap();

        assert_eq!(restored, vec!["src/b.rs"]);
        assert!(!root.join("a.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restore_applies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, root, objects, snapshot) = setup(&[("secret.txt", "s")]).await;
        restore_snapshot(&objects, &root, &snapshot, None)
            .await
            .unwrap();

        let mode = fs::metadata(root.join("secret.txt")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restore_refuses_symlinked_parent() {
        let outside = TempDir::new().unwrap();
        let (_dir, root, objects, snapshot) =
            setup(&[("linked/sub/deeper/x.txt", "x")]).await;
        std::os::unix::fs::symlink(outside.path(), root.join("linked")).unwrap();

        let err = restore_snapshot(&objects, &root, &snapshot, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PathTraversal(_)));
        assert!(!outside.path().join("sub").exists());
        assert_eq!(fs::read_dir(outside.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_restore_refuses_file_as_parent() {
        let (_dir, root, objects, snapshot) = setup(&[("blocker/x.txt", "x")]).await;
        fs::write(root.join("blocker"), "not a dir").unwrap();

        let err = restore_snapshot(&objects, &root, &snapshot, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PathTraversal(_)));
        assert_eq!(fs::read_to_string(root.join("blocker")).unwrap(), "not a dir");
    }
}
