use crate::config::{Config, CONFIG_FILE_NAME, DEFAULT_STORE_DIR};
use crate::diff::Differ;
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::manifest::ManifestStore;
use crate::models::{Change, CleanOptions, CleanReport, CreateOptions, ListFilter, Snapshot};
use crate::object_store::ObjectStore;
use crate::repository::SnapshotRepository;
use crate::restore::restore_snapshot;
use crate::retention::Retention;
use crate::walker::{TreeWalker, UntrackedFiles};
use crate::writer::SnapshotWriter;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Entry point for every snapshot operation on one working root.
///
/// Concurrent `create` calls against the same store are not coordinated;
/// callers that share a store between writers must serialize them.
pub struct SnapshotManager {
    root: PathBuf,
    store_dir: PathBuf,
    config: Config,
    objects: ObjectStore,
    repository: SnapshotRepository,
    untracked: Option<Arc<dyn UntrackedFiles>>,
}

impl SnapshotManager {
    /// Open the store for `root`, reading `<root>/.snapvault/config.toml` if present.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let config_path = root
            .as_ref()
            .join(DEFAULT_STORE_DIR)
            .join(CONFIG_FILE_NAME);
        let config = Config::load(&config_path)?;
        Self::with_config(root, config).await
    }

    pub async fn with_config<P: AsRef<Path>>(root: P, config: Config) -> Result<Self> {
        let root = tokio::fs::canonicalize(root.as_ref()).await?;
        let store_dir = root.join(&config.store_dir);
        let objects = ObjectStore::new(store_dir.join("objects"), config.compression_level);
        let repository = SnapshotRepository::new(ManifestStore::new(store_dir.join("snapshots")));

        Ok(Self {
            root,
            store_dir,
            config,
            objects,
            repository,
            untracked: None,
        })
    }

    pub fn with_untracked_provider(mut self, provider: Arc<dyn UntrackedFiles>) -> Self {
        self.untracked = Some(provider);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// Capture the working tree and return the new snapshot's id.
    pub async fn create(&self, options: &CreateOptions) -> Result<String> {
        let writer = SnapshotWriter::new(
            self.root.clone(),
            self.config.clone(),
            self.objects.clone(),
            self.repository.manifests().clone(),
            self.untracked.clone(),
        );
        writer.create(options).await
    }

    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<Snapshot>> {
        self.repository.list(filter).await
    }

    /// Resolve a reference; `None` when nothing matches.
    pub async fn get(&self, reference: &str) -> Result<Option<Snapshot>> {
        self.repository.get(reference).await
    }

    pub async fn get_at(&self, reference: &str, now: DateTime<Utc>) -> Result<Option<Snapshot>> {
        self.repository.get_at(reference, now).await
    }

    pub async fn get_by_id(&self, id: &str) -> Option<Snapshot> {
        self.repository.get_by_id(id).await
    }

    pub async fn get_object_content(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        self.objects.read(hash).await
    }

    /// Changes from snapshot `from` to snapshot `to`, or to the working tree
    /// when `to` is `None`. Unresolvable references are an error.
    pub async fn diff(&self, from: &str, to: Option<&str>) -> Result<Vec<Change>> {
        let from = self.resolve(from).await?;
        let differ = Differ::new(self.objects.clone(), self.config.max_file_size);

        match to {
            Some(to) => {
                let to = self.resolve(to).await?;
                differ.diff_snapshots(&from, &to).await
            }
            None => {
                let walker = TreeWalker::from_config(self.root.clone(), &self.config, &[])?;
                let files = walker.walk(None).await?;
                differ.diff_working_tree(&from, &self.root, files).await
            }
        }
    }

    /// Apply the retention policy; returns the number of snapshots deleted.
    pub async fn clean(&self, options: &CleanOptions) -> Result<usize> {
        Ok(self.clean_with_report(options).await?.snapshots_deleted)
    }

    pub async fn clean_with_report(&self, options: &CleanOptions) -> Result<CleanReport> {
        self.clean_at(options, Utc::now()).await
    }

    pub async fn clean_at(&self, options: &CleanOptions, now: DateTime<Utc>) -> Result<CleanReport> {
        Retention::new(self.repository.clone(), self.objects.clone())
            .clean_at(options, now)
            .await
    }

    /// Write a snapshot's files back into the working root.
    pub async fn restore(&self, reference: &str, path_filter: Option<&str>) -> Result<Vec<String>> {
        let snapshot = self.resolve(reference).await?;
        restore_snapshot(&self.objects, &self.root, &snapshot, path_filter).await
    }

    /// Hashes referenced by a snapshot whose objects are missing or corrupt.
    pub async fn verify(&self, reference: &str) -> Result<Vec<ContentHash>> {
        let snapshot = self.resolve(reference).await?;
        let mut hashes: Vec<ContentHash> = snapshot.tree.values().map(|e| e.hash).collect();
        hashes.sort();
        hashes.dedup();

        let mut damaged = Vec::new();
        for hash in hashes {
            match self.objects.verify(&hash).await {
                Ok(true) => {}
                Ok(false) | Err(_) => damaged.push(hash),
            }
        }
        Ok(damaged)
    }

    async fn resolve(&self, reference: &str) -> Result<Snapshot> {
        self.repository
            .get(reference)
            .await?
            .ok_or_else(|| Error::SnapshotNotFound(reference.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::models::ChangeStatus;
    use chrono::Duration;
    use std::fs;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SnapshotManager) {
        let dir = TempDir::new().unwrap();
        let manager = SnapshotManager::open(dir.path()).await.unwrap();
        (dir, manager)
    }

    #[tokio::test]
    async fn test_working_tree_diff_scenario() {
        let (_dir, manager) = setup().await;
        let root = manager.root().to_path_buf();
        fs::write(root.join("a.txt"), "hello").unwrap();
        fs::write(root.join("b.txt"), "world").unwrap();

        let id = manager.create(&CreateOptions::new()).await.unwrap();
        let snapshot = manager.get_by_id(&id).await.unwrap();
        assert_eq!(snapshot.tree["a.txt"].hash, hash_bytes(b"hello"));
        assert_eq!(snapshot.tree["b.txt"].hash, hash_bytes(b"world"));

        fs::write(root.join("a.txt"), "hello!").unwrap();
        fs::remove_file(root.join("b.txt")).unwrap();

        let changes = manager.diff(&id, None).await.unwrap();

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].file, "a.txt");
        assert_eq!(changes[0].status, ChangeStatus::Modified);
        assert!(changes[0].diff.contains("-hello"));
        assert!(changes[0].diff.contains("+hello!"));
        assert_eq!((changes[0].additions, changes[0].deletions), (1, 1));
        assert_eq!(changes[1].file, "b.txt");
        assert_eq!(changes[1].status, ChangeStatus::Deleted);
        assert_eq!((changes[1].additions, changes[1].deletions), (0, 1));
    }

    #[tokio::test]
    async fn test_unchanged_tree_has_no_changes() {
        let (_dir, manager) = setup().await;
        fs::write(manager.root().join("a.txt"), "stable").unwrap();
        let id = manager.create(&CreateOptions::new()).await.unwrap();

        assert!(manager.diff(&id, None).await.unwrap().is_empty());

        fs::write(manager.root().join("new.txt"), "one\ntwo\n").unwrap();
        let changes = manager.diff(&id, None).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].status, ChangeStatus::Added);
        assert_eq!(changes[0].additions, 2);
    }

    #[tokio::test]
    async fn test_snapshot_to_snapshot_diff() {
        let (_dir, manager) = setup().await;
        let root = manager.root().to_path_buf();
        fs::write(root.join("keep.txt"), "same").unwrap();
        fs::write(root.join("edit.txt"), "v1\n").unwrap();
        fs::write(root.join("drop.txt"), "bye\n").unwrap();
        let first = manager.create(&CreateOptions::new()).await.unwrap();

        fs::write(root.join("edit.txt"), "v2\n").unwrap();
        fs::remove_file(root.join("drop.txt")).unwrap();
        fs::write(root.join("add.txt"), "hi\n").unwrap();
        let second = manager.create(&CreateOptions::new()).await.unwrap();

        // working tree is irrelevant for snapshot-to-snapshot diffs
        fs::write(root.join("keep.txt"), "changed later").unwrap();

        let changes = manager.diff(&first, Some(&second)).await.unwrap();
        let summary: Vec<(&str, ChangeStatus)> = changes
            .iter()
            .map(|c| (c.file.as_str(), c.status))
            .collect();

        assert_eq!(
            summary,
            vec![
                ("add.txt", ChangeStatus::Added),
                ("drop.txt", ChangeStatus::Deleted),
                ("edit.txt", ChangeStatus::Modified),
            ]
        );
    }

    #[tokio::test]
    async fn test_diff_unknown_reference_fails() {
        let (_dir, manager) = setup().await;
        fs::write(manager.root().join("a.txt"), "a").unwrap();
        let id = manager.create(&CreateOptions::new()).await.unwrap();

        let err = manager.diff("no-such-snapshot", None).await.unwrap_err();
        assert!(matches!(err, Error::SnapshotNotFound(_)));

        let err = manager.diff(&id, Some("-5")).await.unwrap_err();
        assert!(matches!(err, Error::SnapshotNotFound(_)));

        assert!(manager.get("no-such-snapshot").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relative_references() {
        let (_dir, manager) = setup().await;
        fs::write(manager.root().join("a.txt"), "1").unwrap();
        let s1 = manager
            .create(&CreateOptions::new().with_message("first pass"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        fs::write(manager.root().join("a.txt"), "2").unwrap();
        let s2 = manager
            .create(&CreateOptions::new().with_message("second pass"))
            .await
            .unwrap();

        let latest = manager.get("-1").await.unwrap().unwrap();
        let previous = manager.get("-2").await.unwrap().unwrap();
        assert_eq!(latest.id, s2);
        assert_eq!(previous.id, s1);

        assert_eq!(manager.get("pass").await.unwrap().unwrap().id, s2);
        assert_eq!(manager.get("first").await.unwrap().unwrap().id, s1);

        let later = Utc::now() + Duration::hours(3);
        assert_eq!(manager.get_at("2h", later).await.unwrap().unwrap().id, s2);
    }

    #[tokio::test]
    async fn test_clean_keeps_referenced_objects() {
        let (_dir, manager) = setup().await;
        let root = manager.root().to_path_buf();
        fs::write(root.join("shared.txt"), "shared").unwrap();
        fs::write(root.join("old.txt"), "old only").unwrap();
        manager
            .create(&CreateOptions::new().with_tag("scratch"))
            .await
            .unwrap();

        fs::remove_file(root.join("old.txt")).unwrap();
        fs::write(root.join("new.txt"), "new only").unwrap();
        let kept = manager
            .create(&CreateOptions::new().with_tag("release"))
            .await
            .unwrap();

        let options = CleanOptions {
            older_than: Some("1d".to_string()),
            keep_tags: vec!["release".to_string()],
        };
        let report = manager
            .clean_at(&options, Utc::now() + Duration::days(2))
            .await
            .unwrap();

        assert_eq!(report.snapshots_deleted, 1);
        assert_eq!(report.objects_removed, 1);

        let survivors = manager.list(&ListFilter::default()).await.unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].id, kept);
        for entry in survivors[0].tree.values() {
            assert!(manager.objects().has_object(&entry.hash).await);
        }
        assert!(!manager.objects().has_object(&hash_bytes(b"old only")).await);

        assert_eq!(manager.clean(&CleanOptions::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_restore_and_verify() {
        let (_dir, manager) = setup().await;
        let root = manager.root().to_path_buf();
        fs::write(root.join("a.txt"), "original").unwrap();
        let id = manager.create(&CreateOptions::new()).await.unwrap();

        fs::write(root.join("a.txt"), "clobbered").unwrap();
        let restored = manager.restore("-1", None).await.unwrap();
        assert_eq!(restored, vec!["a.txt"]);
        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "original");
        assert!(manager.diff(&id, None).await.unwrap().is_empty());

        assert!(manager.verify(&id).await.unwrap().is_empty());
        fs::remove_file(manager.objects().object_path(&hash_bytes(b"original"))).unwrap();
        assert_eq!(
            manager.verify(&id).await.unwrap(),
            vec![hash_bytes(b"original")]
        );

        assert!(matches!(
            manager.restore("missing", None).await.unwrap_err(),
            Error::SnapshotNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_open_reads_config() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join(".snapvault");
        fs::create_dir_all(&store).unwrap();
        fs::write(
            store.join("config.toml"),
            "max_file_size = 4\nignore_patterns = [\"*.tmp\"]\n",
        )
        .unwrap();
        fs::write(dir.path().join("ok.txt"), "ok").unwrap();
        fs::write(dir.path().join("big.txt"), "too large").unwrap();
        fs::write(dir.path().join("x.tmp"), "tmp").unwrap();

        let manager = SnapshotManager::open(dir.path()).await.unwrap();
        assert_eq!(manager.config().max_file_size, 4);

        let id = manager.create(&CreateOptions::new()).await.unwrap();
        let snapshot = manager.get_by_id(&id).await.unwrap();
        assert_eq!(snapshot.tree.keys().collect::<Vec<_>>(), vec!["ok.txt"]);
    }

    #[tokio::test]
    async fn test_object_content_roundtrip() {
        let (_dir, manager) = setup().await;
        let content = "first line\nsecond line\n";
        fs::write(manager.root().join("doc.md"), content).unwrap();
        let id = manager.create(&CreateOptions::new()).await.unwrap();

        let snapshot = manager.get_by_id(&id).await.unwrap();
        let bytes = manager
            .get_object_content(&snapshot.tree["doc.md"].hash)
            .await
            .unwrap();
        assert_eq!(bytes, content.as_bytes());
    }
}
