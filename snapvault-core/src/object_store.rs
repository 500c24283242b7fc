//! Content-addressable object store
//!
//! Each unique file content is stored once, zstd-compressed, at
//! `objects/<first-2-hex>/<full-hex>`. Writes go to a uniquely named temp
//! file in the shard directory and are renamed into place, so concurrent
//! stores of different (or identical) digests never observe partial objects.

use crate::error::{Error, Result};
use crate::hash::{hash_bytes, ContentHash};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ObjectStore {
    objects_dir: PathBuf,
    compression_level: i32,
}

impl ObjectStore {
    /// Open the store rooted at `objects_dir`. Directories are created lazily.
    pub fn new(objects_dir: PathBuf, compression_level: i32) -> Self {
        Self {
            objects_dir,
            compression_level,
        }
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    pub fn object_path(&self, hash: &ContentHash) -> PathBuf {
        self.objects_dir.join(hash.prefix()).join(hash.to_hex())
    }

    pub async fn has_object(&self, hash: &ContentHash) -> bool {
        tokio::fs::try_exists(self.object_path(hash))
            .await
            .unwrap_or(false)
    }

    /// Compress `source` into the store under `hash`.
    ///
    /// Returns `false` without touching the source when the object already
    /// exists. The caller is responsible for `hash` matching the content.
    pub async fn store(&self, hash: &ContentHash, source: &Path) -> Result<bool> {
        if self.has_object(hash).await {
            return Ok(false);
        }

        let object_path = self.object_path(hash);
        let shard_dir = self.objects_dir.join(hash.prefix());
        tokio::fs::create_dir_all(&shard_dir).await?;

        let temp_path = shard_dir.join(format!(".tmp-{}", Uuid::new_v4().simple()));
        let source = source.to_path_buf();
        let level = self.compression_level;

        tokio::task::spawn_blocking(move || -> Result<()> {
            let write_result = compress_file(&source, &temp_path, level);
            if let Err(e) = write_result {
                let _ = fs::remove_file(&temp_path);
                return Err(e);
            }
            fs::rename(&temp_path, &object_path).map_err(|e| {
                let _ = fs::remove_file(&temp_path);
                Error::Io(e)
            })
        })
        .await??;

        debug!("Stored object {}", hash);
        Ok(true)
    }

    /// Decompress and return an object's original bytes.
    pub async fn read(&self, hash: &ContentHash) -> Result<Vec<u8>> {
        let path = self.object_path(hash);
        let missing = hash.to_hex();

        tokio::task::spawn_blocking(move || {
            let file = match fs::File::open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::ObjectNotFound(missing));
                }
                Err(e) => return Err(Error::Io(e)),
            };
            Ok(zstd::stream::decode_all(BufReader::new(file))?)
        })
        .await?
    }

    /// Object content as text; invalid UTF-8 sequences are replaced.
    pub async fn read_to_string(&self, hash: &ContentHash) -> Result<String> {
        let bytes = self.read(hash).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Recompute the digest of a stored object.
    pub async fn verify(&self, hash: &ContentHash) -> Result<bool> {
        let content = self.read(hash).await?;
        Ok(hash_bytes(&content) == *hash)
    }

    /// Every well-formed object on disk with its compressed size.
    ///
    /// Unreadable shard directories and stray files are skipped.
    pub async fn list(&self) -> Result<Vec<(ContentHash, u64)>> {
        let objects_dir = self.objects_dir.clone();

        tokio::task::spawn_blocking(move || {
            let mut objects = Vec::new();
            if !objects_dir.exists() {
                return objects;
            }

            for entry in WalkDir::new(&objects_dir)
                .min_depth(2)
                .max_depth(2)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str() else {
                    continue;
                };
                let Ok(hash) = name.parse::<ContentHash>() else {
                    continue;
                };
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                objects.push((hash, size));
            }
            objects
        })
        .await
        .map_err(Error::from)
    }

    pub async fn remove(&self, hash: &ContentHash) -> Result<()> {
        tokio::fs::remove_file(self.object_path(hash)).await?;
        Ok(())
    }

    /// Remove shard directories left empty by a sweep.
    pub async fn prune_empty_shards(&self) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.objects_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            // fails harmlessly on non-empty directories
            let _ = tokio::fs::remove_dir(entry.path()).await;
        }
    }
}

fn compress_file(source: &Path, dest: &Path, level: i32) -> Result<()> {
    let input = BufReader::new(fs::File::open(source)?);
    let output = fs::File::create(dest)?;
    let mut writer = BufWriter::new(output);
    zstd::stream::copy_encode(input, &mut writer, level)?;
    writer.flush()?;
    let output = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    output.sync_all()?;
    Ok(())
}
