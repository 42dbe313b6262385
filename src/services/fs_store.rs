// src/services/fs_store.rs
//
// Filesystem-backed object store. Buckets are directories under the root,
// object metadata lives in a `.meta` sidecar next to each object. This is
// the bundled local backend; a cloud bucket sits behind the same trait in
// deployment.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{ObjectInfo, ObjectStore, StoreError};

const META_SUFFIX: &str = ".meta";

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(io_err)?;
        info!(root = %root.display(), "Initialized filesystem object store");
        Ok(Self { root })
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }

    fn meta_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.object_path(bucket, key).into_os_string();
        path.push(META_SUFFIX);
        PathBuf::from(path)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        fs::read(self.object_path(bucket, key)).map_err(io_err)
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        metadata: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        let path = self.object_path(bucket, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&path, data).map_err(io_err)?;
        fs::write(
            self.meta_path(bucket, key),
            serde_json::to_vec(metadata)?,
        )
        .map_err(io_err)?;
        debug!(bucket, key, size = data.len(), "Stored object");
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        // Missing objects are fine; delete is idempotent.
        let _ = fs::remove_file(self.object_path(bucket, key));
        let _ = fs::remove_file(self.meta_path(bucket, key));
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        let base = self.root.join(bucket);
        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(&base).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&base) {
                Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            if rel.ends_with(META_SUFFIX) || !rel.starts_with(prefix) {
                continue;
            }
            let meta = entry.metadata().map_err(|e| StoreError::Backend(e.to_string()))?;
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            objects.push(ObjectInfo {
                key: rel,
                size: meta.len(),
                modified,
            });
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn head_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<HashMap<String, String>, StoreError> {
        let path = self.meta_path(bucket, key);
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read(path).map_err(io_err)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn presigned_put_url(
        &self,
        bucket: &str,
        key: &str,
        expires_secs: u64,
    ) -> Result<String, StoreError> {
        let deadline = Utc::now().timestamp() + expires_secs as i64;
        let path = self.object_path(bucket, key);
        Ok(format!(
            "file://{}?expires={}",
            path.display(),
            deadline
        ))
    }
}

fn io_err(err: std::io::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl FsObjectStore {
    /// Root directory, exposed for diagnostics.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
