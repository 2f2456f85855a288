//! Filesystem-backed object store for local deployments and tests.
//!
//! Keys map onto paths under a root directory. Content type and custom
//! metadata live in a JSON sidecar next to each object, so the capability
//! set matches the remote adapter exactly.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::error::{RefraxError, Result};

use super::{ObjectEntry, ObjectMeta, ObjectStore};

const SIDECAR_SUFFIX: &str = ".meta.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    content_type: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        for component in relative.components() {
            if matches!(component, Component::ParentDir | Component::RootDir) {
                return Err(RefraxError::InvalidRequest(format!(
                    "illegal object key: {key}"
                )));
            }
        }
        Ok(self.root.join(relative))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    async fn read_sidecar(path: &Path) -> Sidecar {
        match fs::read(Self::sidecar_path(path)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => Sidecar::default(),
        }
    }

    fn collect<'a>(
        &'a self,
        dir: &'a Path,
        out: &'a mut Vec<ObjectEntry>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut entries = match fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(_) => return Ok(()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    self.collect(&path, out).await?;
                } else if !path
                    .to_string_lossy()
                    .ends_with(SIDECAR_SUFFIX)
                {
                    let meta = entry.metadata().await?;
                    let key = path
                        .strip_prefix(&self.root)
                        .map_err(|_| {
                            RefraxError::Internal("cache path outside root".to_string())
                        })?
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    out.push(ObjectEntry {
                        key,
                        size: meta.len(),
                    });
                }
            }
            Ok(())
        })
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn head(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                RefraxError::NotFound(format!("object {key}"))
            } else {
                RefraxError::Storage(format!("read {key}: {err}"))
            }
        })
    }

    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;

        let sidecar = Sidecar {
            content_type: Some(content_type.to_string()),
            metadata: metadata.clone(),
        };
        fs::write(
            Self::sidecar_path(&path),
            serde_json::to_vec(&sidecar)?,
        )
        .await?;

        debug!(key, size = bytes.len(), "object stored locally");
        Ok(())
    }

    async fn head_meta(&self, key: &str) -> Result<Option<ObjectMeta>> {
        let path = self.path_for(key)?;
        let meta = match fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(RefraxError::Storage(format!("stat {key}: {err}"))),
        };
        let sidecar = Self::read_sidecar(&path).await;
        let last_modified = meta
            .modified()
            .ok()
            .map(DateTime::<Utc>::from);

        Ok(Some(ObjectMeta {
            size: meta.len(),
            last_modified,
            content_type: sidecar.content_type,
            metadata: sidecar.metadata,
        }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>> {
        let mut all = Vec::new();
        let root = self.root.clone();
        self.collect(&root, &mut all).await?;
        let mut matched: Vec<ObjectEntry> = all
            .into_iter()
            .filter(|entry| entry.key.starts_with(prefix))
            .collect();
        matched.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(matched)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                let _ = fs::remove_file(Self::sidecar_path(&path)).await;
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(RefraxError::Storage(format!("delete {key}: {err}"))),
        }
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for key in keys {
            if self.head(key).await? {
                self.delete(key).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with_origin(origin: &str) -> HashMap<String, String> {
        HashMap::from([(
            super::super::METADATA_ORIGINAL_PATH.to_string(),
            origin.to_string(),
        )])
    }

    #[tokio::test]
    async fn put_get_head_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        assert!(!store.head("public/a.jpg").await.unwrap());
        store
            .put("public/a.jpg", b"bytes", "image/jpeg", &HashMap::new())
            .await
            .unwrap();
        assert!(store.head("public/a.jpg").await.unwrap());
        assert_eq!(store.get("public/a.jpg").await.unwrap(), b"bytes");

        let meta = store.head_meta("public/a.jpg").await.unwrap().unwrap();
        assert_eq!(meta.size, 5);
        assert_eq!(meta.content_type.as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        match store.get("public/missing.png").await {
            Err(RefraxError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
        assert!(store.head_meta("public/missing.png").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_hides_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store
            .put("cache/aa.jpeg", b"1", "image/jpeg", &meta_with_origin("x.jpg"))
            .await
            .unwrap();
        store
            .put("cache/bb.webp", b"22", "image/webp", &meta_with_origin("y.jpg"))
            .await
            .unwrap();
        store
            .put("public/x.jpg", b"333", "image/jpeg", &HashMap::new())
            .await
            .unwrap();

        let cached = store.list("cache/").await.unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0].key, "cache/aa.jpeg");
        assert_eq!(cached[1].size, 2);
    }

    #[tokio::test]
    async fn delete_many_reports_only_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        store
            .put("cache/one", b"1", "application/octet-stream", &HashMap::new())
            .await
            .unwrap();
        let deleted = store
            .delete_many(&["cache/one".to_string(), "cache/two".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        // Deleting again is a no-op.
        let deleted = store
            .delete_many(&["cache/one".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 0);
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert!(store.head("../escape").await.is_err());
    }
}
