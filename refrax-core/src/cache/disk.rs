//! Content-addressed local cache of derived artifacts.
//!
//! File names come from [`refrax_model::Fingerprint::local_file_name`] and
//! embed the safe-encoded stem of the original, so invalidation can match
//! every variant of one original by substring.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{RefraxError, Result};

#[derive(Debug)]
pub struct DiskCache {
    dir: PathBuf,
    /// Bytes written since startup plus whatever `init` found on disk. The
    /// smart-cache policy reads this to decide when to evict.
    tracked_bytes: AtomicU64,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tracked_bytes: AtomicU64::new(0),
        }
    }

    /// Seed the byte counter from the directory's current contents.
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let mut total = 0u64;
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(meta) = entry.metadata().await {
                if meta.is_file() {
                    total += meta.len();
                }
            }
        }
        self.tracked_bytes.store(total, Ordering::Relaxed);
        debug!(bytes = total, dir = %self.dir.display(), "disk cache initialized");
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn tracked_bytes(&self) -> u64 {
        self.tracked_bytes.load(Ordering::Relaxed)
    }

    pub async fn exists(&self, name: &str) -> bool {
        fs::try_exists(self.path_for(name)).await.unwrap_or(false)
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>> {
        fs::read(self.path_for(name)).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                RefraxError::NotFound(format!("cache entry {name}"))
            } else {
                RefraxError::Storage(format!("cache read {name}: {err}"))
            }
        })
    }

    /// Write an artifact, creating parent directories and bumping the byte
    /// counter. Last writer wins; consumers re-read on miss.
    pub async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        self.tracked_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(path)
    }

    pub async fn remove(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name);
        match fs::metadata(&path).await {
            Ok(meta) => {
                fs::remove_file(&path).await?;
                self.tracked_bytes
                    .fetch_sub(meta.len().min(self.tracked_bytes()), Ordering::Relaxed);
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete every cached variant whose file name contains the given
    /// safe-encoded stem. Returns how many files were removed.
    pub async fn delete_matching(&self, safe_stem: &str) -> Result<usize> {
        let mut removed = 0;
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.contains(safe_stem) {
                continue;
            }
            let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            match fs::remove_file(entry.path()).await {
                Ok(()) => {
                    removed += 1;
                    self.tracked_bytes
                        .fetch_sub(size.min(self.tracked_bytes()), Ordering::Relaxed);
                }
                Err(err) => {
                    warn!(name, %err, "failed to remove cached variant");
                }
            }
        }
        Ok(removed)
    }
}
