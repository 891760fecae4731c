use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::cache::memory::expire_at;
use crate::cache::{CacheBackend, CacheError, CacheFuture};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    payload: String,
    expire_at_ms: i64,
}

/// Cache persisted as a single JSON document, rewritten after every mutation.
///
/// Entries live in a lock-striped map, so operations on distinct keys never
/// wait on each other or on disk I/O. Each mutation bumps a generation
/// counter; one writer at a time snapshots the map and replaces the file
/// through a staging file, and keeps going until the generation it wrote is
/// the latest. A mutation that finds a write in progress leaves its
/// generation to that writer instead of queueing behind it.
pub struct FileCache {
    path: PathBuf,
    entries: DashMap<String, FileEntry>,
    generation: AtomicU64,
    writer: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl FileCache {
    /// Load `path` if it exists; a missing file starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Self::open_with_clock(path, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        let path = path.into();
        let entries: HashMap<String, FileEntry> = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|error| {
                tracing::warn!(path = %path.display(), %error, "discarding unreadable cache file");
                HashMap::new()
            }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(error) => return Err(error.into()),
        };

        Ok(Self {
            path,
            entries: entries.into_iter().collect(),
            generation: AtomicU64::new(0),
            writer: Mutex::new(()),
            clock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot(&self) -> HashMap<String, FileEntry> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Record a mutation and make sure some writer persists it.
    async fn persist(&self) -> Result<(), CacheError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        loop {
            let Ok(guard) = self.writer.try_lock() else {
                // The active writer re-checks the generation once it is done.
                return Ok(());
            };
            let generation = self.generation.load(Ordering::SeqCst);
            let snapshot = self.snapshot();
            let written = self.write_file(&snapshot).await;
            drop(guard);
            written?;

            if self.generation.load(Ordering::SeqCst) == generation {
                return Ok(());
            }
        }
    }

    async fn write_file(&self, entries: &HashMap<String, FileEntry>) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec(entries)?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        Ok(())
    }
}

impl CacheBackend for FileCache {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Result<Option<String>, CacheError>> {
        Box::pin(async move {
            let now = self.clock.now().unix_millis();
            let Some(entry) = self.entries.get(key).map(|entry| entry.value().clone()) else {
                return Ok(None);
            };
            if now < entry.expire_at_ms {
                return Ok(Some(entry.payload));
            }

            let evicted = self
                .entries
                .remove_if(key, |_, current| current.expire_at_ms <= now)
                .is_some();
            if evicted {
                self.persist().await?;
            }
            Ok(None)
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        payload: String,
        ttl: Duration,
    ) -> CacheFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let expire_at_ms = expire_at(self.clock.now().unix_millis(), ttl);
            self.entries.insert(
                key.to_owned(),
                FileEntry {
                    payload,
                    expire_at_ms,
                },
            );
            self.persist().await
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            if self.entries.remove(key).is_some() {
                self.persist().await?;
            }
            Ok(())
        })
    }

    fn clear(&self) -> CacheFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            self.entries.clear();
            self.persist().await
        })
    }
}
