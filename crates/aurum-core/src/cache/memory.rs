use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::cache::{CacheBackend, CacheError, CacheFuture};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct MemoryEntry {
    payload: String,
    expire_at_ms: i64,
}

/// In-process cache over a lock-striped map.
///
/// Reads and writes on distinct keys do not contend; writers to one key race
/// last-write-wins.
pub struct MemoryCache {
    entries: DashMap<String, MemoryEntry>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn read(&self, key: &str) -> Option<String> {
        let now = self.clock.now().unix_millis();
        let entry = self.entries.get(key).map(|entry| entry.value().clone())?;
        if now < entry.expire_at_ms {
            return Some(entry.payload);
        }

        // A concurrent writer may have replaced the entry since the read.
        self.entries
            .remove_if(key, |_, current| current.expire_at_ms <= now);
        None
    }
}

impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Result<Option<String>, CacheError>> {
        Box::pin(async move { Ok(self.read(key)) })
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
                MemoryEntry {
                    payload,
                    expire_at_ms,
                },
            );
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            self.entries.remove(key);
            Ok(())
        })
    }

    fn clear(&self) -> CacheFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            self.entries.clear();
            Ok(())
        })
    }
}

pub(crate) fn expire_at(now_ms: i64, ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_add(ttl_ms)
}
