use std::collections::HashSet;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::{CacheBackend, CacheError, CacheFuture};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

/// Remote invalidations that could not be delivered while the remote was down.
#[derive(Debug, Default)]
struct PendingInvalidations {
    cleared: bool,
    keys: HashSet<String>,
}

impl PendingInvalidations {
    fn is_empty(&self) -> bool {
        !self.cleared && self.keys.is_empty()
    }

    fn merge(&mut self, other: Self) {
        self.cleared |= other.cleared;
        self.keys.extend(other.keys);
    }
}

/// Local-first cache with a shared remote layer; never fails.
///
/// Reads are served by the local layer and fall through to the remote layer
/// only on a local miss. Writes always land in the local layer and are copied
/// to the remote layer on a best-effort basis. A remote failure trips a
/// breaker so the remote layer is skipped until the cool-down elapses.
///
/// Every remote write, delete or clear that is skipped or fails is remembered.
/// Before the remote layer is used again those keys are deleted from it (and
/// it is flushed if a clear was missed), so entries overwritten or cleared
/// during an outage never come back.
pub struct LayeredCache {
    remote: Option<Arc<dyn CacheBackend>>,
    local: Arc<dyn CacheBackend>,
    breaker: CircuitBreaker,
    pending: Mutex<PendingInvalidations>,
}

impl LayeredCache {
    pub fn new(local: Arc<dyn CacheBackend>) -> Self {
        Self {
            remote: None,
            local,
            breaker: CircuitBreaker::new(
                "remote-cache",
                CircuitBreakerConfig::single_failure(Duration::from_secs(30)),
            ),
            pending: Mutex::new(PendingInvalidations::default()),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn CacheBackend>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.breaker = CircuitBreaker::new(
            "remote-cache",
            CircuitBreakerConfig::single_failure(cool_down),
        );
        self
    }

    /// The remote layer, once it is reachable and holds no outdated entries.
    async fn usable_remote(&self) -> Option<&Arc<dyn CacheBackend>> {
        let remote = self.remote.as_ref()?;
        if !self.breaker.allow_request() {
            return None;
        }

        let pending = mem::take(&mut *self.lock_pending());
        if pending.is_empty() {
            return Some(remote);
        }

        match replay(remote.as_ref(), &pending).await {
            Ok(()) => {
                tracing::info!(
                    cleared = pending.cleared,
                    keys = pending.keys.len(),
                    "remote cache caught up after outage"
                );
                Some(remote)
            }
            Err(error) => {
                self.lock_pending().merge(pending);
                self.remote_failed("replay", &error);
                None
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingInvalidations> {
        self.pending
            .lock()
            .expect("pending invalidation lock is not poisoned")
    }

    fn remember_key(&self, key: &str) {
        if self.remote.is_some() {
            self.lock_pending().keys.insert(key.to_owned());
        }
    }

    fn remember_clear(&self) {
        if self.remote.is_some() {
            let mut pending = self.lock_pending();
            pending.cleared = true;
            pending.keys.clear();
        }
    }

    fn remote_failed(&self, operation: &'static str, error: &CacheError) {
        self.breaker.record_failure();
        tracing::warn!(operation, %error, "remote cache unavailable, using local cache");
    }
}

async fn replay(
    remote: &dyn CacheBackend,
    pending: &PendingInvalidations,
) -> Result<(), CacheError> {
    if pending.cleared {
        remote.clear().await?;
    }
    for key in &pending.keys {
        remote.delete(key).await?;
    }
    Ok(())
}

impl CacheBackend for LayeredCache {
    fn name(&self) -> &'static str {
        "layered"
    }

    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Result<Option<String>, CacheError>> {
        Box::pin(async move {
            match self.local.get(key).await {
                Ok(Some(payload)) => return Ok(Some(payload)),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(key, %error, "local cache read failed, treating as miss");
                }
            }

            let Some(remote) = self.usable_remote().await else {
                return Ok(None);
            };
            match remote.get(key).await {
                Ok(payload) => {
                    self.breaker.record_success();
                    Ok(payload)
                }
                Err(error) => {
                    self.remote_failed("get", &error);
                    Ok(None)
                }
            }
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        payload: String,
        ttl: Duration,
    ) -> CacheFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            match self.usable_remote().await {
                Some(remote) => match remote.set(key, payload.clone(), ttl).await {
                    Ok(()) => self.breaker.record_success(),
                    Err(error) => {
                        self.remember_key(key);
                        self.remote_failed("set", &error);
                    }
                },
                None => self.remember_key(key),
            }
            if let Err(error) = self.local.set(key, payload, ttl).await {
                tracing::warn!(key, %error, "local cache write failed");
            }
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            match self.usable_remote().await {
                Some(remote) => match remote.delete(key).await {
                    Ok(()) => self.breaker.record_success(),
                    Err(error) => {
                        self.remember_key(key);
                        self.remote_failed("delete", &error);
                    }
                },
                None => self.remember_key(key),
            }
            if let Err(error) = self.local.delete(key).await {
                tracing::warn!(key, %error, "local cache delete failed");
            }
            Ok(())
        })
    }

    fn clear(&self) -> CacheFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            match self.usable_remote().await {
                Some(remote) => match remote.clear().await {
                    Ok(()) => self.breaker.record_success(),
                    Err(error) => {
                        self.remember_clear();
                        self.remote_failed("clear", &error);
                    }
                },
                None => self.remember_clear(),
            }
            if let Err(error) = self.local.clear().await {
                tracing::warn!(%error, "local cache clear failed");
            }
            Ok(())
        })
    }
}
