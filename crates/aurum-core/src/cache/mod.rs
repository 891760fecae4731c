//! Expiring key/value cache for fetched observations.
//!
//! Backends implement [`CacheBackend`]: `get` returns nothing once an entry
//! has reached its expiry and deletes it as a side effect, `set` overwrites
//! unconditionally with an explicit TTL. The orchestrator picks that TTL from
//! [`TtlPolicy`] depending on whether the entity's market is open.
//!
//! | Backend | Storage |
//! |---------|---------|
//! | [`MemoryCache`] | process memory, lock-striped map |
//! | [`FileCache`] | one JSON file |
//! | [`RemoteCache`] | Redis, shared between processes |
//! | [`LayeredCache`] | local first, shared remote behind it, never fails |

mod file;
mod layered;
mod memory;
mod remote;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::EntityClass;

pub use file::FileCache;
pub use layered::LayeredCache;
pub use memory::MemoryCache;
pub use remote::RemoteCache;

/// Boxed future returned by cache backends.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure of one cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache payload error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("remote cache error: {0}")]
    Remote(String),
}

/// Expiring string store.
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Result<Option<String>, CacheError>>;

    fn set<'a>(
        &'a self,
        key: &'a str,
        payload: String,
        ttl: Duration,
    ) -> CacheFuture<'a, Result<(), CacheError>>;

    fn delete<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Result<(), CacheError>>;

    fn clear(&self) -> CacheFuture<'_, Result<(), CacheError>>;
}

/// How a fetch call interacts with the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Serve unexpired entries; write fresh results.
    #[default]
    Use,
    /// Skip cache reads but write fresh results.
    Refresh,
    /// Neither read nor write.
    Bypass,
}

impl CacheMode {
    pub const fn reads(self) -> bool {
        matches!(self, Self::Use)
    }

    pub const fn writes(self) -> bool {
        !matches!(self, Self::Bypass)
    }
}

/// TTL pair for one entity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPair {
    /// Seconds to keep an entry while the market trades.
    pub open: u64,
    /// Seconds to keep an entry while the market is closed.
    pub closed: u64,
}

impl TtlPair {
    pub const fn new(open: u64, closed: u64) -> Self {
        Self { open, closed }
    }
}

/// Per-class TTLs selected by market state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlPolicy {
    pub quote: TtlPair,
    pub rate: TtlPair,
    pub reserve: TtlPair,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            quote: TtlPair::new(300, 3_600),
            rate: TtlPair::new(3_600, 3_600),
            reserve: TtlPair::new(21_600, 86_400),
        }
    }
}

impl TtlPolicy {
    pub fn ttl_for(&self, class: EntityClass, market_open: bool) -> Duration {
        let pair = match class {
            EntityClass::Quote => self.quote,
            EntityClass::Rate => self.rate,
            EntityClass::Reserve => self.reserve,
        };
        Duration::from_secs(if market_open { pair.open } else { pair.closed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ttl_is_short_while_trading() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.ttl_for(EntityClass::Quote, true), Duration::from_secs(300));
        assert_eq!(policy.ttl_for(EntityClass::Quote, false), Duration::from_secs(3_600));
        assert_eq!(policy.ttl_for(EntityClass::Reserve, false), Duration::from_secs(86_400));
    }

    #[test]
    fn cache_modes_gate_reads_and_writes() {
        assert!(CacheMode::default().reads());
        assert!(!CacheMode::Refresh.reads());
        assert!(CacheMode::Refresh.writes());
        assert!(!CacheMode::Bypass.writes());
    }
}
