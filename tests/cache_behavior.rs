//! Behavior tests for cache expiry, market-aware TTLs and backend layering.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aurum_core::cache::CacheFuture;
use aurum_core::{
    CacheBackend, CacheError, Entity, EntityClass, FetchOptions, FetchOrchestrator, FileCache,
    LayeredCache, ManualClock, MemoryCache, Observation, ObservationValue, Provider,
    ProviderFuture, ProviderId, RequestContext, SourceError, SourceRegistry, UtcDateTime,
};

/// Quote provider that prices every ticker at 100 and counts its calls.
#[derive(Default)]
struct CountingQuotes {
    calls: AtomicUsize,
}

impl CountingQuotes {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Provider for CountingQuotes {
    fn id(&self) -> ProviderId {
        ProviderId::Sina
    }

    fn supported_class(&self) -> EntityClass {
        EntityClass::Quote
    }

    fn fetch_one<'a>(
        &'a self,
        entity: &'a Entity,
        ctx: &'a RequestContext,
    ) -> ProviderFuture<'a, Result<Observation, SourceError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Observation::new(
                entity.clone(),
                ctx.current_period(entity),
                ObservationValue::quote(100.0),
                ProviderId::Sina,
                ctx.as_of(),
            )?)
        })
    }
}

fn manual_clock(at: &str) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(UtcDateTime::parse(at).expect("timestamp")))
}

fn quote_orchestrator(clock: &Arc<ManualClock>, provider: &Arc<CountingQuotes>) -> FetchOrchestrator {
    let registry = SourceRegistry::builder()
        .chain(EntityClass::Quote, [ProviderId::Sina])
        .build();
    FetchOrchestrator::builder(registry)
        .provider(provider.clone())
        .clock(clock.clone())
        .build()
}

// =============================================================================
// TTL by market state
// =============================================================================

#[tokio::test]
async fn entry_cached_while_market_is_open_expires_after_the_short_ttl() {
    // Given: 10:00 New York time on a Tuesday, so the US market is open
    let clock = manual_clock("2026-03-10T15:00:00Z");
    let provider = Arc::new(CountingQuotes::default());
    let orchestrator = quote_orchestrator(&clock, &provider);
    let apple = Entity::quote("AAPL", None).expect("entity");
    assert_eq!(orchestrator.ttl_for(&apple), Duration::from_secs(300));

    // When: the quote is fetched, then fetched again just past the short TTL
    orchestrator
        .fetch_one(&apple, FetchOptions::default())
        .await
        .expect("fetched");
    clock.advance(Duration::from_secs(301));
    let second = orchestrator
        .fetch_one(&apple, FetchOptions::default())
        .await
        .expect("refetched");

    // Then: the stale entry was not served
    assert!(!second.from_cache);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn entry_cached_while_market_is_closed_survives_the_same_age() {
    // Given: 17:00 New York time, after the close
    let clock = manual_clock("2026-03-10T22:00:00Z");
    let provider = Arc::new(CountingQuotes::default());
    let orchestrator = quote_orchestrator(&clock, &provider);
    let apple = Entity::quote("AAPL", None).expect("entity");
    assert_eq!(orchestrator.ttl_for(&apple), Duration::from_secs(3_600));

    // When: the quote is fetched, then read again at the same age as above
    orchestrator
        .fetch_one(&apple, FetchOptions::default())
        .await
        .expect("fetched");
    clock.advance(Duration::from_secs(301));
    let second = orchestrator
        .fetch_one(&apple, FetchOptions::default())
        .await
        .expect("cached");

    // Then: the long-TTL entry is still served
    assert!(second.from_cache);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn unreadable_cache_entry_is_treated_as_a_miss() {
    // Given: a cache holding garbage under the quote's key
    let clock = manual_clock("2026-03-10T15:00:00Z");
    let cache = Arc::new(MemoryCache::new(clock.clone()));
    cache
        .set("quote:AAPL", String::from("{not json"), Duration::from_secs(600))
        .await
        .expect("seeded");
    let provider = Arc::new(CountingQuotes::default());
    let registry = SourceRegistry::builder()
        .chain(EntityClass::Quote, [ProviderId::Sina])
        .build();
    let orchestrator = FetchOrchestrator::builder(registry)
        .provider(provider.clone())
        .cache(cache)
        .clock(clock)
        .build();

    // When
    let success = orchestrator
        .fetch_one(&Entity::quote("AAPL", None).expect("entity"), FetchOptions::default())
        .await
        .expect("fetched");

    // Then: the provider answered instead of the corrupt entry
    assert!(!success.from_cache);
    assert_eq!(provider.calls(), 1);
}

// =============================================================================
// Memory backend
// =============================================================================

#[tokio::test]
async fn memory_entry_expires_exactly_at_its_ttl() {
    // Given
    let clock = manual_clock("2026-03-10T15:00:00Z");
    let cache = MemoryCache::new(clock.clone());
    cache
        .set("rate:USD/CNY", String::from("7.18"), Duration::from_secs(60))
        .await
        .expect("set");

    // When / Then: readable one second before expiry, gone at expiry
    clock.advance(Duration::from_secs(59));
    assert_eq!(
        cache.get("rate:USD/CNY").await.expect("get").as_deref(),
        Some("7.18")
    );
    clock.advance(Duration::from_secs(1));
    assert!(cache.get("rate:USD/CNY").await.expect("get").is_none());
}

// =============================================================================
// File backend
// =============================================================================

#[tokio::test]
async fn file_cache_survives_reopening_and_persists_evictions() {
    // Given: a file cache in a scratch directory
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cache.json");
    let clock = manual_clock("2026-03-10T15:00:00Z");
    let cache = FileCache::open_with_clock(&path, clock.clone())
        .await
        .expect("open");
    cache
        .set("reserve:CHN", String::from("2298.55"), Duration::from_secs(60))
        .await
        .expect("set");
    drop(cache);

    // When: the file is reopened before expiry
    let reopened = FileCache::open_with_clock(&path, clock.clone())
        .await
        .expect("reopen");

    // Then: the entry is still there
    assert_eq!(
        reopened.get("reserve:CHN").await.expect("get").as_deref(),
        Some("2298.55")
    );

    // When: the entry expires and is read
    clock.advance(Duration::from_secs(61));
    assert!(reopened.get("reserve:CHN").await.expect("get").is_none());

    // Then: the eviction was written back to disk
    let on_disk = std::fs::read_to_string(&path).expect("cache file");
    assert!(!on_disk.contains("reserve:CHN"));
}

// =============================================================================
// Layered backend
// =============================================================================

/// Remote layer that is always down.
#[derive(Default)]
struct DownRemote {
    calls: AtomicUsize,
}

impl CacheBackend for DownRemote {
    fn name(&self) -> &'static str {
        "down"
    }

    fn get<'a>(&'a self, _key: &'a str) -> CacheFuture<'a, Result<Option<String>, CacheError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(CacheError::Remote(String::from("connection refused"))) })
    }

    fn set<'a>(
        &'a self,
        _key: &'a str,
        _payload: String,
        _ttl: Duration,
    ) -> CacheFuture<'a, Result<(), CacheError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(CacheError::Remote(String::from("connection refused"))) })
    }

    fn delete<'a>(&'a self, _key: &'a str) -> CacheFuture<'a, Result<(), CacheError>> {
        Box::pin(async { Err(CacheError::Remote(String::from("connection refused"))) })
    }

    fn clear(&self) -> CacheFuture<'_, Result<(), CacheError>> {
        Box::pin(async { Err(CacheError::Remote(String::from("connection refused"))) })
    }
}

#[tokio::test]
async fn layered_cache_degrades_to_the_local_layer_when_remote_is_down() {
    // Given: a layered cache whose remote layer refuses every call
    let clock = manual_clock("2026-03-10T15:00:00Z");
    let remote = Arc::new(DownRemote::default());
    let cache = LayeredCache::new(Arc::new(MemoryCache::new(clock)))
        .with_remote(remote.clone())
        .with_cool_down(Duration::from_secs(60));

    // When: a value is written and read back
    cache
        .set("rate:USD/CNY", String::from("7.18"), Duration::from_secs(600))
        .await
        .expect("set never fails");
    let value = cache.get("rate:USD/CNY").await.expect("get never fails");

    // Then: the local copy is served and the remote is skipped after its failure
    assert_eq!(value.as_deref(), Some("7.18"));
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
}
