//! Caller-facing facade over the orchestrator and the reconciliation store.
//!
//! [`MarketDataService::from_config`] wires every component from an
//! [`AppConfig`]; tests and embedders can assemble the pieces themselves and
//! call [`MarketDataService::new`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use aurum_warehouse::WarehouseConfig;
use serde::Serialize;

use crate::adapters::{
    EastmoneyAdapter, ExchangeRateApiAdapter, FrankfurterAdapter, ImfAdapter, SinaAdapter,
    TransportSettings,
};
use crate::cache::{
    CacheBackend, CacheMode, FileCache, LayeredCache, MemoryCache, RemoteCache,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, CacheBackendKind};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::orchestrator::{BackfillReport, FetchOptions, FetchOrchestrator, RouteResult};
use crate::provider::Provider;
use crate::reconcile::{DeltaView, Reconciler};
use crate::refresh::{classify, Freshness};
use crate::retry::RetryConfig;
use crate::throttling::ThrottleSet;
use crate::{CoreError, Entity, EntityClass, Observation, ValidationError};

/// Currencies quoted against a base by [`MarketDataService::get_all_rates`].
pub const COMMON_CURRENCIES: [&str; 16] = [
    "USD", "CNY", "EUR", "GBP", "JPY", "KRW", "HKD", "TWD", "SGD", "AUD", "CAD", "CHF", "THB",
    "MYR", "INR", "RUB",
];

/// `base` paired with every other common currency, in list order.
pub fn common_rate_pairs(base: &str) -> Result<Vec<Entity>, ValidationError> {
    let base = base.trim().to_ascii_uppercase();
    COMMON_CURRENCIES
        .iter()
        .filter(|quote| **quote != base)
        .map(|quote| Entity::rate(&base, quote))
        .collect()
}

/// What the reserve refresh policy decided for one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshDecision {
    pub entity_id: String,
    pub freshness: Freshness,
    pub refetched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservesReport {
    /// Latest stored holdings with deltas, largest first.
    pub reserves: Vec<DeltaView>,
    pub refresh: Vec<RefreshDecision>,
}

pub struct MarketDataService {
    orchestrator: Arc<FetchOrchestrator>,
    reconciler: Reconciler,
    clock: Arc<dyn Clock>,
    default_deadline: Option<Duration>,
}

impl MarketDataService {
    /// `reconciler` must be the store the orchestrator writes to.
    pub fn new(orchestrator: FetchOrchestrator, reconciler: Reconciler) -> Self {
        let clock = Arc::clone(orchestrator.clock());
        Self {
            orchestrator: Arc::new(orchestrator),
            reconciler,
            clock,
            default_deadline: None,
        }
    }

    pub fn with_default_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// Build the production wiring: reqwest transport, configured cache
    /// backend, DuckDB store under the aurum home and every adapter.
    pub async fn from_config(config: &AppConfig) -> Result<Self, CoreError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let http_client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
        let cache = build_cache(config, &clock).await?;

        let store = WarehouseConfig {
            db_path: Some(config.store_path()),
            max_pool_size: config.store.max_pool_size,
        };
        let horizons = config.deltas.horizons.clone();
        let reconciler =
            tokio::task::spawn_blocking(move || Reconciler::open(store, horizons)).await??;

        let settings = TransportSettings {
            timeout_ms: config.fetch.request_timeout_ms,
            retry: RetryConfig::exponential(config.fetch.retries),
        };
        let mut imf = ImfAdapter::with_settings(Arc::clone(&http_client), settings.clone());
        if let Some(api_key) = config.imf_api_key() {
            imf = imf.with_api_key(api_key);
        }
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(EastmoneyAdapter::with_settings(Arc::clone(&http_client), settings.clone())),
            Arc::new(SinaAdapter::with_settings(Arc::clone(&http_client), settings.clone())),
            Arc::new(FrankfurterAdapter::with_settings(Arc::clone(&http_client), settings.clone())),
            Arc::new(ExchangeRateApiAdapter::with_settings(Arc::clone(&http_client), settings)),
            Arc::new(imf),
        ];

        let orchestrator = FetchOrchestrator::builder(config.sources.registry())
            .providers(providers)
            .cache(cache)
            .calendar(config.calendar.calendar()?)
            .ttl(config.cache.ttl)
            .clock(clock)
            .throttles(ThrottleSet::with_max_concurrency(config.fetch.max_concurrency))
            .reconciler(reconciler.clone())
            .build();

        Ok(Self::new(orchestrator, reconciler)
            .with_default_deadline(config.fetch.deadline_ms.map(Duration::from_millis)))
    }

    pub fn orchestrator(&self) -> &FetchOrchestrator {
        &self.orchestrator
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub async fn get_quotes(
        &self,
        entities: &[Entity],
        mode: CacheMode,
    ) -> Result<HashMap<Entity, RouteResult>, CoreError> {
        self.fetch_class(EntityClass::Quote, entities, mode).await
    }

    pub async fn get_rates(
        &self,
        entities: &[Entity],
        mode: CacheMode,
    ) -> Result<HashMap<Entity, RouteResult>, CoreError> {
        self.fetch_class(EntityClass::Rate, entities, mode).await
    }

    /// Rates from `base` to every other currency in [`COMMON_CURRENCIES`].
    ///
    /// Pairs that fail stay in the result as failures; they never fail the
    /// whole call.
    pub async fn get_all_rates(
        &self,
        base: &str,
        mode: CacheMode,
    ) -> Result<HashMap<Entity, RouteResult>, CoreError> {
        let pairs = common_rate_pairs(base)?;
        self.fetch_class(EntityClass::Rate, &pairs, mode).await
    }

    async fn fetch_class(
        &self,
        class: EntityClass,
        entities: &[Entity],
        mode: CacheMode,
    ) -> Result<HashMap<Entity, RouteResult>, CoreError> {
        if let Some(other) = entities.iter().find(|entity| entity.class() != class) {
            return Err(ValidationError::UnexpectedClass {
                expected: class.as_str(),
                value: other.id(),
            }
            .into());
        }
        Ok(self.orchestrator.fetch(entities, self.options(mode)).await)
    }

    fn options(&self, mode: CacheMode) -> FetchOptions {
        FetchOptions {
            mode,
            deadline: self.default_deadline,
        }
    }

    /// Latest gold holdings, refetching series whose newest stored month is
    /// older than the last completed month (all of them when `force` is set).
    ///
    /// With no explicit entities the watchlist is used, and when that is
    /// empty every reserve already in the store.
    pub async fn get_latest_reserves(
        &self,
        entities: &[Entity],
        force: bool,
    ) -> Result<ReservesReport, CoreError> {
        if let Some(other) = entities
            .iter()
            .find(|entity| entity.class() != EntityClass::Reserve)
        {
            return Err(ValidationError::UnexpectedClass {
                expected: EntityClass::Reserve.as_str(),
                value: other.id(),
            }
            .into());
        }

        let targets = if entities.is_empty() {
            self.default_reserve_targets().await?
        } else {
            entities.to_vec()
        };

        let now = self.clock.now();
        let mut refresh = Vec::with_capacity(targets.len());
        for entity in &targets {
            let stored = {
                let entity = entity.clone();
                self.blocking(move |store| store.latest(&entity)).await?
            };
            let freshness = classify(stored.as_ref(), now);
            let refetch = force || freshness.needs_refetch();
            tracing::info!(
                entity = %entity,
                freshness = ?freshness,
                force,
                refetch,
                "reserve refresh decision"
            );

            let mut decision = RefreshDecision {
                entity_id: entity.id(),
                freshness,
                refetched: false,
                error: None,
            };
            if refetch {
                match self
                    .orchestrator
                    .fetch_one(entity, self.options(CacheMode::Refresh))
                    .await
                {
                    Ok(_) => decision.refetched = true,
                    Err(failure) => {
                        tracing::warn!(
                            entity = %entity,
                            reason = failure.reason.as_str(),
                            "reserve refresh failed, serving stored data"
                        );
                        decision.error = Some(
                            failure
                                .errors
                                .last()
                                .map(|attempt| attempt.error.to_string())
                                .unwrap_or_else(|| failure.reason.as_str().to_owned()),
                        );
                    }
                }
            }
            refresh.push(decision);
        }

        let wanted: HashSet<Entity> = targets.into_iter().collect();
        let mut reserves: Vec<DeltaView> = self
            .get_latest_with_deltas(EntityClass::Reserve)
            .await?
            .into_iter()
            .filter(|view| wanted.contains(&view.observation.entity))
            .collect();
        reserves.sort_by(|left, right| {
            right
                .observation
                .primary_value()
                .total_cmp(&left.observation.primary_value())
        });

        Ok(ReservesReport { reserves, refresh })
    }

    async fn default_reserve_targets(&self) -> Result<Vec<Entity>, CoreError> {
        let watched = self
            .blocking(|store| store.watchlist(Some(EntityClass::Reserve)))
            .await?;
        if !watched.is_empty() {
            return Ok(watched);
        }
        Ok(self
            .get_latest_with_deltas(EntityClass::Reserve)
            .await?
            .into_iter()
            .map(|view| view.observation.entity)
            .collect())
    }

    pub async fn get_latest_with_deltas(
        &self,
        class: EntityClass,
    ) -> Result<Vec<DeltaView>, CoreError> {
        self.blocking(move |store| store.latest_with_deltas(class))
            .await
    }

    /// Up to `periods` stored observations, most recent first.
    pub async fn get_history(
        &self,
        entity: &Entity,
        periods: usize,
    ) -> Result<Vec<Observation>, CoreError> {
        let entity = entity.clone();
        self.blocking(move |store| store.history(&entity, periods))
            .await
    }

    pub async fn backfill(&self, entity: &Entity, periods: u32) -> Result<BackfillReport, CoreError> {
        self.orchestrator.backfill(entity, periods).await
    }

    pub async fn watch(&self, entity: &Entity) -> Result<(), CoreError> {
        let entity = entity.clone();
        self.blocking(move |store| store.register(&entity)).await
    }

    pub async fn unwatch(&self, entity: &Entity) -> Result<bool, CoreError> {
        let entity = entity.clone();
        self.blocking(move |store| store.unregister(&entity)).await
    }

    pub async fn watchlist(&self, class: Option<EntityClass>) -> Result<Vec<Entity>, CoreError> {
        self.blocking(move |store| store.watchlist(class)).await
    }

    pub async fn clear_cache(&self) -> Result<(), CoreError> {
        self.orchestrator.cache().clear().await?;
        Ok(())
    }

    async fn blocking<T, F>(&self, task: F) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Reconciler) -> Result<T, CoreError> + Send + 'static,
    {
        let store = self.reconciler.clone();
        tokio::task::spawn_blocking(move || task(&store)).await?
    }
}

async fn build_cache(
    config: &AppConfig,
    clock: &Arc<dyn Clock>,
) -> Result<Arc<dyn CacheBackend>, CoreError> {
    let cache: Arc<dyn CacheBackend> = match config.cache.backend {
        CacheBackendKind::Memory => Arc::new(MemoryCache::new(Arc::clone(clock))),
        CacheBackendKind::File => {
            Arc::new(FileCache::open_with_clock(config.cache_path(), Arc::clone(clock)).await?)
        }
        CacheBackendKind::Layered => {
            let local = FileCache::open_with_clock(config.cache_path(), Arc::clone(clock)).await?;
            let mut layered = LayeredCache::new(Arc::new(local));
            if let Some(remote_url) = &config.cache.remote_url {
                let mut remote = RemoteCache::open(remote_url)?;
                if let Some(prefix) = &config.cache.remote_prefix {
                    remote = remote.with_prefix(prefix.clone());
                }
                layered = layered.with_remote(Arc::new(remote));
            }
            Arc::new(layered)
        }
    };
    tracing::debug!(backend = cache.name(), "cache backend ready");
    Ok(cache)
}
