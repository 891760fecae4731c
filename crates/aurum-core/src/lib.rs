//! # Aurum Core
//!
//! Fetch orchestration, staleness-aware caching and reconciliation of
//! financial observations (security quotes, exchange rates and official gold
//! reserves) gathered from several unreliable public providers.
//!
//! ## Overview
//!
//! - **Canonical domain models** for entities, periods and observations
//! - **Provider contract** with optional batch and history capabilities
//! - **Fetch orchestrator** with ordered fallback, per-provider throttling,
//!   deadlines and in-flight de-duplication
//! - **Expiring cache** whose TTL depends on whether the market is open
//! - **Reconciliation** of periodic observations into a DuckDB store, with
//!   deltas computed on read
//! - **Refresh policy** that refetches gold-reserve series once they fall
//!   behind the last completed month
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Eastmoney, Sina, Frankfurter, ExchangeRate-API and IMF adapters |
//! | [`cache`] | Cache backends and TTL policy |
//! | [`calendar`] | Trading sessions per market |
//! | [`circuit_breaker`] | Circuit breaker for resilient upstream calls |
//! | [`config`] | TOML configuration |
//! | [`domain`] | Entity, Period, Observation |
//! | [`orchestrator`] | Cache-first fetch with provider fallback |
//! | [`provider`] | Provider traits, request context, `SourceError` |
//! | [`reconcile`] | Store writes, deltas, watchlist |
//! | [`refresh`] | Reserve staleness classification |
//! | [`registry`] | Ordered provider chains per class |
//! | [`service`] | Caller-facing facade |
//! | [`throttling`] | Per-provider concurrency and quota |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ MarketDataService│
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ FetchOrchestrator│────▶│ CacheBackend     │
//! └────────┬─────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ Provider adapters│────▶│ HttpClient       │
//! └────────┬─────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ Reconciler       │──▶ aurum-warehouse (DuckDB)
//! └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Provider failures are values, not errors: every entity of a fetch comes
//! back as either a [`RouteSuccess`] or a [`RouteFailure`] that lists each
//! provider attempt.
//!
//! ```rust
//! use aurum_core::{SourceError, SourceErrorKind};
//!
//! fn describe(error: &SourceError) -> &'static str {
//!     match error.kind() {
//!         SourceErrorKind::RateLimited => "slow down",
//!         SourceErrorKind::Unavailable => "try the next provider",
//!         _ => "skip",
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - API keys are read from environment variables only and never logged

pub mod adapters;
pub mod cache;
pub mod calendar;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod orchestrator;
pub mod provider;
pub mod provider_policy;
pub mod reconcile;
pub mod refresh;
pub mod registry;
pub mod retry;
pub mod service;
pub mod source;
pub mod throttling;

// Adapter implementations
pub use adapters::{
    EastmoneyAdapter, ExchangeRateApiAdapter, FrankfurterAdapter, ImfAdapter, SinaAdapter,
    TransportSettings,
};

// Caching
pub use cache::{
    CacheBackend, CacheError, CacheMode, FileCache, LayeredCache, MemoryCache, RemoteCache,
    TtlPair, TtlPolicy,
};

pub use calendar::{MarketSchedule, Session, TradingCalendar};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub use clock::{Clock, ManualClock, SystemClock};

pub use config::{AppConfig, ConfigError};

// Domain models
pub use domain::{
    Entity, EntityClass, Granularity, Market, Observation, ObservationValue, Period, UtcDateTime,
};

// Error types
pub use error::{CoreError, ValidationError};

// HTTP client types
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpFuture, HttpRequest, HttpResponse, ReqwestHttpClient,
};

// Orchestration
pub use orchestrator::{
    AttemptError, BackfillReport, FailureReason, FetchOptions, FetchOrchestrator, RouteFailure,
    RouteResult, RouteSuccess,
};

// Provider contract
pub use provider::{
    BatchOutcome, BatchProvider, HistoryProvider, Provider, ProviderFuture, RequestContext,
    SourceError, SourceErrorKind,
};

pub use provider_policy::ProviderPolicy;

// Reconciliation
pub use reconcile::{Delta, DeltaHorizon, DeltaView, Reconciler};

pub use refresh::Freshness;

pub use registry::SourceRegistry;

// Retry logic
pub use retry::{Backoff, RetryConfig};

pub use service::{
    common_rate_pairs, MarketDataService, RefreshDecision, ReservesReport, COMMON_CURRENCIES,
};

// Source identifiers
pub use source::ProviderId;

// Throttling
pub use throttling::{ProviderThrottle, ThrottleSet};

// Warehouse (re-exported from aurum-warehouse)
pub use aurum_warehouse::{UpsertOutcome, UpsertReport, Warehouse, WarehouseConfig, WarehouseError};
