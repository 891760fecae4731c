//! Fetch orchestration: cache, grouping, provider fallback and write-back.
//!
//! [`FetchOrchestrator::fetch`] answers every requested entity with either an
//! observation or an explicit failure:
//!
//! 1. Entities with an unexpired cache entry are answered from the cache.
//! 2. Misses are grouped by `(class, market)` and groups run concurrently.
//! 3. Each group walks the registry chain in order. A batch-capable provider
//!    gets one call for all pending entities; otherwise single calls run
//!    concurrently behind the provider's throttle. Answered entities leave the
//!    pending set and only the remainder moves on to the next provider, unless
//!    fallback is disabled.
//! 4. Fresh observations are cached with a TTL chosen by whether the market is
//!    open, and periodic ones are reconciled into the store.
//!
//! A provider failure only removes that provider from contention for the
//! entities it failed. A concurrent fetch of an entity that is already in
//! flight awaits the first fetch instead of calling providers again.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{join_all, Shared};
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::cache::{CacheBackend, CacheMode, MemoryCache, TtlPolicy};
use crate::calendar::TradingCalendar;
use crate::clock::{Clock, SystemClock};
use crate::provider::{BatchProvider, Provider, RequestContext, SourceError};
use crate::reconcile::Reconciler;
use crate::registry::SourceRegistry;
use crate::throttling::ThrottleSet;
use crate::{CoreError, Entity, EntityClass, Market, Observation, ProviderId, UpsertReport};

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub mode: CacheMode,
    /// Overall budget; entities still pending when it elapses fail.
    pub deadline: Option<Duration>,
}

impl FetchOptions {
    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// One failed provider attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptError {
    pub provider: ProviderId,
    pub error: SourceError,
}

/// Why an entity could not be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    AllProvidersFailed,
    NoProviders,
    DeadlineExceeded,
    /// The fetch this call was waiting on was dropped before finishing.
    Cancelled,
}

impl FailureReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AllProvidersFailed => "all_providers_failed",
            Self::NoProviders => "no_providers",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteSuccess {
    pub observation: Observation,
    pub selected_source: ProviderId,
    /// Providers tried for this entity, in order.
    pub source_chain: Vec<ProviderId>,
    pub from_cache: bool,
    /// Failures of providers tried before the selected one.
    pub errors: Vec<AttemptError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteFailure {
    pub source_chain: Vec<ProviderId>,
    pub errors: Vec<AttemptError>,
    pub reason: FailureReason,
}

impl RouteFailure {
    fn without_attempts(reason: FailureReason) -> Self {
        Self {
            source_chain: Vec::new(),
            errors: Vec::new(),
            reason,
        }
    }
}

pub type RouteResult = Result<RouteSuccess, RouteFailure>;

/// Outcome of a history backfill.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BackfillReport {
    pub entity_id: String,
    pub source: ProviderId,
    pub fetched: usize,
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

type InFlight = Shared<oneshot::Receiver<RouteResult>>;

/// Fetches observations through the cache and the provider fallback chains.
pub struct FetchOrchestrator {
    providers: HashMap<ProviderId, Arc<dyn Provider>>,
    registry: Arc<SourceRegistry>,
    cache: Arc<dyn CacheBackend>,
    calendar: Arc<TradingCalendar>,
    ttl: TtlPolicy,
    clock: Arc<dyn Clock>,
    throttles: ThrottleSet,
    reconciler: Option<Reconciler>,
    in_flight: DashMap<Entity, InFlight>,
}

pub struct FetchOrchestratorBuilder {
    providers: Vec<Arc<dyn Provider>>,
    registry: SourceRegistry,
    cache: Option<Arc<dyn CacheBackend>>,
    calendar: TradingCalendar,
    ttl: TtlPolicy,
    clock: Arc<dyn Clock>,
    throttles: Option<ThrottleSet>,
    reconciler: Option<Reconciler>,
}

impl FetchOrchestratorBuilder {
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(mut self, providers: impl IntoIterator<Item = Arc<dyn Provider>>) -> Self {
        self.providers.extend(providers);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn calendar(mut self, calendar: TradingCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn ttl(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn throttles(mut self, throttles: ThrottleSet) -> Self {
        self.throttles = Some(throttles);
        self
    }

    pub fn reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn build(self) -> FetchOrchestrator {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCache::new(Arc::clone(&self.clock))));
        FetchOrchestrator {
            providers: self
                .providers
                .into_iter()
                .map(|provider| (provider.id(), provider))
                .collect(),
            registry: Arc::new(self.registry),
            cache,
            calendar: Arc::new(self.calendar),
            ttl: self.ttl,
            clock: self.clock,
            throttles: self
                .throttles
                .unwrap_or_else(|| ThrottleSet::with_max_concurrency(4)),
            reconciler: self.reconciler,
            in_flight: DashMap::new(),
        }
    }
}

/// Mutable progress of one group through its provider chain.
struct GroupState {
    pending: Vec<Entity>,
    done: Vec<(Entity, Observation, ProviderId)>,
    tried: HashMap<Entity, Vec<ProviderId>>,
    errors: HashMap<Entity, Vec<AttemptError>>,
}

impl GroupState {
    fn new(pending: Vec<Entity>) -> Self {
        Self {
            pending,
            done: Vec::new(),
            tried: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    fn fail(&mut self, entity: &Entity, provider: ProviderId, error: SourceError) {
        self.errors
            .entry(entity.clone())
            .or_default()
            .push(AttemptError { provider, error });
    }

    fn fail_all(&mut self, provider: ProviderId, error: &SourceError) {
        for entity in self.pending.clone() {
            self.fail(&entity, provider, error.clone());
        }
    }

    fn into_results(mut self, reason: FailureReason) -> Vec<(Entity, RouteResult)> {
        let mut results = Vec::with_capacity(self.done.len() + self.pending.len());
        for (entity, observation, selected_source) in self.done {
            results.push((
                entity.clone(),
                Ok(RouteSuccess {
                    observation,
                    selected_source,
                    source_chain: self.tried.remove(&entity).unwrap_or_default(),
                    from_cache: false,
                    errors: self.errors.remove(&entity).unwrap_or_default(),
                }),
            ));
        }
        for entity in self.pending {
            let failure = RouteFailure {
                source_chain: self.tried.remove(&entity).unwrap_or_default(),
                errors: self.errors.remove(&entity).unwrap_or_default(),
                reason,
            };
            results.push((entity, Err(failure)));
        }
        results
    }
}

/// Removes this call's in-flight entries when the leading fetch ends or is dropped.
struct InFlightGuard<'a> {
    map: &'a DashMap<Entity, InFlight>,
    entities: Vec<Entity>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        for entity in &self.entities {
            self.map.remove(entity);
        }
    }
}

impl FetchOrchestrator {
    pub fn builder(registry: SourceRegistry) -> FetchOrchestratorBuilder {
        FetchOrchestratorBuilder {
            providers: Vec::new(),
            registry,
            cache: None,
            calendar: TradingCalendar::default(),
            ttl: TtlPolicy::default(),
            clock: Arc::new(SystemClock),
            throttles: None,
            reconciler: None,
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn reconciler(&self) -> Option<&Reconciler> {
        self.reconciler.as_ref()
    }

    /// Cache TTL for an entity at the current instant.
    pub fn ttl_for(&self, entity: &Entity) -> Duration {
        let open = self.calendar.is_open(entity.market(), self.clock.now());
        self.ttl.ttl_for(entity.class(), open)
    }

    pub async fn fetch_one(&self, entity: &Entity, options: FetchOptions) -> RouteResult {
        let mut results = self.fetch(std::slice::from_ref(entity), options).await;
        results
            .remove(entity)
            .unwrap_or_else(|| Err(RouteFailure::without_attempts(FailureReason::Cancelled)))
    }

    /// Fetch every entity; the returned map has exactly one entry per distinct entity.
    pub async fn fetch(
        &self,
        entities: &[Entity],
        options: FetchOptions,
    ) -> HashMap<Entity, RouteResult> {
        let deadline = options.deadline.map(|budget| Instant::now() + budget);
        let ctx = RequestContext::new(self.clock.now(), Arc::clone(&self.calendar))
            .with_deadline(deadline);

        let mut seen = HashSet::new();
        let requested: Vec<Entity> = entities
            .iter()
            .filter(|entity| seen.insert((*entity).clone()))
            .cloned()
            .collect();

        let mut results = HashMap::with_capacity(requested.len());
        let misses = if options.mode.reads() {
            let lookups = join_all(requested.iter().map(|entity| self.read_cache(entity))).await;
            let mut misses = Vec::new();
            for (entity, cached) in requested.into_iter().zip(lookups) {
                match cached {
                    Some(observation) => {
                        let source = observation.source;
                        results.insert(
                            entity,
                            Ok(RouteSuccess {
                                observation,
                                selected_source: source,
                                source_chain: Vec::new(),
                                from_cache: true,
                                errors: Vec::new(),
                            }),
                        );
                    }
                    None => misses.push(entity),
                }
            }
            misses
        } else {
            requested
        };

        let (leaders, followers) = self.claim_in_flight(misses);
        let guard = InFlightGuard {
            map: &self.in_flight,
            entities: leaders.iter().map(|(entity, _)| entity.clone()).collect(),
        };

        let leader_entities: Vec<Entity> = leaders.iter().map(|(entity, _)| entity.clone()).collect();
        let (fresh, joined) = tokio::join!(
            self.fetch_from_providers(leader_entities, &ctx),
            join_all(
                followers
                    .into_iter()
                    .map(|(entity, pending)| await_in_flight(entity, pending, deadline))
            )
        );

        self.write_back(&fresh, options.mode).await;

        let mut senders: HashMap<Entity, oneshot::Sender<RouteResult>> = leaders.into_iter().collect();
        for (entity, result) in fresh {
            if let Some(sender) = senders.remove(&entity) {
                let _ = sender.send(result.clone());
            }
            results.insert(entity, result);
        }
        drop(guard);

        results.extend(joined);
        results
    }

    /// Split misses into entities this call fetches and entities already in flight.
    fn claim_in_flight(
        &self,
        misses: Vec<Entity>,
    ) -> (
        Vec<(Entity, oneshot::Sender<RouteResult>)>,
        Vec<(Entity, InFlight)>,
    ) {
        let mut leaders = Vec::new();
        let mut followers = Vec::new();
        for entity in misses {
            match self.in_flight.entry(entity.clone()) {
                Entry::Occupied(occupied) => followers.push((entity, occupied.get().clone())),
                Entry::Vacant(vacant) => {
                    let (sender, receiver) = oneshot::channel();
                    vacant.insert(receiver.shared());
                    leaders.push((entity, sender));
                }
            }
        }
        (leaders, followers)
    }

    async fn read_cache(&self, entity: &Entity) -> Option<Observation> {
        let key = entity.id();
        let payload = match self.cache.get(&key).await {
            Ok(payload) => payload?,
            Err(error) => {
                tracing::warn!(entity = %key, %error, "cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str::<Observation>(&payload) {
            Ok(observation) if observation.entity == *entity => Some(observation),
            Ok(_) => {
                tracing::warn!(entity = %key, "cached observation belongs to another entity");
                None
            }
            Err(error) => {
                tracing::warn!(entity = %key, %error, "discarding unreadable cache entry");
                None
            }
        }
    }

    async fn fetch_from_providers(
        &self,
        entities: Vec<Entity>,
        ctx: &RequestContext,
    ) -> Vec<(Entity, RouteResult)> {
        if entities.is_empty() {
            return Vec::new();
        }

        let mut groups: BTreeMap<(EntityClass, Market), Vec<Entity>> = BTreeMap::new();
        for entity in entities {
            groups
                .entry((entity.class(), entity.market()))
                .or_default()
                .push(entity);
        }

        join_all(
            groups
                .into_iter()
                .map(|((class, _), group)| self.fetch_group(class, group, ctx)),
        )
        .await
        .into_iter()
        .flatten()
        .collect()
    }

    async fn fetch_group(
        &self,
        class: EntityClass,
        entities: Vec<Entity>,
        ctx: &RequestContext,
    ) -> Vec<(Entity, RouteResult)> {
        let chain = self.registry.attempt_order(class);
        if chain.is_empty() {
            tracing::warn!(class = class.as_str(), "no providers configured");
            return GroupState::new(entities).into_results(FailureReason::NoProviders);
        }

        let mut state = GroupState::new(entities);
        let timed_out = {
            let walk = self.walk_chain(class, chain, &mut state, ctx);
            match ctx.deadline() {
                Some(deadline) => tokio::time::timeout_at(deadline, walk).await.is_err(),
                None => {
                    walk.await;
                    false
                }
            }
        };

        if timed_out {
            tracing::warn!(
                class = class.as_str(),
                pending = state.pending.len(),
                "fetch deadline elapsed"
            );
            return state.into_results(FailureReason::DeadlineExceeded);
        }
        if !state.pending.is_empty() {
            tracing::warn!(
                class = class.as_str(),
                pending = state.pending.len(),
                "every provider in the chain failed"
            );
        }
        state.into_results(FailureReason::AllProvidersFailed)
    }

    async fn walk_chain(
        &self,
        class: EntityClass,
        chain: &[ProviderId],
        state: &mut GroupState,
        ctx: &RequestContext,
    ) {
        for (index, &provider_id) in chain.iter().enumerate() {
            if state.pending.is_empty() {
                break;
            }
            for entity in &state.pending {
                state.tried.entry(entity.clone()).or_default().push(provider_id);
            }
            if index > 0 {
                tracing::info!(
                    provider = %provider_id,
                    class = class.as_str(),
                    pending = state.pending.len(),
                    "falling back to next provider"
                );
            }

            let Some(provider) = self.providers.get(&provider_id) else {
                state.fail_all(provider_id, &SourceError::provider_not_registered(provider_id));
                continue;
            };
            if provider.supported_class() != class {
                for entity in state.pending.clone() {
                    state.fail(&entity, provider_id, SourceError::unsupported_class(provider_id, &entity));
                }
                continue;
            }
            if !provider.is_available() {
                state.fail_all(
                    provider_id,
                    &SourceError::unavailable(format!("provider '{provider_id}' reported unavailable")),
                );
                continue;
            }

            let targets = state.pending.clone();
            let outcomes = match provider.batch() {
                Some(batch) => self.call_batch(provider_id, batch, &targets, ctx).await,
                None => self.call_singles(provider_id, provider.as_ref(), &targets, ctx).await,
            };

            for (entity, outcome) in outcomes {
                match outcome.and_then(|observation| accept(provider_id, &entity, observation)) {
                    Ok(observation) => {
                        state.pending.retain(|pending| pending != &entity);
                        state.done.push((entity, observation, provider_id));
                    }
                    Err(error) => {
                        tracing::debug!(
                            provider = %provider_id,
                            entity = %entity,
                            code = error.code(),
                            "provider attempt failed"
                        );
                        state.fail(&entity, provider_id, error);
                    }
                }
            }
        }
    }

    async fn call_batch(
        &self,
        provider_id: ProviderId,
        batch: &dyn BatchProvider,
        targets: &[Entity],
        ctx: &RequestContext,
    ) -> Vec<(Entity, Result<Observation, SourceError>)> {
        let _permit = match self.throttles.get(provider_id) {
            Some(throttle) => match throttle.acquire().await {
                Ok(permit) => Some(permit),
                Err(error) => return fail_each(targets, &error),
            },
            None => None,
        };

        match batch.fetch_many(targets, ctx).await {
            Ok(mut answered) => targets
                .iter()
                .map(|entity| {
                    let outcome = answered.remove(entity).unwrap_or_else(|| {
                        Err(SourceError::not_found(format!(
                            "{provider_id} batch response did not include '{entity}'"
                        )))
                    });
                    (entity.clone(), outcome)
                })
                .collect(),
            Err(error) => fail_each(targets, &error),
        }
    }

    async fn call_singles(
        &self,
        provider_id: ProviderId,
        provider: &dyn Provider,
        targets: &[Entity],
        ctx: &RequestContext,
    ) -> Vec<(Entity, Result<Observation, SourceError>)> {
        let throttle = self.throttles.get(provider_id);
        join_all(targets.iter().map(|entity| async move {
            let _permit = match throttle {
                Some(throttle) => match throttle.acquire().await {
                    Ok(permit) => Some(permit),
                    Err(error) => return (entity.clone(), Err(error)),
                },
                None => None,
            };
            (entity.clone(), provider.fetch_one(entity, ctx).await)
        }))
        .await
    }

    /// Cache fresh observations and reconcile periodic ones.
    async fn write_back(&self, fresh: &[(Entity, RouteResult)], mode: CacheMode) {
        let observations: Vec<&Observation> = fresh
            .iter()
            .filter_map(|(_, result)| result.as_ref().ok())
            .map(|success| &success.observation)
            .collect();
        if observations.is_empty() {
            return;
        }

        if mode.writes() {
            join_all(observations.iter().map(|observation| self.write_cache(observation))).await;
        }

        let Some(reconciler) = self.reconciler.clone() else {
            return;
        };
        let named: Vec<Observation> = observations
            .iter()
            .filter(|observation| observation.entity.name().is_some())
            .map(|observation| (*observation).clone())
            .collect();
        let periodic: Vec<Observation> = observations
            .into_iter()
            .filter(|observation| observation.entity.class().is_periodic())
            .cloned()
            .collect();
        if named.is_empty() && periodic.is_empty() {
            return;
        }

        let stored = tokio::task::spawn_blocking(move || {
            if let Err(error) = reconciler.refresh_names(&named) {
                tracing::warn!(%error, "entity name refresh failed");
            }
            if periodic.is_empty() {
                return UpsertReport::default();
            }
            reconciler.upsert_batch(&periodic)
        })
        .await;
        match stored {
            Ok(report) if report.failed > 0 => {
                tracing::warn!(failed = report.failed, errors = ?report.errors, "some observations were not stored");
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(%error, "store task failed"),
        }
    }

    async fn write_cache(&self, observation: &Observation) {
        let key = observation.entity.id();
        let ttl = self.ttl_for(&observation.entity);
        let payload = match serde_json::to_string(observation) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(entity = %key, %error, "failed to encode cache entry");
                return;
            }
        };
        tracing::debug!(entity = %key, ttl_secs = ttl.as_secs(), "caching observation");
        if let Err(error) = self.cache.set(&key, payload, ttl).await {
            tracing::warn!(entity = %key, %error, "cache write failed");
        }
    }

    /// Pull up to `periods` past observations from the first history-capable
    /// provider that answers and reconcile them into the store.
    pub async fn backfill(&self, entity: &Entity, periods: u32) -> Result<BackfillReport, CoreError> {
        let unavailable = |detail: String| CoreError::Unavailable {
            entity: entity.id(),
            detail,
        };
        let Some(reconciler) = self.reconciler.clone() else {
            return Err(unavailable(String::from("no store is configured")));
        };
        if periods == 0 {
            return Err(unavailable(String::from("backfill needs at least one period")));
        }

        let ctx = RequestContext::new(self.clock.now(), Arc::clone(&self.calendar));
        let mut failures = Vec::new();
        for &provider_id in self.registry.attempt_order(entity.class()) {
            let Some(history) = self.providers.get(&provider_id).and_then(|provider| provider.history()) else {
                continue;
            };
            if let Some(throttle) = self.throttles.get(provider_id) {
                throttle.admit().await;
            }

            let observations = match history.fetch_history(entity, periods, &ctx).await {
                Ok(observations) => observations,
                Err(error) => {
                    tracing::warn!(provider = %provider_id, entity = %entity, %error, "history fetch failed");
                    failures.push(format!("{provider_id}: {error}"));
                    continue;
                }
            };

            let valid: Vec<Observation> = observations
                .into_iter()
                .filter_map(|observation| match accept(provider_id, entity, observation) {
                    Ok(observation) => Some(observation),
                    Err(error) => {
                        tracing::debug!(provider = %provider_id, %error, "dropping invalid history row");
                        None
                    }
                })
                .collect();
            let fetched = valid.len();
            let store = reconciler.clone();
            let report = tokio::task::spawn_blocking(move || store.upsert_batch(&valid)).await?;
            tracing::info!(
                provider = %provider_id,
                entity = %entity,
                fetched,
                written = report.written,
                "history backfilled"
            );
            return Ok(BackfillReport {
                entity_id: entity.id(),
                source: provider_id,
                fetched,
                written: report.written,
                skipped: report.skipped,
                failed: report.failed,
            });
        }

        Err(unavailable(if failures.is_empty() {
            String::from("no history-capable provider is configured")
        } else {
            failures.join("; ")
        }))
    }
}

/// Check a provider answer before it is accepted for `requested`.
fn accept(
    provider_id: ProviderId,
    requested: &Entity,
    mut observation: Observation,
) -> Result<Observation, SourceError> {
    observation.validate()?;
    if observation.entity != *requested {
        return Err(SourceError::invalid_response(format!(
            "{provider_id} answered '{}' for '{requested}'",
            observation.entity
        )));
    }
    if observation.source != provider_id {
        return Err(SourceError::invalid_response(format!(
            "{provider_id} tagged its observation as '{}'",
            observation.source
        )));
    }

    let mut entity = requested.clone();
    if let Some(name) = observation.entity.name() {
        entity = entity.with_name(name);
    }
    observation.entity = entity;
    Ok(observation)
}

fn fail_each(
    targets: &[Entity],
    error: &SourceError,
) -> Vec<(Entity, Result<Observation, SourceError>)> {
    targets
        .iter()
        .map(|entity| (entity.clone(), Err(error.clone())))
        .collect()
}

async fn await_in_flight(
    entity: Entity,
    pending: InFlight,
    deadline: Option<Instant>,
) -> (Entity, RouteResult) {
    let outcome = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, pending).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return (
                    entity,
                    Err(RouteFailure::without_attempts(FailureReason::DeadlineExceeded)),
                )
            }
        },
        None => pending.await,
    };
    let result =
        outcome.unwrap_or_else(|_| Err(RouteFailure::without_attempts(FailureReason::Cancelled)));
    (entity, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ObservationValue, Period, UtcDateTime};

    fn usd_cny(source: ProviderId, rate: f64) -> Observation {
        Observation {
            entity: Entity::rate("USD", "CNY").expect("entity"),
            period: Period::parse("2026-03").expect("period"),
            value: ObservationValue::rate(rate),
            source,
            fetched_at: UtcDateTime::parse("2026-03-10T02:00:00Z").expect("timestamp"),
        }
    }

    #[test]
    fn accept_rejects_foreign_entities_and_mislabelled_sources() {
        let requested = Entity::rate("USD", "CNY").expect("entity");

        let accepted = accept(ProviderId::Frankfurter, &requested, usd_cny(ProviderId::Frankfurter, 7.19))
            .expect("valid answer");
        assert_eq!(accepted.entity, requested);

        let other = Entity::rate("EUR", "CNY").expect("entity");
        let error = accept(ProviderId::Frankfurter, &other, usd_cny(ProviderId::Frankfurter, 7.19))
            .expect_err("foreign entity");
        assert_eq!(error.code(), "source.invalid_response");

        let error = accept(ProviderId::Frankfurter, &requested, usd_cny(ProviderId::Sina, 7.19))
            .expect_err("wrong source tag");
        assert_eq!(error.code(), "source.invalid_response");
    }

    #[test]
    fn accept_rejects_non_positive_values() {
        let requested = Entity::rate("USD", "CNY").expect("entity");
        let error = accept(ProviderId::Frankfurter, &requested, usd_cny(ProviderId::Frankfurter, 0.0))
            .expect_err("zero rate");
        assert_eq!(error.code(), "source.validation");
    }

    #[test]
    fn accept_keeps_the_provider_display_name() {
        let requested = Entity::quote("SH600519", None).expect("entity");
        let observation = Observation {
            entity: requested.clone().with_name("Kweichow Moutai"),
            period: Period::parse("2026-03-10").expect("period"),
            value: ObservationValue::quote(1520.5),
            source: ProviderId::Eastmoney,
            fetched_at: UtcDateTime::parse("2026-03-10T02:00:00Z").expect("timestamp"),
        };

        let accepted = accept(ProviderId::Eastmoney, &requested, observation).expect("valid answer");
        assert_eq!(accepted.entity.name(), Some("Kweichow Moutai"));
        assert_eq!(accepted.entity.market(), requested.market());
    }

    #[tokio::test]
    async fn empty_chain_fails_with_no_providers() {
        let orchestrator = FetchOrchestrator::builder(SourceRegistry::builder().build()).build();
        let entity = Entity::reserve("CHN").expect("entity");

        let failure = orchestrator
            .fetch_one(&entity, FetchOptions::default())
            .await
            .expect_err("nothing configured");
        assert_eq!(failure.reason, FailureReason::NoProviders);
        assert!(failure.source_chain.is_empty());
    }

    #[tokio::test]
    async fn unregistered_chain_members_are_recorded_and_skipped() {
        let registry = SourceRegistry::builder()
            .chain(EntityClass::Rate, [ProviderId::Frankfurter, ProviderId::ExchangeRateApi])
            .build();
        let orchestrator = FetchOrchestrator::builder(registry).build();
        let entity = Entity::rate("USD", "CNY").expect("entity");

        let failure = orchestrator
            .fetch_one(&entity, FetchOptions::default().with_mode(CacheMode::Bypass))
            .await
            .expect_err("no adapters registered");
        assert_eq!(failure.reason, FailureReason::AllProvidersFailed);
        assert_eq!(
            failure.source_chain,
            vec![ProviderId::Frankfurter, ProviderId::ExchangeRateApi]
        );
        assert!(failure
            .errors
            .iter()
            .all(|attempt| attempt.error.code() == "source.provider_not_registered"));
    }
}
