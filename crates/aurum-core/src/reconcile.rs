//! Reconciliation of observations into the durable store.
//!
//! [`Reconciler`] maps domain observations onto warehouse rows keyed by
//! `(entity id, period)` and answers the read queries built on them. Deltas
//! are derived on read and never stored.
//!
//! A delta for horizon `h` compares the latest observation with the most
//! recent stored observation whose period ordinal is at most
//! `latest.ordinal - h`. Missing periods are tolerated; when nothing old
//! enough exists the delta is absent rather than zero.
//!
//! All methods block on DuckDB. Async callers run them through
//! `tokio::task::spawn_blocking`.

use std::collections::BTreeMap;
use std::time::Instant;

use aurum_warehouse::{
    EntityRecord, IngestLogEntry, ObservationRecord, UpsertOutcome, UpsertReport, Warehouse,
    WarehouseConfig,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    CoreError, Entity, EntityClass, Market, Observation, ObservationValue, Period, ProviderId,
    UtcDateTime,
};

/// Named lookback distance, in periods of the entity's granularity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaHorizon {
    pub label: String,
    pub periods: u32,
}

impl DeltaHorizon {
    pub fn new(label: impl Into<String>, periods: u32) -> Self {
        Self {
            label: label.into(),
            periods,
        }
    }

    /// One period back and twelve periods back.
    pub fn defaults() -> Vec<Self> {
        vec![Self::new("1m", 1), Self::new("1y", 12)]
    }
}

/// Change of the primary value against one horizon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delta {
    pub label: String,
    pub horizon: u32,
    /// Period of the observation the change was measured against.
    pub reference_period: Option<Period>,
    /// `latest - reference`; `None` when no reference exists.
    pub value: Option<f64>,
}

/// Latest observation of an entity with its deltas.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaView {
    pub observation: Observation,
    pub deltas: Vec<Delta>,
}

impl DeltaView {
    pub fn delta(&self, label: &str) -> Option<&Delta> {
        self.deltas.iter().find(|delta| delta.label == label)
    }
}

/// Domain-level facade over the warehouse.
#[derive(Clone)]
pub struct Reconciler {
    warehouse: Warehouse,
    horizons: Vec<DeltaHorizon>,
}

impl Reconciler {
    pub fn new(warehouse: Warehouse, horizons: Vec<DeltaHorizon>) -> Self {
        Self {
            warehouse,
            horizons,
        }
    }

    pub fn open(config: WarehouseConfig, horizons: Vec<DeltaHorizon>) -> Result<Self, CoreError> {
        Ok(Self::new(Warehouse::open(config)?, horizons))
    }

    pub fn in_memory() -> Result<Self, CoreError> {
        Self::open(WarehouseConfig::in_memory(), DeltaHorizon::defaults())
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    pub fn horizons(&self) -> &[DeltaHorizon] {
        &self.horizons
    }

    /// Idempotent write keyed by `(entity id, period)`; the later fetch wins.
    pub fn upsert(&self, observation: &Observation) -> Result<UpsertOutcome, CoreError> {
        observation.validate()?;
        let record = to_record(observation)?;
        Ok(self.warehouse.upsert_observation(&record)?)
    }

    /// Upsert every observation independently and log one audit row per class.
    ///
    /// Partial success is reported through the counts, not as an error. A
    /// failed audit write is logged and carried in `audit_error`; the rows it
    /// describes stay committed.
    pub fn upsert_batch(&self, observations: &[Observation]) -> UpsertReport {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let mut by_class: BTreeMap<EntityClass, Vec<&Observation>> = BTreeMap::new();
        for observation in observations {
            by_class
                .entry(observation.entity.class())
                .or_default()
                .push(observation);
        }

        let mut total = UpsertReport::default();
        for (class, batch) in by_class {
            let mut report = UpsertReport::default();
            for observation in &batch {
                let outcome = observation
                    .validate()
                    .map_err(CoreError::from)
                    .and_then(|()| to_record(observation))
                    .and_then(|record| Ok(self.warehouse.upsert_observation(&record)?));
                match outcome {
                    Ok(outcome) => report.record(&Ok(outcome)),
                    Err(error) => {
                        report.failed += 1;
                        report.errors.push(error.to_string());
                    }
                }
            }

            let source = single_source(&batch).map(|source| source.as_str().to_owned());
            let entry = IngestLogEntry {
                request_id: request_id.clone(),
                entity_class: class.as_str().to_owned(),
                source,
                latency_ms: Some(started.elapsed().as_millis() as u64),
            };
            if let Err(error) = self.warehouse.record_ingest(&entry, &report) {
                tracing::warn!(
                    class = class.as_str(),
                    request_id = %request_id,
                    %error,
                    "ingest audit row was not written"
                );
                total.audit_error = Some(error.to_string());
            }
            tracing::debug!(
                class = class.as_str(),
                written = report.written,
                skipped = report.skipped,
                failed = report.failed,
                "store batch reconciled"
            );

            total.written += report.written;
            total.skipped += report.skipped;
            total.failed += report.failed;
            total.errors.extend(report.errors);
        }
        total
    }

    pub fn latest(&self, entity: &Entity) -> Result<Option<Observation>, CoreError> {
        self.warehouse
            .latest_observation(&entity.id())?
            .map(|record| from_record(&record))
            .transpose()
    }

    /// Latest observation of every stored entity of `class` with its deltas.
    pub fn latest_with_deltas(&self, class: EntityClass) -> Result<Vec<DeltaView>, CoreError> {
        self.warehouse
            .latest_observations_by_class(class.as_str())?
            .iter()
            .map(|record| -> Result<DeltaView, CoreError> {
                let observation = from_record(record)?;
                let deltas = self.deltas_for(&observation)?;
                Ok(DeltaView {
                    observation,
                    deltas,
                })
            })
            .collect()
    }

    /// Deltas of `observation` against every configured horizon.
    pub fn deltas_for(&self, observation: &Observation) -> Result<Vec<Delta>, CoreError> {
        let entity_id = observation.entity.id();
        let latest_ord = observation.period.ordinal();
        self.horizons
            .iter()
            .map(|horizon| -> Result<Delta, CoreError> {
                let max_ord = latest_ord - i64::from(horizon.periods);
                let reference = self
                    .warehouse
                    .observation_at_or_before(&entity_id, max_ord)?
                    .map(|record| from_record(&record))
                    .transpose()?;
                Ok(Delta {
                    label: horizon.label.clone(),
                    horizon: horizon.periods,
                    reference_period: reference.as_ref().map(|reference| reference.period),
                    value: reference.map(|reference| {
                        observation.primary_value() - reference.primary_value()
                    }),
                })
            })
            .collect()
    }

    /// Up to `limit` observations, most recent period first.
    pub fn history(&self, entity: &Entity, limit: usize) -> Result<Vec<Observation>, CoreError> {
        self.warehouse
            .observation_history(&entity.id(), limit)?
            .iter()
            .map(from_record)
            .collect()
    }

    pub fn register(&self, entity: &Entity) -> Result<(), CoreError> {
        let record = EntityRecord {
            entity_id: entity.id(),
            entity_class: entity.class().as_str().to_owned(),
            code: entity.code().to_owned(),
            market: entity.market().as_str().to_owned(),
            name: entity.name().map(str::to_owned),
        };
        Ok(self.warehouse.register_entity(&record)?)
    }

    /// Copy display names from fetched observations onto watched entities.
    pub fn refresh_names(&self, observations: &[Observation]) -> Result<usize, CoreError> {
        let mut updated = 0;
        for observation in observations {
            let Some(name) = observation.entity.name() else {
                continue;
            };
            if self
                .warehouse
                .refresh_entity_name(&observation.entity.id(), name)?
            {
                updated += 1;
            }
        }
        Ok(updated)
    }

    pub fn unregister(&self, entity: &Entity) -> Result<bool, CoreError> {
        Ok(self.warehouse.unregister_entity(&entity.id())?)
    }

    pub fn watchlist(&self, class: Option<EntityClass>) -> Result<Vec<Entity>, CoreError> {
        self.warehouse
            .list_entities(class.map(EntityClass::as_str))?
            .iter()
            .map(|record| -> Result<Entity, CoreError> {
                let class: EntityClass = record.entity_class.parse()?;
                let market: Market = record.market.parse()?;
                let entity = Entity::from_code(class, &record.code, Some(market))?;
                Ok(match &record.name {
                    Some(name) => entity.with_name(name.clone()),
                    None => entity,
                })
            })
            .collect()
    }
}

fn single_source(batch: &[&Observation]) -> Option<ProviderId> {
    let first = batch.first()?.source;
    batch
        .iter()
        .all(|observation| observation.source == first)
        .then_some(first)
}

fn to_record(observation: &Observation) -> Result<ObservationRecord, CoreError> {
    let entity = &observation.entity;
    Ok(ObservationRecord {
        entity_id: entity.id(),
        entity_class: entity.class().as_str().to_owned(),
        code: entity.code().to_owned(),
        market: entity.market().as_str().to_owned(),
        name: entity.name().map(str::to_owned),
        period_key: observation.period.key(),
        period_ord: observation.period.ordinal(),
        value: observation.primary_value(),
        detail: serde_json::to_string(&observation.value)?,
        source: observation.source.as_str().to_owned(),
        fetched_at_ms: observation.fetched_at.unix_millis(),
    })
}

fn from_record(record: &ObservationRecord) -> Result<Observation, CoreError> {
    let class: EntityClass = record.entity_class.parse()?;
    let market: Market = record.market.parse()?;
    let mut entity = Entity::from_code(class, &record.code, Some(market))?;
    if let Some(name) = &record.name {
        entity = entity.with_name(name.clone());
    }
    let value: ObservationValue = serde_json::from_str(&record.detail)?;
    Ok(Observation {
        entity,
        period: Period::from_ordinal(class.granularity(), record.period_ord)?,
        value,
        source: record.source.parse()?,
        fetched_at: UtcDateTime::from_unix_millis(record.fetched_at_ms)?,
    })
}
