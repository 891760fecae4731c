use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use ::duckdb::{Connection, OptionalExt, Row, ToSql};
use serde::Serialize;

use crate::{finalize_transaction, AccessMode, Warehouse, WarehouseError};

const MAX_CONFLICT_ATTEMPTS: u32 = 5;
const CONFLICT_BACKOFF: Duration = Duration::from_millis(5);
const WRITE_STRIPES: usize = 64;

const OBSERVATION_COLUMNS: &str = "entity_id, entity_class, code, market, name, period_key, \
     period_ord, value, detail, source, fetched_at_ms";

/// Stored shape of one observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationRecord {
    pub entity_id: String,
    pub entity_class: String,
    pub code: String,
    pub market: String,
    pub name: Option<String>,
    /// Human readable period, unique per entity.
    pub period_key: String,
    /// Monotonic period index used for ordering and horizon arithmetic.
    pub period_ord: i64,
    /// Primary value (price, rate or tonnes).
    pub value: f64,
    /// JSON encoded full value.
    pub detail: String,
    pub source: String,
    pub fetched_at_ms: i64,
}

/// Result of a single upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// The row was inserted or replaced.
    Written,
    /// A row fetched later than the incoming one is already stored.
    Skipped,
}

/// Counts for a batch upsert where each row is its own transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    /// Set when the rows were stored but the audit row could not be written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_error: Option<String>,
}

impl UpsertReport {
    pub fn record(&mut self, outcome: &Result<UpsertOutcome, WarehouseError>) {
        match outcome {
            Ok(UpsertOutcome::Written) => self.written += 1,
            Ok(UpsertOutcome::Skipped) => self.skipped += 1,
            Err(error) => {
                self.failed += 1;
                self.errors.push(error.to_string());
            }
        }
    }
}

/// Audit row describing one store batch.
#[derive(Debug, Clone)]
pub struct IngestLogEntry {
    pub request_id: String,
    pub entity_class: String,
    pub source: Option<String>,
    pub latency_ms: Option<u64>,
}

/// Striped locks serializing writers of the same `(entity_id, period_key)`
/// within one process.
pub(crate) struct WriteStripes {
    stripes: Vec<Mutex<()>>,
}

impl WriteStripes {
    pub(crate) fn new() -> Self {
        Self {
            stripes: (0..WRITE_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn lock(&self, entity_id: &str, period_key: &str) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        (entity_id, period_key).hash(&mut hasher);
        let index = (hasher.finish() % self.stripes.len() as u64) as usize;
        // The guarded value is empty, so a poisoned stripe is still usable.
        self.stripes[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Warehouse {
    /// Merge one observation into the store.
    ///
    /// The stored row is replaced when the incoming `fetched_at_ms` is at least
    /// as recent as the stored one. Writers of the same key in this process
    /// take turns; a transaction that still loses to another writer (another
    /// process on the same file) is rolled back and rerun, re-reading the
    /// stored fetch time each time.
    pub fn upsert_observation(
        &self,
        record: &ObservationRecord,
    ) -> Result<UpsertOutcome, WarehouseError> {
        validate_record(record)?;
        let _turn = self.write_stripes.lock(&record.entity_id, &record.period_key);
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        retry_write_conflicts(record, || upsert_once(&connection, record))
    }

    /// Upsert each record independently; failures do not undo earlier rows.
    pub fn upsert_observations(&self, records: &[ObservationRecord]) -> UpsertReport {
        let mut report = UpsertReport::default();
        for record in records {
            let outcome = self.upsert_observation(record);
            report.record(&outcome);
        }
        report
    }

    /// Append an audit row for a finished batch.
    pub fn record_ingest(
        &self,
        entry: &IngestLogEntry,
        report: &UpsertReport,
    ) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        let written = report.written as i64;
        let skipped = report.skipped as i64;
        let failed = report.failed as i64;
        let latency_ms = entry.latency_ms.map(|value| value as i64);
        let params: [&dyn ToSql; 7] = [
            &entry.request_id,
            &entry.entity_class,
            &entry.source,
            &written,
            &skipped,
            &failed,
            &latency_ms,
        ];
        connection.execute(
            "INSERT INTO ingest_log \
             (request_id, entity_class, source, written, skipped, failed, latency_ms, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Number of audit rows for a class.
    pub fn ingest_count(&self, entity_class: &str) -> Result<u64, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let params: [&dyn ToSql; 1] = [&entity_class];
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM ingest_log WHERE entity_class = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Highest-period row of one entity.
    pub fn latest_observation(
        &self,
        entity_id: &str,
    ) -> Result<Option<ObservationRecord>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let sql = format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations \
             WHERE entity_id = ? ORDER BY period_ord DESC LIMIT 1"
        );
        let params: [&dyn ToSql; 1] = [&entity_id];
        let record = connection
            .query_row(sql.as_str(), params.as_slice(), read_observation)
            .optional()?;
        Ok(record)
    }

    /// Latest row of every entity in a class.
    pub fn latest_observations_by_class(
        &self,
        entity_class: &str,
    ) -> Result<Vec<ObservationRecord>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let sql = format!(
            "SELECT {OBSERVATION_COLUMNS} FROM v_latest_observations \
             WHERE entity_class = ? ORDER BY entity_id"
        );
        let params: [&dyn ToSql; 1] = [&entity_class];
        let mut statement = connection.prepare(sql.as_str())?;
        let rows = statement.query_map(params.as_slice(), read_observation)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Most recent row whose period ordinal is at or before `max_period_ord`.
    pub fn observation_at_or_before(
        &self,
        entity_id: &str,
        max_period_ord: i64,
    ) -> Result<Option<ObservationRecord>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let sql = format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations \
             WHERE entity_id = ? AND period_ord <= ? \
             ORDER BY period_ord DESC LIMIT 1"
        );
        let params: [&dyn ToSql; 2] = [&entity_id, &max_period_ord];
        let record = connection
            .query_row(sql.as_str(), params.as_slice(), read_observation)
            .optional()?;
        Ok(record)
    }

    /// Up to `limit` rows of one entity, most recent period first.
    pub fn observation_history(
        &self,
        entity_id: &str,
        limit: usize,
    ) -> Result<Vec<ObservationRecord>, WarehouseError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let sql = format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations \
             WHERE entity_id = ? ORDER BY period_ord DESC LIMIT ?"
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let params: [&dyn ToSql; 2] = [&entity_id, &limit];
        let mut statement = connection.prepare(sql.as_str())?;
        let rows = statement.query_map(params.as_slice(), read_observation)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Number of stored rows for one entity.
    pub fn observation_count(&self, entity_id: &str) -> Result<u64, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let params: [&dyn ToSql; 1] = [&entity_id];
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM observations WHERE entity_id = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

fn upsert_once(
    connection: &Connection,
    record: &ObservationRecord,
) -> Result<UpsertOutcome, WarehouseError> {
    connection.execute_batch("BEGIN TRANSACTION")?;
    let result = (|| -> Result<UpsertOutcome, WarehouseError> {
        let key: [&dyn ToSql; 2] = [&record.entity_id, &record.period_key];
        let stored_fetched_at: Option<i64> = connection
            .query_row(
                "SELECT fetched_at_ms FROM observations WHERE entity_id = ? AND period_key = ?",
                key.as_slice(),
                |row| row.get(0),
            )
            .optional()?;

        if stored_fetched_at.is_some_and(|stored| stored > record.fetched_at_ms) {
            return Ok(UpsertOutcome::Skipped);
        }

        let params: [&dyn ToSql; 11] = [
            &record.entity_id,
            &record.entity_class,
            &record.code,
            &record.market,
            &record.name,
            &record.period_key,
            &record.period_ord,
            &record.value,
            &record.detail,
            &record.source,
            &record.fetched_at_ms,
        ];
        let sql = format!(
            "INSERT OR REPLACE INTO observations ({OBSERVATION_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        connection.execute(sql.as_str(), params.as_slice())?;
        Ok(UpsertOutcome::Written)
    })();

    finalize_transaction(connection, result)
}

fn validate_record(record: &ObservationRecord) -> Result<(), WarehouseError> {
    if record.entity_id.trim().is_empty() || record.period_key.trim().is_empty() {
        return Err(WarehouseError::Rejected(String::from(
            "entity_id and period_key must not be empty",
        )));
    }
    if !record.value.is_finite() {
        return Err(WarehouseError::Rejected(format!(
            "value for '{}' period '{}' is not finite",
            record.entity_id, record.period_key
        )));
    }
    Ok(())
}

/// Run `write` until it stops losing to concurrent writers.
fn retry_write_conflicts<T>(
    record: &ObservationRecord,
    mut write: impl FnMut() -> Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    let mut attempt = 1;
    loop {
        match write() {
            Err(WarehouseError::DuckDb(error)) if is_write_conflict(&error) => {
                if attempt >= MAX_CONFLICT_ATTEMPTS {
                    return Err(WarehouseError::Conflict {
                        entity_id: record.entity_id.clone(),
                        period_key: record.period_key.clone(),
                        attempts: attempt,
                    });
                }
                thread::sleep(CONFLICT_BACKOFF * attempt);
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// DuckDB reports a lost race either as a transaction conflict or, when both
/// writers inserted the same key, as a duplicate key at commit time.
fn is_write_conflict(error: &::duckdb::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("conflict")
        || (message.contains("constraint violation") && message.contains("duplicate key"))
}

fn read_observation(row: &Row<'_>) -> Result<ObservationRecord, ::duckdb::Error> {
    Ok(ObservationRecord {
        entity_id: row.get(0)?,
        entity_class: row.get(1)?,
        code: row.get(2)?,
        market: row.get(3)?,
        name: row.get(4)?,
        period_key: row.get(5)?,
        period_ord: row.get(6)?,
        value: row.get(7)?,
        detail: row.get(8)?,
        source: row.get(9)?,
        fetched_at_ms: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WarehouseConfig;

    fn record(period_key: &str, period_ord: i64, value: f64, fetched_at_ms: i64) -> ObservationRecord {
        ObservationRecord {
            entity_id: String::from("reserve:CHN"),
            entity_class: String::from("reserve"),
            code: String::from("CHN"),
            market: String::from("GLOBAL"),
            name: Some(String::from("China")),
            period_key: period_key.to_string(),
            period_ord,
            value,
            detail: String::from("{}"),
            source: String::from("imf"),
            fetched_at_ms,
        }
    }

    fn warehouse() -> Warehouse {
        Warehouse::open(WarehouseConfig::in_memory()).expect("open in-memory warehouse")
    }

    #[test]
    fn second_write_for_same_period_replaces_the_first() {
        let warehouse = warehouse();

        let first = warehouse
            .upsert_observation(&record("2025-11", 24310, 2290.0, 1_000))
            .expect("first upsert");
        let second = warehouse
            .upsert_observation(&record("2025-11", 24310, 2298.5, 2_000))
            .expect("second upsert");

        assert_eq!(first, UpsertOutcome::Written);
        assert_eq!(second, UpsertOutcome::Written);
        assert_eq!(warehouse.observation_count("reserve:CHN").expect("count"), 1);
        let latest = warehouse
            .latest_observation("reserve:CHN")
            .expect("latest")
            .expect("row exists");
        assert_eq!(latest.value, 2298.5);
    }

    #[test]
    fn older_fetch_does_not_overwrite_newer_row() {
        let warehouse = warehouse();
        warehouse
            .upsert_observation(&record("2025-11", 24310, 2298.5, 5_000))
            .expect("newer");

        let outcome = warehouse
            .upsert_observation(&record("2025-11", 24310, 1.0, 4_000))
            .expect("older");

        assert_eq!(outcome, UpsertOutcome::Skipped);
        let latest = warehouse
            .latest_observation("reserve:CHN")
            .expect("latest")
            .expect("row exists");
        assert_eq!(latest.value, 2298.5);
    }

    #[test]
    fn at_or_before_lookup_skips_missing_periods() {
        let warehouse = warehouse();
        warehouse
            .upsert_observation(&record("2024-01", 24288, 100.0, 1))
            .expect("jan");
        warehouse
            .upsert_observation(&record("2024-03", 24290, 130.0, 1))
            .expect("mar");

        let reference = warehouse
            .observation_at_or_before("reserve:CHN", 24289)
            .expect("lookup")
            .expect("reference exists");
        assert_eq!(reference.period_key, "2024-01");

        assert!(warehouse
            .observation_at_or_before("reserve:CHN", 24287)
            .expect("lookup")
            .is_none());
    }

    #[test]
    fn history_is_most_recent_first_and_bounded() {
        let warehouse = warehouse();
        for (offset, key) in ["2024-01", "2024-02", "2024-03"].iter().enumerate() {
            warehouse
                .upsert_observation(&record(key, 24288 + offset as i64, 100.0, 1))
                .expect("upsert");
        }

        let history = warehouse
            .observation_history("reserve:CHN", 2)
            .expect("history");

        let keys: Vec<_> = history.iter().map(|row| row.period_key.as_str()).collect();
        assert_eq!(keys, vec!["2024-03", "2024-02"]);
    }

    #[test]
    fn batch_reports_rejected_rows_without_undoing_others() {
        let warehouse = warehouse();
        let rows = vec![
            record("2024-01", 24288, 100.0, 1),
            record("2024-02", 24289, f64::NAN, 1),
            record("2024-03", 24290, 120.0, 1),
        ];

        let report = warehouse.upsert_observations(&rows);

        assert_eq!(report.written, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(warehouse.observation_count("reserve:CHN").expect("count"), 2);
    }

    #[test]
    fn ingest_log_records_batches() {
        let warehouse = warehouse();
        let report = UpsertReport {
            written: 3,
            ..UpsertReport::default()
        };

        warehouse
            .record_ingest(
                &IngestLogEntry {
                    request_id: String::from("req-0001"),
                    entity_class: String::from("rate"),
                    source: Some(String::from("frankfurter")),
                    latency_ms: Some(12),
                },
                &report,
            )
            .expect("record ingest");

        assert_eq!(warehouse.ingest_count("rate").expect("count"), 1);
    }

    fn raise(connection: &Connection, message: &str) -> Result<(), WarehouseError> {
        let params: [&dyn ToSql; 1] = [&message];
        connection.query_row("SELECT error(?)", params.as_slice(), |row| {
            row.get::<_, Option<String>>(0)
        })?;
        Ok(())
    }

    const DUPLICATE_AT_COMMIT: &str = "Failed to commit: PRIMARY KEY or UNIQUE constraint \
         violation: duplicate key \"reserve:CHN, 2025-11\"";

    #[test]
    fn duplicate_key_at_commit_is_retried_until_the_write_lands() {
        let connection = Connection::open_in_memory().expect("connection");
        let row = record("2025-11", 24310, 2298.5, 1);
        let mut attempts = 0;

        let outcome = retry_write_conflicts(&row, || {
            attempts += 1;
            if attempts < 3 {
                raise(&connection, DUPLICATE_AT_COMMIT)?;
            }
            Ok(UpsertOutcome::Written)
        });

        assert_eq!(outcome.expect("third attempt lands"), UpsertOutcome::Written);
        assert_eq!(attempts, 3);
    }

    #[test]
    fn persistent_conflict_gives_up_after_the_attempt_budget() {
        let connection = Connection::open_in_memory().expect("connection");
        let row = record("2025-11", 24310, 2298.5, 1);
        let mut attempts = 0;

        let outcome: Result<UpsertOutcome, _> = retry_write_conflicts(&row, || {
            attempts += 1;
            raise(&connection, "TransactionContext Error: Catalog write-write conflict")?;
            Ok(UpsertOutcome::Written)
        });

        assert!(matches!(
            outcome,
            Err(WarehouseError::Conflict { attempts: MAX_CONFLICT_ATTEMPTS, .. })
        ));
        assert_eq!(attempts, MAX_CONFLICT_ATTEMPTS);
    }

    #[test]
    fn other_database_errors_are_not_retried() {
        let connection = Connection::open_in_memory().expect("connection");
        let row = record("2025-11", 24310, 2298.5, 1);
        let mut attempts = 0;

        let outcome: Result<UpsertOutcome, _> = retry_write_conflicts(&row, || {
            attempts += 1;
            raise(&connection, "disk is full")?;
            Ok(UpsertOutcome::Written)
        });

        assert!(matches!(outcome, Err(WarehouseError::DuckDb(_))));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn concurrent_upserts_of_one_key_never_fail_and_the_latest_fetch_wins() {
        // Given: a file-backed store shared by eight writers
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse =
            Warehouse::open(WarehouseConfig::file(temp.path().join("aurum.duckdb"))).expect("open");
        let writers: i64 = 8;

        for round in 0..20_i64 {
            // When: every writer upserts the same month with its own fetch time
            let errors: Vec<String> = thread::scope(|scope| {
                let handles: Vec<_> = (0..writers)
                    .map(|writer| {
                        let warehouse = &warehouse;
                        scope.spawn(move || {
                            let fetched_at_ms = round * 100 + writer;
                            warehouse.upsert_observation(&record(
                                "2025-11",
                                24310,
                                fetched_at_ms as f64,
                                fetched_at_ms,
                            ))
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .filter_map(|handle| handle.join().expect("writer thread").err())
                    .map(|error| error.to_string())
                    .collect()
            });

            // Then: nobody saw an error and the newest fetch is stored
            assert!(errors.is_empty(), "round {round} errors: {errors:?}");
            let latest = warehouse
                .latest_observation("reserve:CHN")
                .expect("latest")
                .expect("row exists");
            assert_eq!(latest.fetched_at_ms, round * 100 + writers - 1);
            assert_eq!(latest.value, (round * 100 + writers - 1) as f64);
        }
        assert_eq!(warehouse.observation_count("reserve:CHN").expect("count"), 1);
    }

    #[test]
    fn latest_by_class_returns_one_row_per_entity() {
        let warehouse = warehouse();
        warehouse
            .upsert_observation(&record("2024-01", 24288, 100.0, 1))
            .expect("chn jan");
        warehouse
            .upsert_observation(&record("2024-02", 24289, 110.0, 1))
            .expect("chn feb");
        let mut usa = record("2024-02", 24289, 8133.0, 1);
        usa.entity_id = String::from("reserve:USA");
        usa.code = String::from("USA");
        warehouse.upsert_observation(&usa).expect("usa");

        let latest = warehouse
            .latest_observations_by_class("reserve")
            .expect("latest by class");

        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].entity_id, "reserve:CHN");
        assert_eq!(latest[0].period_key, "2024-02");
    }
}
