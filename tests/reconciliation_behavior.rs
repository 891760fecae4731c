//! Behavior tests for reconciling periodic observations into the store.

use aurum_core::{
    DeltaHorizon, Entity, EntityClass, Observation, ObservationValue, Period, ProviderId,
    Reconciler, UpsertOutcome, UtcDateTime, WarehouseConfig,
};

fn china() -> Entity {
    Entity::reserve("CHN").expect("entity")
}

fn reserve(entity: &Entity, period: &str, tonnes: f64, fetched_at: &str) -> Observation {
    Observation::new(
        entity.clone(),
        Period::parse(period).expect("period"),
        ObservationValue::reserve(tonnes),
        ProviderId::Imf,
        UtcDateTime::parse(fetched_at).expect("timestamp"),
    )
    .expect("observation")
}

// =============================================================================
// Last write wins
// =============================================================================

#[test]
fn upserting_the_same_period_twice_keeps_one_row_with_the_later_values() {
    // Given: an empty store
    let store = Reconciler::in_memory().expect("store");
    let entity = china();

    // When: the same month is written twice, the second fetch being later
    let first = store
        .upsert(&reserve(&entity, "2025-11", 2279.56, "2025-12-05T00:00:00Z"))
        .expect("first write");
    let second = store
        .upsert(&reserve(&entity, "2025-11", 2284.55, "2025-12-20T00:00:00Z"))
        .expect("second write");

    // Then: one row, carrying the second write
    assert_eq!(first, UpsertOutcome::Written);
    assert_eq!(second, UpsertOutcome::Written);
    assert_eq!(
        store
            .warehouse()
            .observation_count(&entity.id())
            .expect("count"),
        1
    );
    let latest = store.latest(&entity).expect("read").expect("stored");
    assert_eq!(latest.primary_value(), 2284.55);
}

#[test]
fn an_older_fetch_arriving_late_is_skipped() {
    // Given: a row fetched on the 20th
    let store = Reconciler::in_memory().expect("store");
    let entity = china();
    store
        .upsert(&reserve(&entity, "2025-11", 2284.55, "2025-12-20T00:00:00Z"))
        .expect("write");

    // When: a fetch from the 5th is reconciled afterwards
    let outcome = store
        .upsert(&reserve(&entity, "2025-11", 2279.56, "2025-12-05T00:00:00Z"))
        .expect("write");

    // Then: the stored row is unchanged
    assert_eq!(outcome, UpsertOutcome::Skipped);
    let latest = store.latest(&entity).expect("read").expect("stored");
    assert_eq!(latest.primary_value(), 2284.55);
}

#[test]
fn an_equal_fetch_time_replaces_the_row() {
    let store = Reconciler::in_memory().expect("store");
    let entity = china();
    store
        .upsert(&reserve(&entity, "2025-11", 2279.56, "2025-12-05T00:00:00Z"))
        .expect("write");

    let outcome = store
        .upsert(&reserve(&entity, "2025-11", 2284.55, "2025-12-05T00:00:00Z"))
        .expect("write");

    assert_eq!(outcome, UpsertOutcome::Written);
    let latest = store.latest(&entity).expect("read").expect("stored");
    assert_eq!(latest.primary_value(), 2284.55);
}

// =============================================================================
// Batches and audit
// =============================================================================

#[test]
fn batch_counts_written_skipped_and_failed_rows_and_logs_one_audit_row() {
    // Given: a stored row and a batch with a new row, a stale row and a bad row
    let store = Reconciler::in_memory().expect("store");
    let entity = china();
    store
        .upsert(&reserve(&entity, "2025-11", 2284.55, "2025-12-20T00:00:00Z"))
        .expect("write");
    let mut corrupt = reserve(&entity, "2025-12", 2298.55, "2026-01-10T00:00:00Z");
    corrupt.value = ObservationValue::reserve(f64::NAN);
    let batch = vec![
        reserve(&entity, "2025-10", 2264.28, "2025-11-10T00:00:00Z"),
        reserve(&entity, "2025-11", 2279.56, "2025-12-05T00:00:00Z"),
        corrupt,
    ];

    // When
    let report = store.upsert_batch(&batch);

    // Then: each row is reported on its own and the batch is audited once
    assert_eq!(report.written, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(
        store
            .warehouse()
            .ingest_count(EntityClass::Reserve.as_str())
            .expect("count"),
        1
    );
}

// =============================================================================
// Deltas
// =============================================================================

#[test]
fn one_month_delta_uses_the_nearest_earlier_period_when_a_month_is_missing() {
    // Given: January and March stored, February missing
    let store = Reconciler::in_memory().expect("store");
    let entity = china();
    store
        .upsert_batch(&[
            reserve(&entity, "2024-01", 2235.39, "2024-02-10T00:00:00Z"),
            reserve(&entity, "2024-03", 2257.47, "2024-04-10T00:00:00Z"),
        ]);

    // When: deltas are read for the latest month
    let views = store
        .latest_with_deltas(EntityClass::Reserve)
        .expect("deltas");

    // Then: the 1m delta is measured against January, the 1y delta is absent
    assert_eq!(views.len(), 1);
    let view = &views[0];
    assert_eq!(view.observation.period.key(), "2024-03");

    let month = view.delta("1m").expect("1m delta");
    assert_eq!(month.reference_period.map(Period::key).as_deref(), Some("2024-01"));
    let change = month.value.expect("1m value");
    assert!((change - 22.08).abs() < 1e-9, "unexpected change {change}");

    let year = view.delta("1y").expect("1y delta");
    assert!(year.reference_period.is_none());
    assert!(year.value.is_none());
}

#[test]
fn year_delta_spans_twelve_monthly_periods() {
    let store = Reconciler::in_memory().expect("store");
    let entity = china();
    store
        .upsert_batch(&[
            reserve(&entity, "2024-11", 2264.35, "2024-12-10T00:00:00Z"),
            reserve(&entity, "2025-11", 2284.55, "2025-12-10T00:00:00Z"),
        ]);

    let latest = store.latest(&entity).expect("read").expect("stored");
    let deltas = store.deltas_for(&latest).expect("deltas");

    let year = deltas
        .iter()
        .find(|delta| delta.label == "1y")
        .expect("1y delta");
    assert_eq!(year.reference_period.map(Period::key).as_deref(), Some("2024-11"));
    assert!((year.value.expect("value") - 20.2).abs() < 1e-9);
}

#[test]
fn history_is_newest_first_and_limited() {
    let store = Reconciler::in_memory().expect("store");
    let entity = china();
    store
        .upsert_batch(&[
            reserve(&entity, "2025-09", 2298.0, "2025-10-10T00:00:00Z"),
            reserve(&entity, "2025-11", 2300.0, "2025-12-10T00:00:00Z"),
            reserve(&entity, "2025-10", 2299.0, "2025-11-10T00:00:00Z"),
        ]);

    let history = store.history(&entity, 2).expect("history");

    let periods: Vec<String> = history.iter().map(|row| row.period.key()).collect();
    assert_eq!(periods, vec!["2025-11", "2025-10"]);
}

// =============================================================================
// Durability and watchlist
// =============================================================================

#[test]
fn rows_survive_reopening_a_file_backed_store() {
    // Given: a store on disk with one row
    let dir = tempfile::tempdir().expect("tempdir");
    let config = WarehouseConfig {
        db_path: Some(dir.path().join("aurum.duckdb")),
        max_pool_size: 2,
    };
    let entity = china();
    {
        let store = Reconciler::open(config.clone(), DeltaHorizon::defaults()).expect("open");
        store
            .upsert(&reserve(&entity, "2025-11", 2284.55, "2025-12-20T00:00:00Z"))
            .expect("write");
    }

    // When
    let reopened = Reconciler::open(config, DeltaHorizon::defaults()).expect("reopen");

    // Then
    let latest = reopened.latest(&entity).expect("read").expect("stored");
    assert_eq!(latest.primary_value(), 2284.55);
    assert_eq!(latest.source, ProviderId::Imf);
}

#[test]
fn watched_entities_pick_up_names_from_fetched_observations() {
    // Given: a watched quote without a display name
    let store = Reconciler::in_memory().expect("store");
    let moutai = Entity::quote("SH600519", None).expect("entity");
    store.register(&moutai).expect("register");
    store
        .register(&Entity::rate("USD", "CNY").expect("entity"))
        .expect("register");

    // When: a fetch reports the name
    let fetched = Observation::new(
        moutai.clone().with_name("Kweichow Moutai"),
        Period::parse("2026-03-10").expect("period"),
        ObservationValue::quote(1520.5),
        ProviderId::Eastmoney,
        UtcDateTime::parse("2026-03-10T02:00:00Z").expect("timestamp"),
    )
    .expect("observation");
    let updated = store.refresh_names(&[fetched]).expect("refresh");

    // Then: the watchlist carries the name and class filtering still works
    assert_eq!(updated, 1);
    let quotes = store.watchlist(Some(EntityClass::Quote)).expect("list");
    assert_eq!(quotes.len(), 1);
    assert_eq!(quotes[0].name(), Some("Kweichow Moutai"));
    assert_eq!(store.watchlist(None).expect("list").len(), 2);
}
