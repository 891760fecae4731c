use serde::Serialize;
use time::UtcOffset;

use crate::{Observation, Period, UtcDateTime};

/// Staleness of an entity's stored monthly series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Freshness {
    /// Latest stored period is at or after the expected one.
    Fresh,
    /// Something is stored, but older than expected.
    Stale,
    /// Nothing is stored.
    Missing,
}

impl Freshness {
    pub const fn needs_refetch(self) -> bool {
        !matches!(self, Self::Fresh)
    }
}

/// The most recently completed calendar month at `now` (UTC).
pub fn expected_latest_period(now: UtcDateTime) -> Period {
    Period::month_of(now.date_at(UtcOffset::UTC))
        .back(1)
        .unwrap_or_else(|_| Period::month_of(now.date_at(UtcOffset::UTC)))
}

pub fn classify(latest: Option<&Observation>, now: UtcDateTime) -> Freshness {
    let Some(latest) = latest else {
        return Freshness::Missing;
    };
    if latest.period.ordinal() >= expected_latest_period(now).ordinal() {
        Freshness::Fresh
    } else {
        Freshness::Stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Entity, ObservationValue, ProviderId};

    fn stored(period: &str) -> Observation {
        Observation::new(
            Entity::reserve("CHN").expect("entity"),
            Period::parse(period).expect("period"),
            ObservationValue::reserve(2298.5),
            ProviderId::Imf,
            UtcDateTime::parse("2025-12-01T00:00:00Z").expect("timestamp"),
        )
        .expect("observation")
    }

    #[test]
    fn expected_period_is_previous_month_across_year_boundary() {
        let now = UtcDateTime::parse("2026-01-15T08:00:00Z").expect("timestamp");
        assert_eq!(expected_latest_period(now).key(), "2025-12");
    }

    #[test]
    fn classifies_missing_stale_and_fresh() {
        let now = UtcDateTime::parse("2026-01-15T08:00:00Z").expect("timestamp");

        assert_eq!(classify(None, now), Freshness::Missing);
        assert_eq!(classify(Some(&stored("2025-11")), now), Freshness::Stale);
        assert_eq!(classify(Some(&stored("2025-12")), now), Freshness::Fresh);
        assert!(Freshness::Stale.needs_refetch());
        assert!(!Freshness::Fresh.needs_refetch());
    }
}
