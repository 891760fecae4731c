use serde::{Deserialize, Serialize};

use crate::domain::{Entity, EntityClass, Period, UtcDateTime};
use crate::{ProviderId, ValidationError};

/// Measured value of an observation, one variant per entity class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservationValue {
    Quote {
        price: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        change_percent: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        high: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        low: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        volume: Option<f64>,
    },
    Rate {
        rate: f64,
    },
    Reserve {
        /// Official holdings in metric tonnes.
        tonnes: f64,
    },
}

impl ObservationValue {
    pub const fn quote(price: f64) -> Self {
        Self::Quote {
            price,
            change_percent: None,
            high: None,
            low: None,
            volume: None,
        }
    }

    pub const fn rate(rate: f64) -> Self {
        Self::Rate { rate }
    }

    pub const fn reserve(tonnes: f64) -> Self {
        Self::Reserve { tonnes }
    }

    pub const fn class(&self) -> EntityClass {
        match self {
            Self::Quote { .. } => EntityClass::Quote,
            Self::Rate { .. } => EntityClass::Rate,
            Self::Reserve { .. } => EntityClass::Reserve,
        }
    }

    /// The headline number deltas are computed on.
    pub const fn primary(&self) -> f64 {
        match self {
            Self::Quote { price, .. } => *price,
            Self::Rate { rate } => *rate,
            Self::Reserve { tonnes } => *tonnes,
        }
    }

    /// Sanity check a parsed value: prices and rates must be positive,
    /// holdings non-negative, and nothing may be NaN or infinite.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Quote {
                price,
                change_percent,
                high,
                low,
                volume,
            } => {
                validate_positive("price", *price)?;
                validate_optional_finite("change_percent", *change_percent)?;
                validate_optional_non_negative("high", *high)?;
                validate_optional_non_negative("low", *low)?;
                validate_optional_non_negative("volume", *volume)
            }
            Self::Rate { rate } => validate_positive("rate", *rate),
            Self::Reserve { tonnes } => {
                validate_finite("tonnes", *tonnes)?;
                if *tonnes < 0.0 {
                    return Err(ValidationError::NegativeValue { field: "tonnes" });
                }
                Ok(())
            }
        }
    }
}

/// One data point for an entity at a period, tagged with its producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub entity: Entity,
    pub period: Period,
    pub value: ObservationValue,
    pub source: ProviderId,
    pub fetched_at: UtcDateTime,
}

impl Observation {
    pub fn new(
        entity: Entity,
        period: Period,
        value: ObservationValue,
        source: ProviderId,
        fetched_at: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        let observation = Self {
            entity,
            period,
            value,
            source,
            fetched_at,
        };
        observation.validate()?;
        Ok(observation)
    }

    /// Check value sanity and that value kind and period granularity match the
    /// entity's class.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let class = self.entity.class();
        if self.value.class() != class {
            return Err(ValidationError::ValueMismatch {
                class: class.as_str(),
            });
        }
        if self.period.granularity() != class.granularity() {
            return Err(ValidationError::PeriodMismatch {
                class: class.as_str(),
            });
        }
        self.value.validate()
    }

    pub const fn primary_value(&self) -> f64 {
        self.value.primary()
    }
}

fn validate_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    Ok(())
}

fn validate_positive(field: &'static str, value: f64) -> Result<(), ValidationError> {
    validate_finite(field, value)?;
    if value <= 0.0 {
        return Err(ValidationError::NonPositiveValue { field });
    }
    Ok(())
}

fn validate_optional_finite(field: &'static str, value: Option<f64>) -> Result<(), ValidationError> {
    value.map_or(Ok(()), |value| validate_finite(field, value))
}

fn validate_optional_non_negative(
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ValidationError> {
    let Some(value) = value else {
        return Ok(());
    };
    validate_finite(field, value)?;
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched_at() -> UtcDateTime {
        UtcDateTime::parse("2025-12-02T00:00:00Z").expect("timestamp")
    }

    #[test]
    fn rejects_non_positive_price_and_rate() {
        let quote = Entity::quote("AAPL", None).expect("entity");
        let period = Period::parse("2025-12-01").expect("period");
        let error = Observation::new(
            quote,
            period,
            ObservationValue::quote(0.0),
            ProviderId::Sina,
            fetched_at(),
        )
        .expect_err("zero price must fail");
        assert_eq!(error, ValidationError::NonPositiveValue { field: "price" });

        assert!(ObservationValue::rate(f64::NAN).validate().is_err());
        assert!(ObservationValue::reserve(0.0).validate().is_ok());
    }

    #[test]
    fn rejects_value_and_period_that_do_not_fit_the_class() {
        let reserve = Entity::reserve("CHN").expect("entity");

        let wrong_value = Observation::new(
            reserve.clone(),
            Period::month(2025, 11).expect("period"),
            ObservationValue::rate(7.1),
            ProviderId::Imf,
            fetched_at(),
        );
        assert!(matches!(wrong_value, Err(ValidationError::ValueMismatch { .. })));

        let wrong_period = Observation::new(
            reserve,
            Period::parse("2025-11-30").expect("period"),
            ObservationValue::reserve(2298.5),
            ProviderId::Imf,
            fetched_at(),
        );
        assert!(matches!(wrong_period, Err(ValidationError::PeriodMismatch { .. })));
    }

    #[test]
    fn value_serializes_with_kind_tag() {
        let json = serde_json::to_value(ObservationValue::rate(7.12)).expect("serialize");
        assert_eq!(json["kind"], "rate");
        assert_eq!(json["rate"], 7.12);
    }
}
