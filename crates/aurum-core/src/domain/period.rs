use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::{Date, Month};

use crate::domain::Granularity;
use crate::ValidationError;

/// Time bucket an observation belongs to.
///
/// Every period maps to an integer ordinal of its granularity, so "N periods
/// before" is plain subtraction and gaps in stored history stay visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Period {
    /// A trading day.
    Day(Date),
    /// A calendar month.
    Month { year: i32, month: u8 },
}

impl Period {
    pub fn month(year: i32, month: u8) -> Result<Self, ValidationError> {
        if !(1..=12).contains(&month) || !(1900..=9999).contains(&year) {
            return Err(ValidationError::InvalidPeriod {
                value: format!("{year}-{month:02}"),
            });
        }
        Ok(Self::Month { year, month })
    }

    pub const fn day(date: Date) -> Self {
        Self::Day(date)
    }

    /// The month containing `date`.
    pub fn month_of(date: Date) -> Self {
        Self::Month {
            year: date.year(),
            month: u8::from(date.month()),
        }
    }

    /// Parse `YYYY-MM` or `YYYY-MM-DD`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidPeriod {
            value: input.to_owned(),
        };
        let parts: Vec<&str> = input.trim().split('-').collect();
        match parts.as_slice() {
            [year, month] if year.len() == 4 && month.len() == 2 => {
                let year = year.parse().map_err(|_| invalid())?;
                let month = month.parse().map_err(|_| invalid())?;
                Self::month(year, month).map_err(|_| invalid())
            }
            [year, month, day] if year.len() == 4 && month.len() == 2 && day.len() == 2 => {
                let year: i32 = year.parse().map_err(|_| invalid())?;
                let month: u8 = month.parse().map_err(|_| invalid())?;
                let day: u8 = day.parse().map_err(|_| invalid())?;
                let month = Month::try_from(month).map_err(|_| invalid())?;
                let date = Date::from_calendar_date(year, month, day).map_err(|_| invalid())?;
                Ok(Self::Day(date))
            }
            _ => Err(invalid()),
        }
    }

    pub const fn granularity(self) -> Granularity {
        match self {
            Self::Day(_) => Granularity::Day,
            Self::Month { .. } => Granularity::Month,
        }
    }

    /// Position of the period on its granularity's axis.
    pub fn ordinal(self) -> i64 {
        match self {
            Self::Day(date) => i64::from(date.to_julian_day()),
            Self::Month { year, month } => i64::from(year) * 12 + i64::from(month) - 1,
        }
    }

    /// Inverse of [`Period::ordinal`].
    pub fn from_ordinal(granularity: Granularity, ordinal: i64) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidPeriod {
            value: ordinal.to_string(),
        };
        match granularity {
            Granularity::Day => {
                let julian = i32::try_from(ordinal).map_err(|_| invalid())?;
                Date::from_julian_day(julian)
                    .map(Self::Day)
                    .map_err(|_| invalid())
            }
            Granularity::Month => {
                let year = i32::try_from(ordinal.div_euclid(12)).map_err(|_| invalid())?;
                let month = (ordinal.rem_euclid(12) + 1) as u8;
                Self::month(year, month)
            }
        }
    }

    /// The period `count` buckets earlier.
    pub fn back(self, count: u32) -> Result<Self, ValidationError> {
        Self::from_ordinal(self.granularity(), self.ordinal() - i64::from(count))
    }

    /// Stable textual key: `2024-03` or `2024-03-15`.
    pub fn key(self) -> String {
        match self {
            Self::Day(date) => format!(
                "{:04}-{:02}-{:02}",
                date.year(),
                u8::from(date.month()),
                date.day()
            ),
            Self::Month { year, month } => format!("{year:04}-{month:02}"),
        }
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for Period {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl Serialize for Period {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.key())
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_ordinals_are_contiguous_across_years() {
        let december = Period::parse("2023-12").expect("december");
        let january = Period::parse("2024-01").expect("january");
        assert_eq!(january.ordinal() - december.ordinal(), 1);
        assert_eq!(january.back(1).expect("back"), december);
        assert_eq!(
            Period::parse("2025-03").expect("march").back(12).expect("back"),
            Period::parse("2024-03").expect("a year earlier")
        );
    }

    #[test]
    fn day_periods_round_trip_through_ordinal() {
        let day = Period::parse("2024-02-29").expect("leap day");
        let restored = Period::from_ordinal(Granularity::Day, day.ordinal()).expect("restore");
        assert_eq!(restored, day);
        assert_eq!(restored.key(), "2024-02-29");
    }

    #[test]
    fn rejects_malformed_periods() {
        for value in ["2024-13", "2024-2", "24-01", "2023-02-29", "2024/01", ""] {
            assert!(Period::parse(value).is_err(), "{value} should be rejected");
        }
    }

    #[test]
    fn serializes_as_key_string() {
        let period = Period::month(2025, 11).expect("valid month");
        let json = serde_json::to_string(&period).expect("serialize");
        assert_eq!(json, "\"2025-11\"");
        let back: Period = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, period);
    }
}
