//! # Domain Models
//!
//! Canonical domain types for aurum.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Entity`] | Trackable object identified by class and code |
//! | [`EntityClass`] | Quote, rate or reserve |
//! | [`Market`] | Trading venue selecting the calendar |
//! | [`Period`] | Day or month bucket with an integer ordinal |
//! | [`Observation`] | One tagged data point for an entity at a period |
//! | [`ObservationValue`] | Class-specific measured values |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! Constructors validate their inputs, so a value that exists is well formed:
//!
//! ```rust
//! use aurum_core::{Entity, Period};
//!
//! let pair = Entity::rate("usd", "cny").expect("valid pair");
//! assert_eq!(pair.id(), "rate:USD/CNY");
//!
//! let march = Period::parse("2024-03").expect("valid month");
//! assert_eq!(march.back(2).expect("earlier month").key(), "2024-01");
//! ```

mod entity;
mod observation;
mod period;
mod timestamp;

pub use entity::{Entity, EntityClass, Granularity, Market};
pub use observation::{Observation, ObservationValue};
pub use period::Period;
pub use timestamp::UtcDateTime;
