//! Trading-session calendar.
//!
//! A pure lookup: given a market and an instant, is the market trading? Each
//! market has a fixed UTC offset, one or two sessions in local time, and a set
//! of weekdays on which it never trades. A session whose start is after its
//! end wraps midnight. Unknown markets are always closed.

use std::collections::HashMap;

use time::{Date, Time, UtcOffset, Weekday};

use crate::{Market, UtcDateTime, ValidationError};

/// An inclusive local-time interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    start: Time,
    end: Time,
}

impl Session {
    pub const fn new(start: Time, end: Time) -> Self {
        Self { start, end }
    }

    /// Parse `HH:MM-HH:MM`.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidSession {
            value: value.to_owned(),
        };
        let (start, end) = value.trim().split_once('-').ok_or_else(invalid)?;
        Ok(Self::new(
            parse_hhmm(start).ok_or_else(invalid)?,
            parse_hhmm(end).ok_or_else(invalid)?,
        ))
    }

    pub const fn wraps_midnight(self) -> bool {
        self.start.hour() > self.end.hour()
            || (self.start.hour() == self.end.hour() && self.start.minute() > self.end.minute())
    }

    pub fn contains(self, at: Time) -> bool {
        if self.wraps_midnight() {
            at >= self.start || at <= self.end
        } else {
            at >= self.start && at <= self.end
        }
    }
}

/// Trading hours of one market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketSchedule {
    offset: UtcOffset,
    sessions: Vec<Session>,
    closed_weekdays: Vec<Weekday>,
}

impl MarketSchedule {
    pub fn new(offset: UtcOffset, sessions: Vec<Session>) -> Self {
        Self {
            offset,
            sessions,
            closed_weekdays: vec![Weekday::Saturday, Weekday::Sunday],
        }
    }

    pub fn with_closed_weekdays(mut self, weekdays: Vec<Weekday>) -> Self {
        self.closed_weekdays = weekdays;
        self
    }

    /// Build a schedule from configuration strings.
    pub fn from_parts(
        offset_minutes: i32,
        sessions: &[String],
        closed_weekdays: &[String],
    ) -> Result<Self, ValidationError> {
        let offset = UtcOffset::from_whole_seconds(offset_minutes.saturating_mul(60)).map_err(
            |_| ValidationError::InvalidSession {
                value: format!("utc offset {offset_minutes} minutes"),
            },
        )?;
        let sessions = sessions
            .iter()
            .map(|session| Session::parse(session))
            .collect::<Result<Vec<_>, _>>()?;
        let closed_weekdays = closed_weekdays
            .iter()
            .map(|day| parse_weekday(day))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(offset, sessions).with_closed_weekdays(closed_weekdays))
    }

    pub const fn offset(&self) -> UtcOffset {
        self.offset
    }

    pub fn is_open(&self, at: UtcDateTime) -> bool {
        let local = at.into_inner().to_offset(self.offset);
        if self.closed_weekdays.contains(&local.weekday()) {
            return false;
        }
        let time = local.time();
        self.sessions.iter().any(|session| session.contains(time))
    }
}

/// Per-market trading calendar.
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    schedules: HashMap<Market, MarketSchedule>,
}

impl Default for TradingCalendar {
    fn default() -> Self {
        let china = hours(8);
        let mainland = MarketSchedule::new(
            china,
            vec![session((9, 30), (11, 30)), session((13, 0), (15, 0))],
        );

        Self::empty()
            .with_schedule(Market::Cn, mainland.clone())
            .with_schedule(Market::Fund, mainland.clone())
            .with_schedule(Market::Bond, mainland)
            .with_schedule(
                Market::Hk,
                MarketSchedule::new(
                    china,
                    vec![session((9, 30), (12, 0)), session((13, 0), (16, 0))],
                ),
            )
            // Fixed offset; US daylight saving time is not modelled.
            .with_schedule(
                Market::Us,
                MarketSchedule::new(hours(-5), vec![session((9, 30), (16, 0))]),
            )
            .with_schedule(
                Market::Global,
                MarketSchedule::new(china, vec![session((6, 0), (5, 0))]),
            )
            .with_schedule(
                Market::Forex,
                MarketSchedule::new(UtcOffset::UTC, vec![session((5, 0), (4, 0))]),
            )
    }
}

impl TradingCalendar {
    /// A calendar on which every market is closed.
    pub fn empty() -> Self {
        Self {
            schedules: HashMap::new(),
        }
    }

    pub fn with_schedule(mut self, market: Market, schedule: MarketSchedule) -> Self {
        self.schedules.insert(market, schedule);
        self
    }

    pub fn schedule(&self, market: Market) -> Option<&MarketSchedule> {
        self.schedules.get(&market)
    }

    pub fn is_open(&self, market: Market, at: UtcDateTime) -> bool {
        self.schedules
            .get(&market)
            .is_some_and(|schedule| schedule.is_open(at))
    }

    /// The calendar date in the market's local time; UTC for unknown markets.
    pub fn local_date(&self, market: Market, at: UtcDateTime) -> Date {
        let offset = self
            .schedules
            .get(&market)
            .map_or(UtcOffset::UTC, MarketSchedule::offset);
        at.date_at(offset)
    }
}

fn hours(value: i8) -> UtcOffset {
    UtcOffset::from_hms(value, 0, 0).unwrap_or(UtcOffset::UTC)
}

fn session(start: (u8, u8), end: (u8, u8)) -> Session {
    Session::new(
        Time::from_hms(start.0, start.1, 0).unwrap_or(Time::MIDNIGHT),
        Time::from_hms(end.0, end.1, 0).unwrap_or(Time::MIDNIGHT),
    )
}

fn parse_hhmm(value: &str) -> Option<Time> {
    let (hour, minute) = value.trim().split_once(':')?;
    Time::from_hms(hour.parse().ok()?, minute.parse().ok()?, 0).ok()
}

fn parse_weekday(value: &str) -> Result<Weekday, ValidationError> {
    let day = match value.trim().to_ascii_lowercase().as_str() {
        "mon" | "monday" => Weekday::Monday,
        "tue" | "tuesday" => Weekday::Tuesday,
        "wed" | "wednesday" => Weekday::Wednesday,
        "thu" | "thursday" => Weekday::Thursday,
        "fri" | "friday" => Weekday::Friday,
        "sat" | "saturday" => Weekday::Saturday,
        "sun" | "sunday" => Weekday::Sunday,
        other => {
            return Err(ValidationError::InvalidWeekday {
                value: other.to_owned(),
            })
        }
    };
    Ok(day)
}
