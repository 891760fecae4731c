//! Time source abstraction.
//!
//! Cache expiry, trading-session checks and the refresh policy all read the
//! current time through [`Clock`], so tests can move time explicitly.

use std::sync::Mutex;
use std::time::Duration;

use crate::UtcDateTime;

/// Source of the current UTC time.
pub trait Clock: Send + Sync {
    fn now(&self) -> UtcDateTime;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UtcDateTime {
        UtcDateTime::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<UtcDateTime>,
}

impl ManualClock {
    pub fn new(start: UtcDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, value: UtcDateTime) {
        *self.now.lock().expect("manual clock lock is not poisoned") = value;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("manual clock lock is not poisoned");
        *now = now.saturating_add(by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UtcDateTime {
        *self.now.lock().expect("manual clock lock is not poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let start = UtcDateTime::parse("2025-12-15T02:00:00Z").expect("timestamp");
        let clock = ManualClock::new(start);

        assert_eq!(clock.now(), start);
        clock.advance(Duration::from_secs(301));
        assert_eq!(clock.now().unix_millis() - start.unix_millis(), 301_000);
    }
}
