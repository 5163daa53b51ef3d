//! Clock & TimeZone (component A).
//!
//! Resolves "now" in the configured local zone and formats/parses
//! timestamps consistently. The Store may persist zone-naive values; per
//! spec §9, a naive value read back is treated as already local, not UTC.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Abstraction over "now", so tests can inject a fixed clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Tz>;

    /// Current Unix time in seconds, independent of configured zone.
    fn unix_secs(&self) -> i64 {
        Utc::now().timestamp()
    }

    /// Current Unix time in milliseconds.
    fn unix_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Real wall-clock backed by the configured IANA timezone.
#[derive(Debug, Clone, Copy)]
pub struct TzClock {
    tz: Tz,
}

impl TzClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Treat a zone-naive timestamp read back from storage as already being
    /// in the configured local zone (spec §9 timezone handling note).
    pub fn assume_local(&self, naive: NaiveDateTime) -> DateTime<Tz> {
        self.tz
            .from_local_datetime(&naive)
            .single()
            .unwrap_or_else(|| self.tz.from_utc_datetime(&naive))
    }
}

impl Clock for TzClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assume_local_round_trips_naive_timestamp() {
        let clock = TzClock::new(chrono_tz::Asia::Shanghai);
        let now = clock.now();
        let naive = now.naive_local();
        let reconstructed = clock.assume_local(naive);
        assert_eq!(now.naive_local(), reconstructed.naive_local());
    }

    #[test]
    fn unix_millis_is_monotonic_with_secs() {
        let clock = TzClock::new(chrono_tz::UTC);
        let s = clock.unix_secs();
        let ms = clock.unix_millis();
        assert!(ms / 1000 == s || ms / 1000 == s + 1);
    }
}
