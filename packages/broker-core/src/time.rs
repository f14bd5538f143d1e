//! Absolute timestamps and durations used for entry expiry.
//!
//! Unlike `hlc::Timestamp` (a causal, node-tagged clock for CRDT merges),
//! the store subsystem only needs plain wall-clock instants: "now plus a
//! requested timespan" at write time, compared against "now" on every
//! expiry tick. No causality tracking is involved.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// An absolute point in wall-clock time, expressed as milliseconds since
/// the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        #[allow(clippy::cast_possible_wrap)]
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;
        Self(millis)
    }

    /// `self + span`, saturating rather than overflowing.
    #[must_use]
    pub fn add_span(self, span: Timespan) -> Self {
        Self(self.0.saturating_add(span.0))
    }

    /// `self - span`, saturating rather than overflowing.
    #[must_use]
    pub fn sub_span(self, span: Timespan) -> Self {
        Self(self.0.saturating_sub(span.0))
    }

    /// True if this timestamp is at or before `now` (i.e. it has elapsed).
    #[must_use]
    pub fn has_elapsed(self, now: Timestamp) -> bool {
        self.0 <= now.0
    }
}

/// A duration, expressed in milliseconds. Used both for requested TTLs
/// (`put(k, v, expiry: Timespan)`) and for `tick-interval`/`request-timeout`
/// configuration values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timespan(pub i64);

impl Timespan {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    #[must_use]
    pub fn as_duration(self) -> std::time::Duration {
        std::time::Duration::from_millis(self.0.max(0).unsigned_abs())
    }
}

impl From<std::time::Duration> for Timespan {
    fn from(d: std::time::Duration) -> Self {
        #[allow(clippy::cast_possible_wrap)]
        Self(d.as_millis() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_sub_span_round_trips() {
        let t = Timestamp(1_000);
        let span = Timespan(250);
        assert_eq!(t.add_span(span).sub_span(span), t);
    }

    #[test]
    fn has_elapsed_is_inclusive() {
        let expiry = Timestamp(1_000);
        assert!(expiry.has_elapsed(Timestamp(1_000)));
        assert!(expiry.has_elapsed(Timestamp(1_001)));
        assert!(!expiry.has_elapsed(Timestamp(999)));
    }
}
