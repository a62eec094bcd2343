//! Sensor timestamp utilities
//!
//! Sensor clocks tick in microseconds. Movella DOT sensors report a 32-bit
//! `SampleTimeFine` counter that wraps roughly every 71.6 minutes, so raw
//! readings go through [`TimestampUnwrapper`] before becoming [`Timestamp`]s.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Microseconds per second
pub const MICROS_PER_SECOND: u64 = 1_000_000;

/// Span of the 32-bit sensor counter
const COUNTER_SPAN: u64 = 1 << 32;

/// Backward steps larger than this are counter wraps, smaller ones are
/// out-of-order readings
const WRAP_THRESHOLD: u32 = 1 << 31;

/// Monotonic sensor timestamp in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Build from seconds, rounding to the nearest microsecond
    pub fn from_secs_f64(seconds: f64) -> Self {
        Self((seconds * MICROS_PER_SECOND as f64).round().max(0.0) as u64)
    }

    pub const fn as_micros(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / MICROS_PER_SECOND as f64
    }

    /// Seconds elapsed from `earlier` to `self` (negative if `earlier` is later)
    pub fn seconds_since(self, earlier: Timestamp) -> f64 {
        (self.0 as f64 - earlier.0 as f64) / MICROS_PER_SECOND as f64
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Unwraps a wrapping 32-bit microsecond counter into a 64-bit timeline
///
/// A reading far below the previous one is taken as a counter overflow and
/// shifts all following readings by 2^32. A small backward step is passed
/// through unchanged so the caller sees it as out of order.
#[derive(Debug, Clone, Default)]
pub struct TimestampUnwrapper {
    last_raw: Option<u32>,
    epoch: u64,
}

impl TimestampUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert the next raw counter reading
    pub fn unwrap_next(&mut self, raw: u32) -> Timestamp {
        if let Some(last) = self.last_raw {
            if raw < last {
                if last - raw <= WRAP_THRESHOLD {
                    return Timestamp(self.epoch * COUNTER_SPAN + raw as u64);
                }
                self.epoch += 1;
                tracing::debug!(last, raw, epoch = self.epoch, "Sensor counter wrapped");
            }
        }
        self.last_raw = Some(raw);
        Timestamp(self.epoch * COUNTER_SPAN + raw as u64)
    }

    /// Number of wraps observed so far
    pub fn wraps(&self) -> u64 {
        self.epoch
    }
}

/// Format an offset in seconds as `mm:ss` (rounded to the nearest second)
///
/// Used as the display time that operators match against training videos.
pub fn format_mm_ss(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_since() {
        let a = Timestamp::from_micros(1_000_000);
        let b = Timestamp::from_micros(3_500_000);
        assert_eq!(b.seconds_since(a), 2.5);
        assert_eq!(a.seconds_since(b), -2.5);
    }

    #[test]
    fn test_from_secs_rounds() {
        assert_eq!(Timestamp::from_secs_f64(0.0166667).as_micros(), 16_667);
    }

    #[test]
    fn test_unwrapper_handles_rollover() {
        let mut unwrapper = TimestampUnwrapper::new();
        let raws = [u32::MAX - 20_000, u32::MAX - 3_000, 13_000, 30_000];
        let unwrapped: Vec<Timestamp> = raws.iter().map(|&r| unwrapper.unwrap_next(r)).collect();

        assert!(unwrapped.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(unwrapper.wraps(), 1);
        assert_eq!(unwrapped[2].as_micros(), (1u64 << 32) + 13_000);
    }

    #[test]
    fn test_small_backward_step_is_not_a_wrap() {
        let mut unwrapper = TimestampUnwrapper::new();
        let a = unwrapper.unwrap_next(50_000);
        let b = unwrapper.unwrap_next(40_000);
        let c = unwrapper.unwrap_next(60_000);

        assert!(b < a);
        assert!(c > a);
        assert_eq!(unwrapper.wraps(), 0);
    }

    #[test]
    fn test_format_mm_ss() {
        assert_eq!(format_mm_ss(0.0), "00:00");
        assert_eq!(format_mm_ss(61.4), "01:01");
        assert_eq!(format_mm_ss(59.6), "01:00");
        assert_eq!(format_mm_ss(-3.0), "00:00");
    }
}
