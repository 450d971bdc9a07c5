// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Capture timestamps: a (seconds, microseconds) pair with saturating
//! subtraction and carrying addition, matching the semantics every
//! analyzer relies on for idle-timeout comparisons.

use std::ops::{Add, Sub};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, TimeZone};

/// Current wall-clock time as Unix seconds, used by flush/sweep passes that
/// compare against `lastUpdate`/bucket-end timestamps.
pub fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

/// A capture timestamp. Total ordering on `(seconds, microseconds)`;
/// subtraction saturates at zero rather than wrapping or panicking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    pub seconds: u32,
    pub microseconds: u32,
}

impl Timestamp {
    pub fn new(seconds: u32, microseconds: u32) -> Self {
        Self { seconds, microseconds }
    }

    /// Stringify as local time, `YYYY-MM-DD HH:MM:SS.uuuuuu`.
    pub fn to_local_string(&self) -> String {
        match Local.timestamp_opt(self.seconds as i64, 0) {
            chrono::LocalResult::Single(dt) => {
                format!("{}.{:06}", dt.format("%Y-%m-%d %H:%M:%S"), self.microseconds)
            }
            _ => format!("{}.{:06}", self.seconds, self.microseconds),
        }
    }
}

impl Sub for Timestamp {
    type Output = Timestamp;

    /// Saturates at zero: if `self <= rhs`, the result is `(0, 0)` rather
    /// than underflowing.
    fn sub(self, rhs: Timestamp) -> Timestamp {
        if self <= rhs {
            return Timestamp::default();
        }
        let (mut seconds, mut microseconds) = (self.seconds, self.microseconds);
        if microseconds < rhs.microseconds {
            microseconds += 1_000_000;
            seconds -= 1;
        }
        Timestamp::new(seconds - rhs.seconds, microseconds - rhs.microseconds)
    }
}

impl Add for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Timestamp) -> Timestamp {
        let mut seconds = self.seconds + rhs.seconds;
        let mut microseconds = self.microseconds + rhs.microseconds;
        if microseconds >= 1_000_000 {
            seconds += 1;
            microseconds -= 1_000_000;
        }
        Timestamp::new(seconds, microseconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtraction_saturates_at_zero() {
        let a = Timestamp::new(10, 100);
        let b = Timestamp::new(20, 50);
        assert_eq!(a - b, Timestamp::new(0, 0));
    }

    #[test]
    fn subtraction_borrows_microseconds() {
        let a = Timestamp::new(10, 100);
        let b = Timestamp::new(5, 500);
        assert_eq!(a - b, Timestamp::new(4, 999_600));
    }

    #[test]
    fn addition_carries_microseconds() {
        let a = Timestamp::new(1, 700_000);
        let b = Timestamp::new(2, 500_000);
        assert_eq!(a + b, Timestamp::new(4, 200_000));
    }

    #[test]
    fn ordering_is_total() {
        assert!(Timestamp::new(1, 0) < Timestamp::new(1, 1));
        assert!(Timestamp::new(1, 999_999) < Timestamp::new(2, 0));
    }
}
