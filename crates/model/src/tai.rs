//! Update-version timestamps.
//!
//! Versions are `(secs, nanos)` pairs measured from process start, acting
//! as a Lamport-style clock: the clock never returns the same value twice,
//! even when the OS clock fails to advance between calls.

use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A `(secs, nanos)` update version. Displays as `"{secs}:{nanos}"`, which
/// is the string carried in every resource's `version` field.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Tai {
    pub secs: u64,
    pub nanos: u32,
}

impl Tai {
    pub const ZERO: Tai = Tai { secs: 0, nanos: 0 };

    /// Advance to the smallest version strictly greater than `self`.
    pub fn increment(self) -> Tai {
        if self.nanos >= 999_999_999 {
            Tai {
                secs: self.secs + 1,
                nanos: 0,
            }
        } else {
            Tai {
                secs: self.secs,
                nanos: self.nanos + 1,
            }
        }
    }
}

impl std::fmt::Display for Tai {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.secs, self.nanos)
    }
}

/// Strictly monotonic version source.
pub struct VersionClock {
    start: Instant,
    last: Mutex<Tai>,
}

impl Default for VersionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            last: Mutex::new(Tai::ZERO),
        }
    }

    /// The next version: elapsed time since start, nudged forward when two
    /// calls land in the same nanosecond.
    pub fn next(&self) -> Tai {
        let elapsed = self.start.elapsed();
        let candidate = Tai {
            secs: elapsed.as_secs(),
            nanos: elapsed.subsec_nanos(),
        };
        let mut last = self.last.lock();
        let version = if candidate > *last {
            candidate
        } else {
            last.increment()
        };
        *last = version;
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_strictly_monotonic() {
        let clock = VersionClock::new();
        let mut prev = Tai::ZERO;
        for _ in 0..10_000 {
            let v = clock.next();
            assert!(v > prev);
            prev = v;
        }
    }

    #[test]
    fn increment_carries_into_seconds() {
        let v = Tai {
            secs: 3,
            nanos: 999_999_999,
        };
        assert_eq!(v.increment(), Tai { secs: 4, nanos: 0 });
    }

    #[test]
    fn display_is_colon_separated() {
        let v = Tai {
            secs: 12,
            nanos: 345,
        };
        assert_eq!(v.to_string(), "12:345");
    }
}
