//! Entry timestamps.
//!
//! Archive formats store times with very different precision: ustar keeps
//! whole seconds in octal, pax records carry decimal fractions, cpio keeps
//! 32-bit seconds and the spool format keeps seconds plus nanoseconds. The
//! [`Timestamp`] type holds the widest of these, a signed second count since
//! the Unix epoch plus a nanosecond part, so every format can round-trip what
//! it is able to represent.
//!
//! # Example
//!
//! ```rust
//! use arcstream::Timestamp;
//! use std::time::{Duration, SystemTime};
//!
//! let ts = Timestamp::new(1_700_000_000, 250_000_000).unwrap();
//! assert_eq!(ts.secs(), 1_700_000_000);
//! assert_eq!(ts.nanos(), 250_000_000);
//!
//! let st: SystemTime = ts.into();
//! assert_eq!(
//!     st,
//!     SystemTime::UNIX_EPOCH + Duration::new(1_700_000_000, 250_000_000)
//! );
//! ```

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of nanoseconds per second.
const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// A point in time with nanosecond precision.
///
/// `nanos` is always in `0..1_000_000_000` and counts forward from `secs`,
/// so one nanosecond before the epoch is `secs = -1, nanos = 999_999_999`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    secs: i64,
    nanos: u32,
}

impl Timestamp {
    /// The Unix epoch.
    pub const UNIX_EPOCH: Timestamp = Timestamp { secs: 0, nanos: 0 };

    /// Creates a timestamp from seconds and nanoseconds since the Unix epoch.
    ///
    /// Returns `None` if `nanos` is not below one second.
    pub const fn new(secs: i64, nanos: u32) -> Option<Self> {
        if nanos >= NANOS_PER_SECOND {
            return None;
        }
        Some(Self { secs, nanos })
    }

    /// Creates a timestamp from whole seconds.
    #[inline]
    pub const fn from_unix_secs(secs: i64) -> Self {
        Self { secs, nanos: 0 }
    }

    /// Creates a timestamp from a `SystemTime`.
    ///
    /// Returns `None` if the time is too far from the epoch to fit in `i64` seconds.
    pub fn from_system_time(time: SystemTime) -> Option<Self> {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Some(Self {
                secs: i64::try_from(d.as_secs()).ok()?,
                nanos: d.subsec_nanos(),
            }),
            Err(e) => {
                let d = e.duration();
                let secs = i64::try_from(d.as_secs()).ok()?;
                if d.subsec_nanos() == 0 {
                    Some(Self { secs: -secs, nanos: 0 })
                } else {
                    Some(Self {
                        secs: -secs - 1,
                        nanos: NANOS_PER_SECOND - d.subsec_nanos(),
                    })
                }
            }
        }
    }

    /// Returns the whole seconds since the Unix epoch (floor).
    #[inline]
    pub const fn secs(&self) -> i64 {
        self.secs
    }

    /// Returns the sub-second nanoseconds.
    #[inline]
    pub const fn nanos(&self) -> u32 {
        self.nanos
    }

    /// Returns the time as nanoseconds since the epoch.
    pub fn as_unix_nanos(&self) -> i128 {
        i128::from(self.secs) * i128::from(NANOS_PER_SECOND) + i128::from(self.nanos)
    }

    /// Returns the timestamp truncated to whole seconds.
    pub fn truncate_to_secs(&self) -> Self {
        Self::from_unix_secs(self.secs)
    }

    /// Returns true for times before the Unix epoch.
    #[inline]
    pub fn is_before_unix_epoch(&self) -> bool {
        self.secs < 0
    }

    /// Converts to a `SystemTime`.
    pub fn as_system_time(&self) -> SystemTime {
        if self.secs >= 0 {
            UNIX_EPOCH + Duration::new(self.secs as u64, self.nanos)
        } else {
            UNIX_EPOCH - Duration::new(self.secs.unsigned_abs(), 0) + Duration::new(0, self.nanos)
        }
    }

    /// Formats the time as a pax decimal value (`secs[.fraction]`).
    ///
    /// Trailing zeros of the fraction are dropped; whole seconds have no fraction.
    pub(crate) fn to_decimal(self) -> String {
        if self.nanos == 0 {
            return self.secs.to_string();
        }
        // Negative times are written as -(|t|) with a positive fraction
        let (neg, secs, nanos) = if self.secs < 0 {
            (true, (-(self.secs + 1)) as u64, NANOS_PER_SECOND - self.nanos)
        } else {
            (false, self.secs as u64, self.nanos)
        };
        let frac = format!("{:09}", nanos);
        let frac = frac.trim_end_matches('0');
        format!("{}{}.{}", if neg { "-" } else { "" }, secs, frac)
    }

    /// Parses a pax decimal value (`[-]secs[.fraction]`).
    pub(crate) fn parse_decimal(value: &str) -> Option<Self> {
        let (neg, rest) = match value.strip_prefix('-') {
            Some(r) => (true, r),
            None => (false, value),
        };
        let (int_part, frac_part) = match rest.split_once('.') {
            Some((i, f)) => (i, f),
            None => (rest, ""),
        };
        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let secs: i64 = int_part.parse().ok()?;
        let mut nanos: u32 = 0;
        for (i, b) in frac_part.bytes().take(9).enumerate() {
            nanos += u32::from(b - b'0') * 10u32.pow(8 - i as u32);
        }
        if !neg {
            return Some(Self { secs, nanos });
        }
        if nanos == 0 {
            Some(Self { secs: -secs, nanos: 0 })
        } else {
            Some(Self {
                secs: -secs - 1,
                nanos: NANOS_PER_SECOND - nanos,
            })
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal())
    }
}

impl From<Timestamp> for SystemTime {
    fn from(ts: Timestamp) -> SystemTime {
        ts.as_system_time()
    }
}
