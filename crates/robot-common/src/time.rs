//! Unit-tagged time values.
//!
//! Every time quantity in the firmware carries its unit and its reference
//! point in the type:
//!
//! | type           | meaning                                   | raw  |
//! |----------------|-------------------------------------------|------|
//! | [`DeviceTimeMs`] | milliseconds since device start         | `u64` |
//! | [`DeviceTimeUs`] | microseconds since device start         | `u64` |
//! | [`TimeMs`]       | a duration in milliseconds              | `u64` |
//! | [`TimeUs`]       | a duration in microseconds              | `u64` |
//! | [`RealTimeS`]    | wall-clock seconds since the Unix epoch | `u64` |
//!
//! There are no `From` conversions between these types. The only ways across
//! are [`us_to_ms`] / [`ms_to_us`] (truncating) and the `+` operators below:
//!
//! - `DeviceTimeUs + TimeUs -> DeviceTimeUs` (either operand order)
//! - `DeviceTimeMs + TimeMs -> DeviceTimeMs` (either operand order)
//! - `TimeUs + TimeUs -> TimeUs`, `TimeMs + TimeMs -> TimeMs`
//!
//! Anything else, e.g. `DeviceTimeUs + TimeMs` or `DeviceTimeUs + DeviceTimeUs`,
//! is a compile error:
//!
//! ```compile_fail
//! use robot_common::time::{DeviceTimeUs, TimeMs};
//! let _ = DeviceTimeUs::new(1) + TimeMs::new(1);
//! ```
//!
//! ```
//! use robot_common::time::{us_to_ms, DeviceTimeUs, TimeMs, TimeUs};
//! let due = DeviceTimeUs::new(1_000) + TimeUs::new(500);
//! assert_eq!(due, DeviceTimeUs::new(1_500));
//! assert_eq!(us_to_ms(TimeUs::new(1_500)), TimeMs::new(1));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};
use std::time::Duration;

/// Microseconds per millisecond.
pub const US_PER_MS: u64 = 1_000;

/// Microseconds per second.
pub const US_PER_S: u64 = 1_000_000;

/// Milliseconds per second.
pub const MS_PER_S: u64 = 1_000;

macro_rules! tagged_time {
    ($(#[$meta:meta])* $name:ident, $suffix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// The zero value.
            pub const ZERO: Self = Self(0);

            /// Wrap a raw integer.
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Retrieve the raw integer.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", self.0, $suffix)
            }
        }
    };
}

tagged_time!(
    /// Milliseconds since device start. Monotonic for the life of the process.
    DeviceTimeMs,
    "ms"
);
tagged_time!(
    /// Microseconds since device start. Monotonic for the life of the process.
    DeviceTimeUs,
    "us"
);
tagged_time!(
    /// A duration in milliseconds.
    TimeMs,
    "ms"
);
tagged_time!(
    /// A duration in microseconds.
    TimeUs,
    "us"
);
tagged_time!(
    /// Wall-clock seconds since 1970-01-01T00:00:00Z.
    ///
    /// Supplied by an external source and not monotonic: consecutive samples
    /// may step backwards or jump forwards.
    RealTimeS,
    "s"
);

/// Convert a microsecond duration to milliseconds, truncating toward zero.
#[must_use]
pub const fn us_to_ms(value: TimeUs) -> TimeMs {
    TimeMs(value.0 / US_PER_MS)
}

/// Convert a millisecond duration to microseconds.
#[must_use]
pub const fn ms_to_us(value: TimeMs) -> TimeUs {
    TimeUs(value.0.saturating_mul(US_PER_MS))
}

impl TimeUs {
    /// Build from a `std::time::Duration`, truncating sub-microsecond parts.
    #[must_use]
    pub fn from_duration(duration: Duration) -> Self {
        Self(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
    }

    /// Express as a `std::time::Duration` for host sleeps.
    #[must_use]
    pub const fn as_duration(self) -> Duration {
        Duration::from_micros(self.0)
    }

    /// Build from whole milliseconds.
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(US_PER_MS))
    }

    /// Build from whole seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(US_PER_S))
    }
}

impl DeviceTimeUs {
    /// Duration elapsed from `earlier` to `self`, or zero if `earlier` is later.
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: DeviceTimeUs) -> TimeUs {
        TimeUs(self.0.saturating_sub(earlier.0))
    }

    /// Same instant at millisecond resolution (truncated).
    #[must_use]
    pub const fn to_ms(self) -> DeviceTimeMs {
        DeviceTimeMs(self.0 / US_PER_MS)
    }
}

impl DeviceTimeMs {
    /// Duration elapsed from `earlier` to `self`, or zero if `earlier` is later.
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: DeviceTimeMs) -> TimeMs {
        TimeMs(self.0.saturating_sub(earlier.0))
    }
}

macro_rules! timestamp_plus_duration {
    ($stamp:ident, $dur:ident) => {
        impl Add<$dur> for $stamp {
            type Output = $stamp;

            fn add(self, rhs: $dur) -> $stamp {
                $stamp(self.0.saturating_add(rhs.0))
            }
        }

        impl Add<$stamp> for $dur {
            type Output = $stamp;

            fn add(self, rhs: $stamp) -> $stamp {
                $stamp(rhs.0.saturating_add(self.0))
            }
        }

        impl AddAssign<$dur> for $stamp {
            fn add_assign(&mut self, rhs: $dur) {
                self.0 = self.0.saturating_add(rhs.0);
            }
        }

        impl Add for $dur {
            type Output = $dur;

            fn add(self, rhs: $dur) -> $dur {
                $dur(self.0.saturating_add(rhs.0))
            }
        }

        impl AddAssign for $dur {
            fn add_assign(&mut self, rhs: $dur) {
                self.0 = self.0.saturating_add(rhs.0);
            }
        }
    };
}

timestamp_plus_duration!(DeviceTimeUs, TimeUs);
timestamp_plus_duration!(DeviceTimeMs, TimeMs);
