//! High-speed timer (HST): monotonic device time.
//!
//! [`CounterHst`] extends a narrow free-running microsecond counter (the kind
//! a microcontroller timer peripheral provides) to 64-bit device time. Each
//! observation of the counter books at most one wrap, so the reported time is
//! non-decreasing by construction; it is only *correct* if the counter is
//! observed at least once per wrap period. The HST therefore registers its own
//! [`HstHousekeeping`] Command whose period must be shorter than one wrap.
//!
//! If housekeeping discovers, against the counter's slow reference clock, that
//! a whole wrap went unbooked, device time has silently fallen behind. That
//! is reported as [`RobotError::TimingViolation`] and stops the engine.

use crate::command::Command;
use robot_common::{DeviceTimeMs, DeviceTimeUs, RobotError, RobotResult, TimeUs, US_PER_S};
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, trace};

/// Monotonic device time source.
///
/// Methods take `&self` so one timer can be shared by the Scheduler and every
/// Command that needs the current time.
pub trait HighSpeedTimer {
    /// Milliseconds since the timer was created. Never decreases.
    fn ms_since_device_start(&self) -> DeviceTimeMs {
        self.us_since_device_start().to_ms()
    }

    /// Microseconds since the timer was created. Never decreases.
    fn us_since_device_start(&self) -> DeviceTimeUs;

    /// Periodic accounting. Returns the delay until it must run again.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::TimingViolation`] if device time can no longer
    /// be trusted.
    fn housekeeping(&self) -> RobotResult<TimeUs>;

    /// Name for diagnostics.
    fn debug_name(&self) -> &str;
}

/// A narrow hardware counter ticking once per microsecond.
pub trait RawCounter {
    /// Counter width. Values wrap modulo `2^width_bits`.
    fn width_bits(&self) -> u32;

    /// Current raw count.
    fn read(&self) -> u32;

    /// An independent wide microsecond reference, if the platform has one
    /// (e.g. a slow RTC). It only needs to be accurate to well under half a
    /// wrap period; its origin is arbitrary.
    fn reference_us(&self) -> Option<u64> {
        None
    }
}

/// 64-bit device time built from a [`RawCounter`].
#[derive(Debug)]
pub struct CounterHst<C: RawCounter> {
    counter: C,
    mask: u64,
    wrap_us: u64,
    origin_raw: u64,
    reference_origin: Option<u64>,
    last_raw: Cell<u64>,
    wraps: Cell<u64>,
    period: TimeUs,
}

impl<C: RawCounter> CounterHst<C> {
    /// Sample the counter once so that device time starts at zero.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::Config`] if the counter width is outside 1..=32
    /// or `housekeeping_period` is not shorter than one wrap period.
    pub fn new(counter: C, housekeeping_period: TimeUs) -> RobotResult<Self> {
        let bits = counter.width_bits();
        if !(1..=32).contains(&bits) {
            return Err(RobotError::Config(format!(
                "counter width must be 1..=32 bits, got {bits}"
            )));
        }

        let wrap_us = 1u64 << bits;
        if housekeeping_period.get() >= wrap_us || housekeeping_period == TimeUs::ZERO {
            return Err(RobotError::Config(format!(
                "housekeeping period {housekeeping_period} must be non-zero and shorter than the {wrap_us}us wrap period"
            )));
        }

        let mask = wrap_us - 1;
        let origin_raw = u64::from(counter.read()) & mask;
        let reference_origin = counter.reference_us();
        debug!(bits, origin_raw, "counter HST zeroed");

        Ok(Self {
            counter,
            mask,
            wrap_us,
            origin_raw,
            reference_origin,
            last_raw: Cell::new(origin_raw),
            wraps: Cell::new(0),
            period: housekeeping_period,
        })
    }

    /// Wraps booked so far.
    #[must_use]
    pub fn wraps(&self) -> u64 {
        self.wraps.get()
    }

    /// Time for the raw counter to wrap once.
    #[must_use]
    pub fn wrap_period(&self) -> TimeUs {
        TimeUs::new(self.wrap_us)
    }

    fn observe(&self) -> u64 {
        let raw = u64::from(self.counter.read()) & self.mask;
        if raw < self.last_raw.get() {
            self.wraps.set(self.wraps.get() + 1);
        }
        self.last_raw.set(raw);
        (self.wraps.get() * self.wrap_us + raw).saturating_sub(self.origin_raw)
    }
}

impl<C: RawCounter> HighSpeedTimer for CounterHst<C> {
    fn us_since_device_start(&self) -> DeviceTimeUs {
        DeviceTimeUs::new(self.observe())
    }

    fn housekeeping(&self) -> RobotResult<TimeUs> {
        let now = self.observe();

        if let (Some(origin), Some(reference)) =
            (self.reference_origin, self.counter.reference_us())
        {
            let expected = reference.saturating_sub(origin);
            if expected > now + self.wrap_us / 2 {
                return Err(RobotError::TimingViolation(format!(
                    "device time {now}us trails reference {expected}us: at least one {}us counter wrap was missed",
                    self.wrap_us
                )));
            }
        }

        trace!(now_us = now, wraps = self.wraps.get(), "HST housekeeping");
        Ok(self.period)
    }

    fn debug_name(&self) -> &str {
        "Counter High Speed Timer"
    }
}

/// A simulated narrow counter sliced out of a wide time source.
///
/// Starts at an arbitrary `phase` like a real free-running counter, and can
/// optionally expose the wide source as its reference clock.
pub struct SyntheticCounter {
    width_bits: u32,
    source: Rc<dyn HighSpeedTimer>,
    phase: u64,
    with_reference: bool,
}

impl SyntheticCounter {
    /// Counter of `width_bits` driven by `source`, starting at raw `phase`.
    #[must_use]
    pub fn new(width_bits: u32, source: Rc<dyn HighSpeedTimer>, phase: u64) -> Self {
        Self {
            width_bits,
            source,
            phase,
            with_reference: true,
        }
    }

    /// Hide the reference clock, as on hardware without an RTC.
    #[must_use]
    pub fn without_reference(mut self) -> Self {
        self.with_reference = false;
        self
    }

    fn wide(&self) -> u64 {
        self.source.us_since_device_start().get() + self.phase
    }
}

impl RawCounter for SyntheticCounter {
    fn width_bits(&self) -> u32 {
        self.width_bits
    }

    fn read(&self) -> u32 {
        let mask = (1u64 << self.width_bits.min(32)) - 1;
        u32::try_from(self.wide() & mask).unwrap_or(u32::MAX)
    }

    fn reference_us(&self) -> Option<u64> {
        self.with_reference.then(|| self.wide())
    }
}

/// Host `CLOCK_MONOTONIC`, zeroed at construction.
#[derive(Debug)]
pub struct MonotonicHst {
    origin_us: u64,
    last_us: Cell<u64>,
}

fn monotonic_us() -> RobotResult<u64> {
    use nix::time::{clock_gettime, ClockId};

    let ts = clock_gettime(ClockId::CLOCK_MONOTONIC)
        .map_err(|e| RobotError::Io(format!("clock_gettime(CLOCK_MONOTONIC): {e}")))?;
    let secs = u64::try_from(ts.tv_sec()).unwrap_or(0);
    let nanos = u64::try_from(ts.tv_nsec()).unwrap_or(0);
    Ok(secs * US_PER_S + nanos / 1_000)
}

impl MonotonicHst {
    /// Read the host clock once to establish the zero point.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::Io`] if the monotonic clock is unavailable.
    pub fn new() -> RobotResult<Self> {
        Ok(Self {
            origin_us: monotonic_us()?,
            last_us: Cell::new(0),
        })
    }
}

impl HighSpeedTimer for MonotonicHst {
    fn us_since_device_start(&self) -> DeviceTimeUs {
        let now = monotonic_us()
            .map(|us| us.saturating_sub(self.origin_us))
            .unwrap_or(0)
            .max(self.last_us.get());
        self.last_us.set(now);
        DeviceTimeUs::new(now)
    }

    fn housekeeping(&self) -> RobotResult<TimeUs> {
        // The host clock is already 64 bits wide; nothing to account for.
        Ok(TimeUs::from_secs(1))
    }

    fn debug_name(&self) -> &str {
        "Monotonic High Speed Timer"
    }
}

/// Manually advanced clock for tests and deterministic simulation.
#[derive(Debug, Default)]
pub struct SimHst {
    now_us: Cell<u64>,
}

impl SimHst {
    /// Clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward.
    pub fn advance(&self, by: TimeUs) {
        self.now_us.set(self.now_us.get().saturating_add(by.get()));
    }
}

impl HighSpeedTimer for SimHst {
    fn us_since_device_start(&self) -> DeviceTimeUs {
        DeviceTimeUs::new(self.now_us.get())
    }

    fn housekeeping(&self) -> RobotResult<TimeUs> {
        Ok(TimeUs::from_secs(1))
    }

    fn debug_name(&self) -> &str {
        "Sim High Speed Timer"
    }
}

/// Registers an HST's housekeeping with the Scheduler.
pub struct HstHousekeeping {
    hst: Rc<dyn HighSpeedTimer>,
    name: String,
}

impl HstHousekeeping {
    /// Wrap `hst`.
    #[must_use]
    pub fn new(hst: Rc<dyn HighSpeedTimer>) -> Self {
        let name = hst.debug_name().to_string();
        Self { hst, name }
    }
}

impl Command for HstHousekeeping {
    fn execute(&mut self) -> RobotResult<TimeUs> {
        self.hst.housekeeping()
    }

    fn debug_name(&self) -> &str {
        &self.name
    }
}
