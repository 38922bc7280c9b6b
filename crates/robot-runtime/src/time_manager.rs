//! Wall-clock reconciliation.
//!
//! The Time Manager periodically samples an external wall clock and the HST
//! and publishes `offset = wall - device` through a [`WallClock`] handle.
//! Only the offset ever changes; device time is never rewritten, so
//! timestamps recorded earlier stay consistent with each other.
//!
//! Wall-clock steps (in either direction) are accepted as-is. Steps larger
//! than the configured threshold are logged.

use crate::command::Command;
use crate::hst::HighSpeedTimer;
use robot_common::{us_to_ms, DeviceTimeMs, RealTimeS, RobotResult, TimeUs, MS_PER_S};
use std::cell::Cell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// External source of wall-clock seconds.
pub trait RealTimeSource {
    /// Seconds since 1970-01-01T00:00:00Z, or `None` if unavailable right now.
    fn seconds_since_1970(&self) -> Option<RealTimeS>;
}

/// The host's system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRealTime;

impl RealTimeSource for SystemRealTime {
    fn seconds_since_1970(&self) -> Option<RealTimeS> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| RealTimeS::new(d.as_secs()))
    }
}

/// A wall clock set by hand, for tests and simulation.
#[derive(Debug, Default)]
pub struct ScriptedRealTime {
    now: Cell<Option<RealTimeS>>,
}

impl ScriptedRealTime {
    /// Unavailable until [`Self::set`] is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value the next sample returns (`None` = unavailable).
    pub fn set(&self, now: Option<RealTimeS>) {
        self.now.set(now);
    }
}

impl RealTimeSource for ScriptedRealTime {
    fn seconds_since_1970(&self) -> Option<RealTimeS> {
        self.now.get()
    }
}

#[derive(Debug, Default)]
struct WallClockState {
    offset_ms: Cell<Option<i64>>,
    last_sync: Cell<Option<DeviceTimeMs>>,
    syncs: Cell<u64>,
}

/// Read side of the Time Manager, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct WallClock {
    state: Rc<WallClockState>,
}

impl WallClock {
    /// Current `wall - device` offset in milliseconds, once synchronized.
    #[must_use]
    pub fn offset_ms(&self) -> Option<i64> {
        self.state.offset_ms.get()
    }

    /// True after the first successful sample.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.offset_ms().is_some()
    }

    /// Successful samples so far.
    #[must_use]
    pub fn sync_count(&self) -> u64 {
        self.state.syncs.get()
    }

    /// Device time of the last successful sample.
    #[must_use]
    pub fn last_sync(&self) -> Option<DeviceTimeMs> {
        self.state.last_sync.get()
    }

    /// Wall-clock seconds corresponding to a device timestamp.
    ///
    /// `None` before the first sync, or if the result would precede 1970.
    #[must_use]
    pub fn to_real_time(&self, device: DeviceTimeMs) -> Option<RealTimeS> {
        let offset = self.offset_ms()?;
        let device = i64::try_from(device.get()).ok()?;
        let wall_ms = device.checked_add(offset)?;
        let wall_s = u64::try_from(wall_ms).ok()? / MS_PER_S;
        Some(RealTimeS::new(wall_s))
    }

    fn publish(&self, offset_ms: i64, at: DeviceTimeMs) {
        self.state.offset_ms.set(Some(offset_ms));
        self.state.last_sync.set(Some(at));
        self.state.syncs.set(self.state.syncs.get() + 1);
    }
}

/// Periodic wall-clock resync Command.
pub struct TimeManager {
    source: Rc<dyn RealTimeSource>,
    hst: Rc<dyn HighSpeedTimer>,
    clock: WallClock,
    resync_period: TimeUs,
    step_warn_ms: u64,
}

impl TimeManager {
    /// Resync every `resync_period`; warn on steps above `step_warn_threshold`.
    #[must_use]
    pub fn new(
        source: Rc<dyn RealTimeSource>,
        hst: Rc<dyn HighSpeedTimer>,
        resync_period: TimeUs,
        step_warn_threshold: TimeUs,
    ) -> Self {
        Self {
            source,
            hst,
            clock: WallClock::default(),
            resync_period,
            step_warn_ms: us_to_ms(step_warn_threshold).get(),
        }
    }

    /// Handle for converting device time to wall-clock time.
    #[must_use]
    pub fn wall_clock(&self) -> WallClock {
        self.clock.clone()
    }
}

impl Command for TimeManager {
    fn execute(&mut self) -> RobotResult<TimeUs> {
        let device = self.hst.ms_since_device_start();

        let Some(wall) = self.source.seconds_since_1970() else {
            debug!(device = %device, "Wall clock unavailable; keeping previous offset");
            return Ok(self.resync_period);
        };

        let wall_ms = i64::try_from(wall.get().saturating_mul(MS_PER_S)).unwrap_or(i64::MAX);
        let device_ms = i64::try_from(device.get()).unwrap_or(i64::MAX);
        let offset = wall_ms.saturating_sub(device_ms);

        match self.clock.offset_ms() {
            None => info!(wall = %wall, device = %device, "Wall clock synchronized"),
            Some(previous) => {
                let step_ms = offset.saturating_sub(previous);
                if step_ms.unsigned_abs() > self.step_warn_ms {
                    warn!(
                        step_ms,
                        backwards = step_ms < 0,
                        "Wall clock stepped; device time unaffected"
                    );
                }
            }
        }

        self.clock.publish(offset, device);
        Ok(self.resync_period)
    }

    fn debug_name(&self) -> &str {
        "Time Manager"
    }
}
