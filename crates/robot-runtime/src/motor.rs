//! Bipolar motor drive with a silence watchdog.
//!
//! The motor owns two output pins and drives them full-on in one polarity
//! or the other. Other Commands steer it through a [`MotorHandle`]. Every
//! `set_direction` call counts as a refresh; if none arrives within the
//! silence window while the motor is moving, the next `execute` stops it.

use crate::command::Command;
use crate::hst::HighSpeedTimer;
use robot_common::{DeviceTimeUs, RobotResult, TimeUs};
use robot_hwi::{Hwi, Pin, PinIoMode, PinState};
use serde::Serialize;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

/// Drive direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MotorDirection {
    /// Both pins off.
    #[default]
    Stopped,
    /// Pin 0 driven, pin 1 off.
    Forward,
    /// Pin 1 driven, pin 0 off.
    Reverse,
}

impl MotorDirection {
    /// States for (pin 0, pin 1).
    #[must_use]
    pub const fn pin_states(self) -> (PinState, PinState) {
        match self {
            Self::Stopped => (PinState::MotorNeg, PinState::MotorNeg),
            Self::Forward => (PinState::MotorPos, PinState::MotorNeg),
            Self::Reverse => (PinState::MotorNeg, PinState::MotorPos),
        }
    }
}

impl fmt::Display for MotorDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "STOPPED"),
            Self::Forward => write!(f, "FORWARD"),
            Self::Reverse => write!(f, "REVERSE"),
        }
    }
}

#[derive(Debug, Default)]
struct MotorShared {
    desired: Cell<MotorDirection>,
    applied: Cell<MotorDirection>,
    refresh_seq: Cell<u64>,
    timeouts: Cell<u64>,
}

/// Steering handle for a [`Motor`].
#[derive(Debug, Clone, Default)]
pub struct MotorHandle {
    shared: Rc<MotorShared>,
}

impl MotorHandle {
    /// Request a direction. Also refreshes the silence watchdog.
    pub fn set_direction(&self, direction: MotorDirection) {
        self.shared.desired.set(direction);
        self.shared.refresh_seq.set(self.shared.refresh_seq.get() + 1);
    }

    /// Direction most recently requested (or forced by the watchdog).
    #[must_use]
    pub fn desired(&self) -> MotorDirection {
        self.shared.desired.get()
    }

    /// Direction currently applied to the pins.
    #[must_use]
    pub fn direction(&self) -> MotorDirection {
        self.shared.applied.get()
    }

    /// Times the silence watchdog stopped the motor.
    #[must_use]
    pub fn timeouts(&self) -> u64 {
        self.shared.timeouts.get()
    }
}

/// Motor worker Command.
pub struct Motor {
    name: String,
    hwi: Rc<dyn Hwi>,
    hst: Rc<dyn HighSpeedTimer>,
    pins: (Pin, Pin),
    handle: MotorHandle,
    seen_seq: u64,
    last_refresh: DeviceTimeUs,
    rearm: TimeUs,
    silence_window: TimeUs,
}

impl Motor {
    /// Configure both pins as outputs and drive them to STOPPED.
    ///
    /// # Errors
    ///
    /// Propagates pin configuration failures.
    pub fn new(
        name: impl Into<String>,
        hwi: Rc<dyn Hwi>,
        hst: Rc<dyn HighSpeedTimer>,
        pins: (Pin, Pin),
        rearm: TimeUs,
        silence_window: TimeUs,
    ) -> RobotResult<Self> {
        hwi.pin_mode(pins.0, PinIoMode::Output)?;
        hwi.pin_mode(pins.1, PinIoMode::Output)?;

        let last_refresh = hst.us_since_device_start();
        let motor = Self {
            name: name.into(),
            hwi,
            hst,
            pins,
            handle: MotorHandle::default(),
            seen_seq: 0,
            last_refresh,
            rearm,
            silence_window,
        };
        motor.apply(MotorDirection::Stopped)?;
        Ok(motor)
    }

    /// Steering handle.
    #[must_use]
    pub fn handle(&self) -> MotorHandle {
        self.handle.clone()
    }

    fn apply(&self, direction: MotorDirection) -> RobotResult<()> {
        let (a, b) = direction.pin_states();
        self.hwi.digital_write(self.pins.0, a)?;
        self.hwi.digital_write(self.pins.1, b)?;
        self.handle.shared.applied.set(direction);
        Ok(())
    }
}

impl Command for Motor {
    fn execute(&mut self) -> RobotResult<TimeUs> {
        let now = self.hst.us_since_device_start();
        let shared = &self.handle.shared;

        let seq = shared.refresh_seq.get();
        if seq != self.seen_seq {
            self.seen_seq = seq;
            self.last_refresh = now;
        }

        let mut desired = shared.desired.get();
        let silent_for = now.saturating_duration_since(self.last_refresh);
        if desired != MotorDirection::Stopped && silent_for > self.silence_window {
            warn!(
                motor = %self.name,
                silent_for = %silent_for,
                was = %desired,
                "No direction refresh within silence window; stopping motor"
            );
            shared.desired.set(MotorDirection::Stopped);
            shared.timeouts.set(shared.timeouts.get() + 1);
            desired = MotorDirection::Stopped;
        }

        if desired != shared.applied.get() {
            debug!(motor = %self.name, direction = %desired, "Applying direction");
            self.apply(desired)?;
        }

        Ok(self.rearm)
    }

    fn debug_name(&self) -> &str {
        &self.name
    }

    fn enter_safe_state(&mut self) {
        self.handle.shared.desired.set(MotorDirection::Stopped);
        if let Err(e) = self.apply(MotorDirection::Stopped) {
            warn!(motor = %self.name, error = %e, "Failed to stop motor");
        }
    }
}
