//! Hardware Interface (HWI) abstractions.
//!
//! This crate provides:
//! - [`Hwi`] trait for logical-pin I/O, independent of the backend
//! - [`pins`] module with the closed pin / state / mode registries
//! - [`sim`] module with a deterministic in-memory backend
//! - [`sysfs`] module with the Linux `/sys/class/gpio` backend
//!
//! Backends are chosen once when the firmware is wired together; control
//! logic only ever sees `Rc<dyn Hwi>`.

pub mod pins;
pub mod sim;
pub mod sysfs;

pub use pins::*;
pub use sim::SimulatedHwi;
pub use sysfs::SysfsHwi;

use robot_common::{RobotError, RobotResult};
use std::cell::Cell;

/// Upper bound of [`Hwi::analog_read`]. Samples lie in `0..=ANALOG_MAX`
/// regardless of the converter behind the backend.
pub const ANALOG_MAX: u16 = 1023;

/// Logical-pin hardware access.
///
/// Methods take `&self`: the firmware is single-threaded and every Command
/// that touches pins shares one backend. A pin must be configured with
/// [`Hwi::pin_mode`] before use; reading an output or writing an input is a
/// [`RobotError::PinModeViolation`].
pub trait Hwi {
    /// Configure the direction of `pin`. Commits to `mode` for all later calls.
    fn pin_mode(&self, pin: Pin, mode: PinIoMode) -> RobotResult<()>;

    /// Drive an output pin to `state`.
    fn digital_write(&self, pin: Pin, state: PinState) -> RobotResult<()>;

    /// Sense the level of an input pin.
    fn digital_read(&self, pin: Pin) -> RobotResult<PinState>;

    /// Sample an input pin, scaled to `0..=ANALOG_MAX`.
    fn analog_read(&self, pin: Pin) -> RobotResult<u16>;

    /// Backend name for diagnostics.
    fn debug_name(&self) -> &str;
}

/// Per-pin mode bookkeeping shared by every backend.
#[derive(Debug)]
pub struct PinModes {
    modes: [Cell<Option<PinIoMode>>; Pin::COUNT],
}

impl Default for PinModes {
    fn default() -> Self {
        Self::new()
    }
}

impl PinModes {
    /// All pins unconfigured.
    #[must_use]
    pub fn new() -> Self {
        Self {
            modes: std::array::from_fn(|_| Cell::new(None)),
        }
    }

    /// Record the mode of `pin`.
    pub fn set(&self, pin: Pin, mode: PinIoMode) {
        self.modes[pin.index()].set(Some(mode));
    }

    /// Current mode of `pin`, if configured.
    #[must_use]
    pub fn get(&self, pin: Pin) -> Option<PinIoMode> {
        self.modes[pin.index()].get()
    }

    /// Fail unless `pin` is configured as `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::PinModeViolation`] for a mismatched or
    /// unconfigured pin.
    pub fn require(
        &self,
        pin: Pin,
        expected: PinIoMode,
        operation: &'static str,
    ) -> RobotResult<()> {
        match self.get(pin) {
            Some(mode) if mode == expected => Ok(()),
            other => Err(RobotError::PinModeViolation {
                pin: pin.name().to_string(),
                mode: other.map_or_else(|| "unconfigured".to_string(), |m| m.name().to_string()),
                operation,
            }),
        }
    }

    /// Fail unless `pin` is an output and `state` is a drive state.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::PinModeViolation`] otherwise.
    pub fn require_write(&self, pin: Pin, state: PinState) -> RobotResult<()> {
        self.require(pin, PinIoMode::Output, "digital_write")?;
        if state.is_drive() {
            Ok(())
        } else {
            Err(RobotError::PinModeViolation {
                pin: pin.name().to_string(),
                mode: PinIoMode::Output.name().to_string(),
                operation: "digital_write of an input state",
            })
        }
    }
}
