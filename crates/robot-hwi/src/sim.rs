//! Simulated hardware backend.
//!
//! Pins live in memory. Inputs default to [`PinState::InputLow`] and can be
//! scripted with [`SimulatedHwi::set_input`]; every output write is logged so
//! tests can assert on the exact drive sequence. Analog pins without a
//! scripted value return a small deterministic wobble around a midpoint.

use crate::{Hwi, Pin, PinIoMode, PinModes, PinState, ANALOG_MAX};
use robot_common::RobotResult;
use std::cell::{Cell, RefCell};
use tracing::trace;

/// Center of the synthetic analog signal.
const ANALOG_MIDPOINT: u16 = 200;

/// In-memory [`Hwi`] backend.
#[derive(Debug, Default)]
pub struct SimulatedHwi {
    modes: PinModes,
    outputs: [Cell<Option<PinState>>; Pin::COUNT],
    inputs: [Cell<Option<PinState>>; Pin::COUNT],
    analog: [Cell<Option<u16>>; Pin::COUNT],
    analog_reads: Cell<u32>,
    writes: RefCell<Vec<(Pin, PinState)>>,
}

impl SimulatedHwi {
    /// Create a backend with every pin unconfigured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the level an input pin will report.
    ///
    /// # Panics
    ///
    /// Panics if `state` is a drive state rather than an input level.
    pub fn set_input(&self, pin: Pin, state: PinState) {
        assert!(!state.is_drive(), "inputs are sensed as InputLow/InputHigh");
        self.inputs[pin.index()].set(Some(state));
    }

    /// Pin an analog input to a fixed sample (clamped to `ANALOG_MAX`).
    pub fn set_analog(&self, pin: Pin, value: u16) {
        self.analog[pin.index()].set(Some(value.min(ANALOG_MAX)));
    }

    /// Last state written to `pin`.
    #[must_use]
    pub fn output(&self, pin: Pin) -> Option<PinState> {
        self.outputs[pin.index()].get()
    }

    /// Current mode of `pin`.
    #[must_use]
    pub fn mode(&self, pin: Pin) -> Option<PinIoMode> {
        self.modes.get(pin)
    }

    /// Every write since creation (or the last [`Self::clear_writes`]).
    #[must_use]
    pub fn writes(&self) -> Vec<(Pin, PinState)> {
        self.writes.borrow().clone()
    }

    /// Forget the write log.
    pub fn clear_writes(&self) {
        self.writes.borrow_mut().clear();
    }

    fn synthetic_sample(&self) -> u16 {
        let count = self.analog_reads.get();
        self.analog_reads.set(count.wrapping_add(1));

        // 0..=15, rising slowly, alternating sign on every read
        #[allow(clippy::cast_possible_truncation)]
        let amplitude = (((count / 2) & 0xfff) / 256) as u16;
        if count & 1 == 1 {
            ANALOG_MIDPOINT + amplitude
        } else {
            ANALOG_MIDPOINT - amplitude
        }
    }
}

impl Hwi for SimulatedHwi {
    fn pin_mode(&self, pin: Pin, mode: PinIoMode) -> RobotResult<()> {
        trace!(pin = %pin, mode = %mode, "pin mode");
        self.modes.set(pin, mode);
        Ok(())
    }

    fn digital_write(&self, pin: Pin, state: PinState) -> RobotResult<()> {
        self.modes.require_write(pin, state)?;
        trace!(pin = %pin, state = %state, "digital write");
        self.outputs[pin.index()].set(Some(state));
        self.writes.borrow_mut().push((pin, state));
        Ok(())
    }

    fn digital_read(&self, pin: Pin) -> RobotResult<PinState> {
        self.modes.require(pin, PinIoMode::Input, "digital_read")?;
        Ok(self.inputs[pin.index()].get().unwrap_or(PinState::InputLow))
    }

    fn analog_read(&self, pin: Pin) -> RobotResult<u16> {
        self.modes.require(pin, PinIoMode::Input, "analog_read")?;
        Ok(self.analog[pin.index()]
            .get()
            .unwrap_or_else(|| self.synthetic_sample()))
    }

    fn debug_name(&self) -> &str {
        "Simulated HWI"
    }
}
