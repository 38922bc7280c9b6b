//! Two-channel quadrature encoder.

use crate::command::Command;
use robot_common::{RobotResult, TimeUs};
use robot_hwi::{Hwi, Pin, PinIoMode, PinState};
use std::cell::Cell;
use std::rc::Rc;
use tracing::trace;

/// Tick delta indexed by `previous_sample * 4 + current_sample`, where a
/// sample is `(pin0 << 1) | pin1`. Gray-code order 00 → 01 → 11 → 10 is
/// forward.
const TRANSITIONS: [i8; 16] = [
    0, 1, -1, 0, //
    -1, 0, 0, 1, //
    1, 0, 0, -1, //
    0, -1, 1, 0, //
];

/// Both channels changed at once: the encoder moved two steps between
/// samples and the direction is unknowable.
const fn is_double_step(index: usize) -> bool {
    matches!(index, 3 | 6 | 9 | 12)
}

#[derive(Debug, Default)]
struct EncoderShared {
    ticks: Cell<i64>,
    invalid: Cell<u64>,
}

/// Read-only view of an [`Encoder`].
#[derive(Debug, Clone, Default)]
pub struct EncoderHandle {
    shared: Rc<EncoderShared>,
}

impl EncoderHandle {
    /// Accumulated signed tick count.
    #[must_use]
    pub fn ticks(&self) -> i64 {
        self.shared.ticks.get()
    }

    /// Transitions that skipped a state, i.e. evidence of undersampling.
    #[must_use]
    pub fn invalid_transitions(&self) -> u64 {
        self.shared.invalid.get()
    }
}

/// Encoder worker Command.
pub struct Encoder {
    name: String,
    hwi: Rc<dyn Hwi>,
    pins: (Pin, Pin),
    previous: u8,
    rearm: TimeUs,
    handle: EncoderHandle,
}

impl Encoder {
    /// Configure both pins as inputs and take the resting state as the
    /// starting sample.
    ///
    /// # Errors
    ///
    /// Propagates pin configuration and read failures.
    pub fn new(
        name: impl Into<String>,
        hwi: Rc<dyn Hwi>,
        pins: (Pin, Pin),
        rearm: TimeUs,
    ) -> RobotResult<Self> {
        hwi.pin_mode(pins.0, PinIoMode::Input)?;
        hwi.pin_mode(pins.1, PinIoMode::Input)?;
        let mut encoder = Self {
            name: name.into(),
            hwi,
            pins,
            previous: 0b00,
            rearm,
            handle: EncoderHandle::default(),
        };
        encoder.previous = encoder.sample()?;
        Ok(encoder)
    }

    /// Observation handle.
    #[must_use]
    pub fn handle(&self) -> EncoderHandle {
        self.handle.clone()
    }

    fn sample(&self) -> RobotResult<u8> {
        let a = self.hwi.digital_read(self.pins.0)? == PinState::InputHigh;
        let b = self.hwi.digital_read(self.pins.1)? == PinState::InputHigh;
        Ok((u8::from(a) << 1) | u8::from(b))
    }
}

impl Command for Encoder {
    fn execute(&mut self) -> RobotResult<TimeUs> {
        let current = self.sample()?;
        let index = usize::from(self.previous) * 4 + usize::from(current);
        let delta = TRANSITIONS[index];

        let shared = &self.handle.shared;
        if is_double_step(index) {
            shared.invalid.set(shared.invalid.get() + 1);
            trace!(
                encoder = %self.name,
                from = self.previous,
                to = current,
                "Double-step transition"
            );
        }
        shared.ticks.set(shared.ticks.get() + i64::from(delta));

        self.previous = current;
        Ok(self.rearm)
    }

    fn debug_name(&self) -> &str {
        &self.name
    }
}
