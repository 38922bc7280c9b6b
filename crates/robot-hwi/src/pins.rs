//! Logical pin registry.
//!
//! Every closed enumeration here is paired with an array indexed by the
//! enumerator's ordinal, so a missing diagnostic name is a compile error
//! (array length) rather than a failed lookup at runtime. The
//! [`verify_pin_tables`] startup check additionally catches a reordered
//! `ALL` list or duplicate names.

use robot_common::{RobotError, RobotResult};
use static_assertions::{const_assert, const_assert_eq};
use std::fmt;

/// Logical pins, decoupled from physical numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(usize)]
pub enum Pin {
    /// First polarity pin of motor 0.
    Motor0Pin0,
    /// Second polarity pin of motor 0.
    Motor0Pin1,
    /// First polarity pin of motor 1.
    Motor1Pin0,
    /// Second polarity pin of motor 1.
    Motor1Pin1,
    /// Phase A of encoder 0.
    Encoder0Pin0,
    /// Phase B of encoder 0.
    Encoder0Pin1,
    /// Phase A of encoder 1.
    Encoder1Pin0,
    /// Phase B of encoder 1.
    Encoder1Pin1,
    /// Analog battery voltage divider.
    BatterySense,
}

impl Pin {
    /// Number of logical pins.
    pub const COUNT: usize = 9;

    /// Every pin in ordinal order.
    pub const ALL: [Pin; Pin::COUNT] = [
        Pin::Motor0Pin0,
        Pin::Motor0Pin1,
        Pin::Motor1Pin0,
        Pin::Motor1Pin1,
        Pin::Encoder0Pin0,
        Pin::Encoder0Pin1,
        Pin::Encoder1Pin0,
        Pin::Encoder1Pin1,
        Pin::BatterySense,
    ];

    /// Ordinal, usable as an index into per-pin arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Human-readable name for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        PIN_NAMES[self.index()]
    }

    /// Key used for this pin in configuration maps.
    #[must_use]
    pub const fn config_key(self) -> &'static str {
        PIN_KEYS[self.index()]
    }

    /// Look up a pin by its configuration key.
    #[must_use]
    pub fn from_config_key(key: &str) -> Option<Pin> {
        Pin::ALL.into_iter().find(|pin| pin.config_key() == key)
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const PIN_NAMES: [&str; Pin::COUNT] = [
    "Motor0 Pin0",
    "Motor0 Pin1",
    "Motor1 Pin0",
    "Motor1 Pin1",
    "Encoder0 Pin0",
    "Encoder0 Pin1",
    "Encoder1 Pin0",
    "Encoder1 Pin1",
    "Battery Sense",
];

const PIN_KEYS: [&str; Pin::COUNT] = [
    "motor0_pin0",
    "motor0_pin1",
    "motor1_pin0",
    "motor1_pin1",
    "encoder0_pin0",
    "encoder0_pin1",
    "encoder1_pin0",
    "encoder1_pin1",
    "battery_sense",
];

/// Semantic pin value, not a raw voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum PinState {
    /// Drive the output high.
    MotorPos,
    /// Drive the output low.
    MotorNeg,
    /// Input sensed at ground.
    InputLow,
    /// Input sensed at supply.
    InputHigh,
}

impl PinState {
    /// Number of pin states.
    pub const COUNT: usize = 4;

    /// Every state in ordinal order.
    pub const ALL: [PinState; PinState::COUNT] = [
        PinState::MotorPos,
        PinState::MotorNeg,
        PinState::InputLow,
        PinState::InputHigh,
    ];

    /// Ordinal.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Human-readable name for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        PIN_STATE_NAMES[self.index()]
    }

    /// True for the states an output pin can be driven to.
    #[must_use]
    pub const fn is_drive(self) -> bool {
        matches!(self, PinState::MotorPos | PinState::MotorNeg)
    }
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const PIN_STATE_NAMES: [&str; PinState::COUNT] =
    ["Voltage On", "Voltage Off", "Input GND", "Input VCC"];

/// Pin direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum PinIoMode {
    /// Readable pin.
    Input,
    /// Writable pin.
    Output,
}

impl PinIoMode {
    /// Number of I/O modes.
    pub const COUNT: usize = 2;

    /// Every mode in ordinal order.
    pub const ALL: [PinIoMode; PinIoMode::COUNT] = [PinIoMode::Input, PinIoMode::Output];

    /// Ordinal.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Human-readable name for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        PIN_IO_MODE_NAMES[self.index()]
    }
}

impl fmt::Display for PinIoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const PIN_IO_MODE_NAMES: [&str; PinIoMode::COUNT] = ["Input", "Output"];

// The last enumerator pins each COUNT to the enum itself.
const_assert_eq!(Pin::BatterySense as usize + 1, Pin::COUNT);
const_assert_eq!(PinState::InputHigh as usize + 1, PinState::COUNT);
const_assert_eq!(PinIoMode::Output as usize + 1, PinIoMode::COUNT);

const fn all_named(table: &[&str]) -> bool {
    let mut i = 0;
    while i < table.len() {
        if table[i].is_empty() {
            return false;
        }
        i += 1;
    }
    true
}

const_assert!(all_named(&PIN_NAMES));
const_assert!(all_named(&PIN_KEYS));
const_assert!(all_named(&PIN_STATE_NAMES));
const_assert!(all_named(&PIN_IO_MODE_NAMES));

fn verify_table<T: fmt::Debug + Copy>(
    table: &'static str,
    all: &[T],
    index: impl Fn(T) -> usize,
    name: impl Fn(T) -> &'static str,
) -> RobotResult<()> {
    for (position, &item) in all.iter().enumerate() {
        let label = name(item);
        let duplicate = all[..position].iter().any(|&other| name(other) == label);
        if index(item) != position || label.is_empty() || duplicate {
            return Err(RobotError::IncompleteRegistry {
                table,
                missing: format!("{item:?}"),
            });
        }
    }
    Ok(())
}

/// Startup check that every pin, pin state, and I/O mode has a distinct,
/// non-empty diagnostic name at its own ordinal.
///
/// # Errors
///
/// Returns [`RobotError::IncompleteRegistry`] naming the first bad entry.
pub fn verify_pin_tables() -> RobotResult<()> {
    verify_table("pin names", &Pin::ALL, Pin::index, Pin::name)?;
    verify_table("pin config keys", &Pin::ALL, Pin::index, Pin::config_key)?;
    verify_table(
        "pin state names",
        &PinState::ALL,
        PinState::index,
        PinState::name,
    )?;
    verify_table(
        "pin io mode names",
        &PinIoMode::ALL,
        PinIoMode::index,
        PinIoMode::name,
    )
}
