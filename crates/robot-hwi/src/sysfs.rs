//! Linux sysfs GPIO backend.
//!
//! Digital pins use the legacy `/sys/class/gpio` interface:
//!
//! ```text
//! <root>/export            write the line number to create gpioN/
//! <root>/gpioN/direction   "in" | "out"
//! <root>/gpioN/value       "0" | "1"
//! ```
//!
//! Analog pins read a decimal sample from a configured file (typically an
//! IIO `in_voltageX_raw` node) and scale it from `analog_full_scale` onto
//! `0..=ANALOG_MAX`.

use crate::{Hwi, Pin, PinIoMode, PinModes, PinState, ANALOG_MAX};
use robot_common::{HwiConfig, RobotError, RobotResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// `/sys/class/gpio` backend.
#[derive(Debug)]
pub struct SysfsHwi {
    root: PathBuf,
    lines: [Option<u32>; Pin::COUNT],
    analog: [Option<PathBuf>; Pin::COUNT],
    analog_full_scale: u32,
    modes: PinModes,
}

fn io_error(path: &Path, err: &std::io::Error) -> RobotError {
    RobotError::Io(format!("{}: {err}", path.display()))
}

impl SysfsHwi {
    /// Build the backend from the `[hwi]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::Config`] for a key in the `gpio` or `analog` maps
    /// that does not name a logical pin.
    pub fn from_config(config: &HwiConfig) -> RobotResult<Self> {
        let mut lines = [None; Pin::COUNT];
        for (key, &line) in &config.gpio {
            let pin = Pin::from_config_key(key)
                .ok_or_else(|| RobotError::Config(format!("hwi.gpio: unknown pin key '{key}'")))?;
            lines[pin.index()] = Some(line);
        }

        let mut analog: [Option<PathBuf>; Pin::COUNT] = Default::default();
        for (key, path) in &config.analog {
            let pin = Pin::from_config_key(key).ok_or_else(|| {
                RobotError::Config(format!("hwi.analog: unknown pin key '{key}'"))
            })?;
            analog[pin.index()] = Some(path.clone());
        }

        Ok(Self {
            root: config.gpio_root.clone(),
            lines,
            analog,
            analog_full_scale: config.analog_full_scale.max(1),
            modes: PinModes::new(),
        })
    }

    fn line(&self, pin: Pin) -> RobotResult<u32> {
        self.lines[pin.index()].ok_or_else(|| {
            RobotError::Config(format!("pin {pin} has no GPIO line configured"))
        })
    }

    fn line_dir(&self, line: u32) -> PathBuf {
        self.root.join(format!("gpio{line}"))
    }

    fn write_file(path: &Path, contents: &str) -> RobotResult<()> {
        fs::write(path, contents).map_err(|e| io_error(path, &e))
    }

    fn export(&self, line: u32) -> RobotResult<()> {
        if self.line_dir(line).exists() {
            return Ok(());
        }
        debug!(line, "exporting GPIO line");
        Self::write_file(&self.root.join("export"), &line.to_string())
    }
}

impl Hwi for SysfsHwi {
    fn pin_mode(&self, pin: Pin, mode: PinIoMode) -> RobotResult<()> {
        // Analog-only inputs have no GPIO line to configure.
        if mode == PinIoMode::Input
            && self.lines[pin.index()].is_none()
            && self.analog[pin.index()].is_some()
        {
            self.modes.set(pin, mode);
            return Ok(());
        }

        let line = self.line(pin)?;
        self.export(line)?;

        let direction = match mode {
            PinIoMode::Input => "in",
            PinIoMode::Output => "out",
        };
        Self::write_file(&self.line_dir(line).join("direction"), direction)?;
        debug!(pin = %pin, line, direction, "configured pin");

        self.modes.set(pin, mode);
        Ok(())
    }

    fn digital_write(&self, pin: Pin, state: PinState) -> RobotResult<()> {
        self.modes.require_write(pin, state)?;
        let line = self.line(pin)?;
        let value = if state == PinState::MotorPos { "1" } else { "0" };
        trace!(pin = %pin, value, "digital write");
        Self::write_file(&self.line_dir(line).join("value"), value)
    }

    fn digital_read(&self, pin: Pin) -> RobotResult<PinState> {
        self.modes.require(pin, PinIoMode::Input, "digital_read")?;
        let path = self.line_dir(self.line(pin)?).join("value");
        let raw = fs::read_to_string(&path).map_err(|e| io_error(&path, &e))?;
        match raw.trim() {
            "0" => Ok(PinState::InputLow),
            "1" => Ok(PinState::InputHigh),
            other => Err(RobotError::Io(format!(
                "{}: unexpected GPIO value '{other}'",
                path.display()
            ))),
        }
    }

    fn analog_read(&self, pin: Pin) -> RobotResult<u16> {
        self.modes.require(pin, PinIoMode::Input, "analog_read")?;
        let path = self.analog[pin.index()].as_ref().ok_or_else(|| {
            RobotError::Config(format!("pin {pin} has no analog source configured"))
        })?;
        let raw = fs::read_to_string(path).map_err(|e| io_error(path, &e))?;
        let sample: u32 = raw.trim().parse().map_err(|_| {
            RobotError::Io(format!(
                "{}: unexpected analog sample '{}'",
                path.display(),
                raw.trim()
            ))
        })?;

        let scaled = u64::from(sample.min(self.analog_full_scale)) * u64::from(ANALOG_MAX)
            / u64::from(self.analog_full_scale);
        Ok(u16::try_from(scaled).unwrap_or(ANALOG_MAX))
    }

    fn debug_name(&self) -> &str {
        "sysfs GPIO"
    }
}
