//! Configuration structures for the robot firmware.
//!
//! Supports TOML deserialization with sensible defaults for simulation and
//! explicit values for deployment on hardware.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level firmware configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FirmwareConfig {
    /// Scheduler diagnostics.
    pub scheduler: SchedulerConfig,
    /// High-speed timer backend.
    pub hst: HstConfig,
    /// Wall-clock reconciliation.
    pub time: TimeConfig,
    /// Hardware interface backend and pin mapping.
    pub hwi: HwiConfig,
    /// Motor worker.
    pub motor: MotorConfig,
    /// Encoder worker.
    pub encoder: EncoderConfig,
    /// Remote command transport.
    pub net: NetConfig,
    /// Remote command processor.
    pub command: CommandConfig,
    /// Debug sink.
    pub debug: DebugConfig,
}

/// Scheduler diagnostics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Size of the dispatch lateness ring buffer.
    pub lateness_histogram_size: usize,

    /// Dispatches later than this are counted as late.
    #[serde(with = "humantime_serde")]
    pub late_tolerance: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lateness_histogram_size: 1024,
            late_tolerance: Duration::from_millis(2),
        }
    }
}

/// Source of monotonic device time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HstBackend {
    /// Host `CLOCK_MONOTONIC`.
    #[default]
    Monotonic,
    /// A narrow free-running counter synthesized from the host clock.
    /// Exercises wrap accounting exactly as a microcontroller timer would.
    SimulatedCounter,
}

/// High-speed timer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HstConfig {
    /// Backend selection.
    pub backend: HstBackend,

    /// Width of the raw counter for counter-based backends.
    pub counter_width_bits: u32,

    /// Interval between wrap-accounting passes. Must be shorter than one wrap.
    #[serde(with = "humantime_serde")]
    pub housekeeping_period: Duration,
}

impl Default for HstConfig {
    fn default() -> Self {
        Self {
            backend: HstBackend::Monotonic,
            counter_width_bits: 32,
            housekeeping_period: Duration::from_secs(1),
        }
    }
}

impl HstConfig {
    /// Time for a counter of `counter_width_bits` microsecond ticks to wrap once.
    #[must_use]
    pub fn wrap_period(&self) -> Duration {
        let bits = self.counter_width_bits.min(63);
        Duration::from_micros(1u64 << bits)
    }
}

/// Wall-clock reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// How often the Time Manager resamples the wall clock.
    #[serde(with = "humantime_serde")]
    pub resync_period: Duration,

    /// Wall-clock steps larger than this are logged as warnings.
    #[serde(with = "humantime_serde")]
    pub step_warn_threshold: Duration,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            resync_period: Duration::from_secs(60),
            step_warn_threshold: Duration::from_secs(1),
        }
    }
}

/// Hardware interface backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HwiBackend {
    /// Deterministic in-memory pins.
    #[default]
    Simulated,
    /// Linux `/sys/class/gpio`.
    Sysfs,
}

/// Hardware interface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HwiConfig {
    /// Backend selection.
    pub backend: HwiBackend,

    /// Root of the sysfs GPIO tree.
    pub gpio_root: PathBuf,

    /// Logical pin key (e.g. `motor0_pin0`) to GPIO line number.
    pub gpio: BTreeMap<String, u32>,

    /// Logical pin key to a file holding a raw analog sample.
    pub analog: BTreeMap<String, PathBuf>,

    /// Full-scale value of the raw analog samples, mapped onto the
    /// firmware's fixed analog range.
    pub analog_full_scale: u32,
}

impl Default for HwiConfig {
    fn default() -> Self {
        Self {
            backend: HwiBackend::Simulated,
            gpio_root: PathBuf::from("/sys/class/gpio"),
            gpio: BTreeMap::new(),
            analog: BTreeMap::new(),
            analog_full_scale: 4095,
        }
    }
}

/// Motor worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    /// Delay between motor executions.
    #[serde(with = "humantime_serde")]
    pub rearm: Duration,

    /// Without a direction refresh for this long, the motor stops itself.
    #[serde(with = "humantime_serde")]
    pub silence_window: Duration,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            rearm: Duration::from_millis(10),
            silence_window: Duration::from_secs(1),
        }
    }
}

/// Encoder worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Sampling interval. Must be shorter than the fastest phase transition.
    #[serde(with = "humantime_serde")]
    pub rearm: Duration,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            rearm: Duration::from_micros(500),
        }
    }
}

/// Remote command transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetBackend {
    /// No remote commands.
    #[default]
    None,
    /// Lines from standard input, replies on standard output.
    Stdin,
    /// Single-client TCP listener.
    Tcp,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Backend selection.
    pub backend: NetBackend,

    /// Listen address for the TCP backend.
    pub listen: String,

    /// Interval between connection housekeeping passes.
    #[serde(with = "humantime_serde")]
    pub poll_period: Duration,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            backend: NetBackend::None,
            listen: String::from("0.0.0.0:4000"),
            poll_period: Duration::from_millis(100),
        }
    }
}

/// Command processor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Interval between command intake passes.
    #[serde(with = "humantime_serde")]
    pub poll_period: Duration,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_millis(20),
        }
    }
}

/// Debug sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Start with the debug sink enabled.
    pub enabled: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl FirmwareConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("hst.housekeeping_period", self.hst.housekeeping_period),
            ("time.resync_period", self.time.resync_period),
            ("motor.rearm", self.motor.rearm),
            ("motor.silence_window", self.motor.silence_window),
            ("encoder.rearm", self.encoder.rearm),
            ("net.poll_period", self.net.poll_period),
            ("command.poll_period", self.command.poll_period),
        ];
        for (name, period) in periods {
            if period.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }

        if self.motor.silence_window <= self.motor.rearm {
            return Err(ConfigError::Invalid(format!(
                "motor.silence_window ({}) must be longer than motor.rearm ({})",
                humantime::format_duration(self.motor.silence_window),
                humantime::format_duration(self.motor.rearm)
            )));
        }

        if !(8..=32).contains(&self.hst.counter_width_bits) {
            return Err(ConfigError::Invalid(format!(
                "hst.counter_width_bits must be within 8..=32, got {}",
                self.hst.counter_width_bits
            )));
        }

        if self.hst.backend == HstBackend::SimulatedCounter
            && self.hst.housekeeping_period >= self.hst.wrap_period()
        {
            return Err(ConfigError::Invalid(format!(
                "hst.housekeeping_period ({}) must be shorter than the counter wrap period ({})",
                humantime::format_duration(self.hst.housekeeping_period),
                humantime::format_duration(self.hst.wrap_period())
            )));
        }

        if self.net.backend == NetBackend::Tcp
            && self.net.listen.parse::<std::net::SocketAddr>().is_err()
        {
            return Err(ConfigError::Invalid(format!(
                "net.listen is not a socket address: {}",
                self.net.listen
            )));
        }

        if self.hwi.analog_full_scale == 0 {
            return Err(ConfigError::Invalid(
                "hwi.analog_full_scale must be non-zero".into(),
            ));
        }

        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid configuration.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
