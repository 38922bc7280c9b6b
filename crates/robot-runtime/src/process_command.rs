//! Remote command intake.
//!
//! Each line from the transport is one request. The first whitespace-separated
//! word names a [`CommandKind`] (case-insensitive); the rest are arguments.
//! Every request gets exactly one reply line:
//!
//! | request           | reply                                  |
//! |-------------------|----------------------------------------|
//! | `FORWARD [motor]` | `OK FORWARD`                           |
//! | `REVERSE [motor]` | `OK REVERSE`                           |
//! | `STOP [motor]`    | `OK STOP`                              |
//! | `TICKS [encoder]` | `TICKS <n>`                            |
//! | `TIME`            | `TIME <unix seconds>` / `TIME UNSYNCED` |
//! | `STATUS`          | one-line JSON object                   |
//! | `PING`            | `PONG`                                 |
//! | `QUIET`           | `OK QUIET` (mutes the debug sink)      |
//!
//! Anything else gets `ERR ...`. Motor and encoder indices default to 0.

use crate::command::Command;
use crate::debug::DebugInterface;
use crate::encoder::EncoderHandle;
use crate::hst::HighSpeedTimer;
use crate::motor::{MotorDirection, MotorHandle};
use crate::net::{NetInterface, MAX_LINES_PER_PASS};
use crate::time_manager::WallClock;
use robot_common::{RobotError, RobotResult, TimeUs};
use robot_hwi::{Hwi, Pin};
use serde_json::json;
use static_assertions::const_assert_eq;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// Closed set of remote commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum CommandKind {
    /// Drive a motor forward.
    Forward,
    /// Drive a motor in reverse.
    Reverse,
    /// Stop a motor.
    Stop,
    /// Report an encoder's tick count.
    Ticks,
    /// Report wall-clock time.
    Time,
    /// Report a JSON status summary.
    Status,
    /// Liveness check.
    Ping,
    /// Mute the debug sink.
    Quiet,
}

impl CommandKind {
    /// Number of command kinds.
    pub const COUNT: usize = 8;

    /// Every kind in ordinal order.
    pub const ALL: [CommandKind; CommandKind::COUNT] = [
        CommandKind::Forward,
        CommandKind::Reverse,
        CommandKind::Stop,
        CommandKind::Ticks,
        CommandKind::Time,
        CommandKind::Status,
        CommandKind::Ping,
        CommandKind::Quiet,
    ];

    /// Ordinal.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Request keyword.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        KEYWORDS[self.index()]
    }

    /// Match a request word, ignoring ASCII case.
    #[must_use]
    pub fn parse(word: &str) -> Option<CommandKind> {
        CommandKind::ALL
            .into_iter()
            .find(|kind| kind.keyword().eq_ignore_ascii_case(word))
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

const KEYWORDS: [&str; CommandKind::COUNT] = [
    "FORWARD", "REVERSE", "STOP", "TICKS", "TIME", "STATUS", "PING", "QUIET",
];

type Handler = fn(&ProcessCommand, &[&str]) -> String;

const HANDLERS: [Handler; CommandKind::COUNT] = [
    ProcessCommand::forward,
    ProcessCommand::reverse,
    ProcessCommand::stop,
    ProcessCommand::ticks,
    ProcessCommand::time,
    ProcessCommand::status,
    ProcessCommand::ping,
    ProcessCommand::quiet,
];

const_assert_eq!(CommandKind::Quiet as usize + 1, CommandKind::COUNT);

/// Startup check that every command kind has a distinct keyword that parses
/// back to itself at its own ordinal.
///
/// # Errors
///
/// Returns [`RobotError::IncompleteRegistry`] naming the first bad entry.
pub fn verify_command_registry() -> RobotResult<()> {
    for (position, kind) in CommandKind::ALL.into_iter().enumerate() {
        let keyword = kind.keyword();
        let ok = kind.index() == position
            && !keyword.is_empty()
            && !keyword.contains(char::is_whitespace)
            && CommandKind::parse(keyword) == Some(kind);
        if !ok {
            return Err(RobotError::IncompleteRegistry {
                table: "command keywords",
                missing: format!("{kind:?}"),
            });
        }
    }
    Ok(())
}

/// Command processor worker.
pub struct ProcessCommand {
    net: Rc<dyn NetInterface>,
    debug: Rc<dyn DebugInterface>,
    hst: Rc<dyn HighSpeedTimer>,
    clock: WallClock,
    motors: Vec<MotorHandle>,
    encoders: Vec<EncoderHandle>,
    battery: Option<(Rc<dyn Hwi>, Pin)>,
    poll_period: TimeUs,
    processed: Cell<u64>,
    unsent: Vec<u8>,
}

impl ProcessCommand {
    /// Read requests from `net` every `poll_period`.
    #[must_use]
    pub fn new(
        net: Rc<dyn NetInterface>,
        debug: Rc<dyn DebugInterface>,
        hst: Rc<dyn HighSpeedTimer>,
        clock: WallClock,
        poll_period: TimeUs,
    ) -> Self {
        Self {
            net,
            debug,
            hst,
            clock,
            motors: Vec::new(),
            encoders: Vec::new(),
            battery: None,
            poll_period,
            processed: Cell::new(0),
            unsent: Vec::new(),
        }
    }

    /// Make a motor steerable as the next motor index.
    #[must_use]
    pub fn with_motor(mut self, motor: MotorHandle) -> Self {
        self.motors.push(motor);
        self
    }

    /// Make an encoder observable as the next encoder index.
    #[must_use]
    pub fn with_encoder(mut self, encoder: EncoderHandle) -> Self {
        self.encoders.push(encoder);
        self
    }

    /// Report an analog battery sense pin in `STATUS`. The pin must already
    /// be configured as an input.
    #[must_use]
    pub fn with_battery_sense(mut self, hwi: Rc<dyn Hwi>, pin: Pin) -> Self {
        self.battery = Some((hwi, pin));
        self
    }

    /// Requests handled so far.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.get()
    }

    /// Handle one request line and return the reply (without newline).
    pub fn handle_line(&self, line: &str) -> String {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return "ERR empty command".to_string();
        };
        let args: Vec<&str> = words.collect();

        self.processed.set(self.processed.get() + 1);
        match CommandKind::parse(word) {
            Some(kind) => HANDLERS[kind.index()](self, &args),
            None => format!("ERR unknown command '{word}'"),
        }
    }

    fn index_arg(args: &[&str], what: &str, available: usize) -> Result<usize, String> {
        let index = match args.first() {
            None => 0,
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| format!("ERR bad {what} index '{raw}'"))?,
        };
        if index < available {
            Ok(index)
        } else {
            Err(format!("ERR no {what} {index}"))
        }
    }

    fn steer(&self, args: &[&str], direction: MotorDirection, reply: &str) -> String {
        match Self::index_arg(args, "motor", self.motors.len()) {
            Ok(index) => {
                self.motors[index].set_direction(direction);
                reply.to_string()
            }
            Err(e) => e,
        }
    }

    fn forward(&self, args: &[&str]) -> String {
        self.steer(args, MotorDirection::Forward, "OK FORWARD")
    }

    fn reverse(&self, args: &[&str]) -> String {
        self.steer(args, MotorDirection::Reverse, "OK REVERSE")
    }

    fn stop(&self, args: &[&str]) -> String {
        self.steer(args, MotorDirection::Stopped, "OK STOP")
    }

    fn ticks(&self, args: &[&str]) -> String {
        match Self::index_arg(args, "encoder", self.encoders.len()) {
            Ok(index) => format!("TICKS {}", self.encoders[index].ticks()),
            Err(e) => e,
        }
    }

    fn time(&self, _args: &[&str]) -> String {
        match self.clock.to_real_time(self.hst.ms_since_device_start()) {
            Some(now) => format!("TIME {}", now.get()),
            None => "TIME UNSYNCED".to_string(),
        }
    }

    fn status(&self, _args: &[&str]) -> String {
        let device = self.hst.ms_since_device_start();
        // A failed sample is reported as null; STATUS is diagnostic only.
        let battery = self
            .battery
            .as_ref()
            .and_then(|(hwi, pin)| hwi.analog_read(*pin).ok());
        let status = json!({
            "device_ms": device.get(),
            "real_time_s": self.clock.to_real_time(device).map(|t| t.get()),
            "motors": self.motors.iter().map(MotorHandle::direction).collect::<Vec<_>>(),
            "encoders": self.encoders.iter().map(|e| json!({
                "ticks": e.ticks(),
                "invalid_transitions": e.invalid_transitions(),
            })).collect::<Vec<_>>(),
            "battery": battery,
            "requests": self.processed.get(),
        });
        status.to_string()
    }

    fn ping(&self, _args: &[&str]) -> String {
        "PONG".to_string()
    }

    fn quiet(&self, _args: &[&str]) -> String {
        self.debug.disable();
        "OK QUIET".to_string()
    }
}

impl ProcessCommand {
    /// Hand queued reply bytes to the transport. True once none are left.
    fn send_unsent(&mut self) -> bool {
        if self.unsent.is_empty() {
            return true;
        }
        let sent = self.net.write(&self.unsent).min(self.unsent.len());
        self.unsent.drain(..sent);
        self.net.flush();
        if !self.unsent.is_empty() {
            debug!(sent, held = self.unsent.len(), "Short write, holding the rest");
        }
        self.unsent.is_empty()
    }
}

impl Command for ProcessCommand {
    fn execute(&mut self) -> RobotResult<TimeUs> {
        // Earlier replies go out first; a peer that is not reading gets no
        // new requests served.
        if !self.send_unsent() {
            return Ok(self.poll_period);
        }

        for _ in 0..MAX_LINES_PER_PASS {
            let Some(line) = self.net.read_line() else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            self.debug.write_str(&format!("command: {line}\n"));
            let reply = self.handle_line(line);
            debug!(request = line, reply = %reply, "Handled remote command");

            self.unsent.extend_from_slice(reply.as_bytes());
            self.unsent.push(b'\n');
        }

        self.send_unsent();
        Ok(self.poll_period)
    }

    fn debug_name(&self) -> &str {
        "Process Command"
    }
}
