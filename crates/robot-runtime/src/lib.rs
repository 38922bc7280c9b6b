#![doc = "Cooperative execution engine for the urban-robot firmware."]

pub mod command;
pub mod debug;
pub mod encoder;
pub mod hst;
pub mod motor;
pub mod net;
pub mod process_command;
pub mod scheduler;
pub mod time_manager;

pub use command::Command;
pub use debug::{DebugInterface, MemoryDebug, TracingDebug};
pub use encoder::{Encoder, EncoderHandle};
pub use hst::{
    CounterHst, HighSpeedTimer, HstHousekeeping, MonotonicHst, RawCounter, SimHst,
    SyntheticCounter,
};
pub use motor::{Motor, MotorDirection, MotorHandle};
pub use net::{NetInterface, NetListener, NullNet, ScriptedNet, StdinNet, TcpNet};
pub use process_command::{verify_command_registry, CommandKind, ProcessCommand};
pub use scheduler::*;
pub use time_manager::{RealTimeSource, ScriptedRealTime, SystemRealTime, TimeManager, WallClock};
