//! Simulated robot rig shared by the acceptance tests.
//!
//! Time is virtual: [`Rig::step`] runs one Scheduler pass and then advances
//! the host clock by exactly the sleep the Scheduler asked for, which is what
//! the firmware's pacing loop does on real hardware.

#![allow(dead_code)] // Not every scenario uses every helper

use robot_common::{FirmwareConfig, HstBackend, RealTimeS, RobotResult, TimeUs};
use robot_hwi::{Hwi, Pin, PinIoMode, PinState, SimulatedHwi};
use robot_runtime::{
    CounterHst, Encoder, EncoderHandle, HighSpeedTimer, HstHousekeeping, MemoryDebug, Motor,
    MotorHandle, NetListener, ProcessCommand, Scheduler, SchedulerBuilder, ScriptedNet,
    ScriptedRealTime, SimHst, SyntheticCounter, TimeManager, WallClock,
};
use std::rc::Rc;

/// Wall-clock reading the scripted source starts at.
pub const BOOT_WALL_CLOCK: u64 = 1_700_000_000;

/// Everything a scenario can poke at.
pub struct Rig {
    /// Virtual host clock. Advancing it moves device time.
    pub host: Rc<SimHst>,
    /// Device time as the workers see it.
    pub hst: Rc<dyn HighSpeedTimer>,
    pub hwi: Rc<SimulatedHwi>,
    pub net: Rc<ScriptedNet>,
    pub debug: Rc<MemoryDebug>,
    pub wall: Rc<ScriptedRealTime>,
    pub clock: WallClock,
    pub motors: Vec<MotorHandle>,
    pub encoders: Vec<EncoderHandle>,
    pub scheduler: Scheduler,
    pub config: FirmwareConfig,
}

/// Builds a [`Rig`] from a [`FirmwareConfig`].
pub struct RigBuilder {
    config: FirmwareConfig,
    wall_clock: Option<u64>,
}

impl Default for RigBuilder {
    fn default() -> Self {
        Self {
            config: FirmwareConfig::default(),
            wall_clock: Some(BOOT_WALL_CLOCK),
        }
    }
}

impl RigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive device time from a narrow counter instead of the host clock.
    pub fn counter(mut self, width_bits: u32, housekeeping_period: TimeUs) -> Self {
        self.config.hst.backend = HstBackend::SimulatedCounter;
        self.config.hst.counter_width_bits = width_bits;
        self.config.hst.housekeeping_period = housekeeping_period.as_duration();
        self
    }

    /// Start without a wall clock.
    pub fn unsynchronized(mut self) -> Self {
        self.wall_clock = None;
        self
    }

    pub fn configure(mut self, edit: impl FnOnce(&mut FirmwareConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    pub fn build(self) -> Rig {
        let config = self.config;
        config.validate().unwrap();

        let host = Rc::new(SimHst::new());
        let hst: Rc<dyn HighSpeedTimer> = match config.hst.backend {
            HstBackend::Monotonic => host.clone(),
            HstBackend::SimulatedCounter => {
                let counter =
                    SyntheticCounter::new(config.hst.counter_width_bits, host.clone(), 0x1234);
                Rc::new(
                    CounterHst::new(
                        counter,
                        TimeUs::from_duration(config.hst.housekeeping_period),
                    )
                    .unwrap(),
                )
            }
        };

        let hwi = Rc::new(SimulatedHwi::new());
        let net = Rc::new(ScriptedNet::new());
        let debug = Rc::new(MemoryDebug::new());
        let wall = Rc::new(ScriptedRealTime::new());
        wall.set(self.wall_clock.map(RealTimeS::new));

        let time_manager = TimeManager::new(
            wall.clone(),
            hst.clone(),
            TimeUs::from_duration(config.time.resync_period),
            TimeUs::from_duration(config.time.step_warn_threshold),
        );
        let clock = time_manager.wall_clock();

        let motor_pins = [
            (Pin::Motor0Pin0, Pin::Motor0Pin1),
            (Pin::Motor1Pin0, Pin::Motor1Pin1),
        ];
        let motors: Vec<Motor> = motor_pins
            .into_iter()
            .enumerate()
            .map(|(i, pins)| {
                Motor::new(
                    format!("Motor {i}"),
                    hwi.clone(),
                    hst.clone(),
                    pins,
                    TimeUs::from_duration(config.motor.rearm),
                    TimeUs::from_duration(config.motor.silence_window),
                )
                .unwrap()
            })
            .collect();

        let encoder_pins = [
            (Pin::Encoder0Pin0, Pin::Encoder0Pin1),
            (Pin::Encoder1Pin0, Pin::Encoder1Pin1),
        ];
        let encoders: Vec<Encoder> = encoder_pins
            .into_iter()
            .enumerate()
            .map(|(i, pins)| {
                Encoder::new(
                    format!("Encoder {i}"),
                    hwi.clone(),
                    pins,
                    TimeUs::from_duration(config.encoder.rearm),
                )
                .unwrap()
            })
            .collect();

        let motor_handles: Vec<MotorHandle> = motors.iter().map(Motor::handle).collect();
        let encoder_handles: Vec<EncoderHandle> = encoders.iter().map(Encoder::handle).collect();

        hwi.pin_mode(Pin::BatterySense, PinIoMode::Input).unwrap();
        let mut processor = ProcessCommand::new(
            net.clone(),
            debug.clone(),
            hst.clone(),
            clock.clone(),
            TimeUs::from_duration(config.command.poll_period),
        )
        .with_battery_sense(hwi.clone(), Pin::BatterySense);
        for handle in &motor_handles {
            processor = processor.with_motor(handle.clone());
        }
        for handle in &encoder_handles {
            processor = processor.with_encoder(handle.clone());
        }

        let mut builder = SchedulerBuilder::new(hst.clone())
            .config(config.scheduler.clone())
            .command(Box::new(processor))
            .command(Box::new(time_manager))
            .command(Box::new(HstHousekeeping::new(hst.clone())));
        for motor in motors {
            builder = builder.command(Box::new(motor));
        }
        for encoder in encoders {
            builder = builder.command(Box::new(encoder));
        }
        builder = builder.command(Box::new(NetListener::new(
            net.clone(),
            TimeUs::from_duration(config.net.poll_period),
        )));

        let mut scheduler = builder.build().unwrap();
        scheduler.start().unwrap();

        Rig {
            host,
            hst,
            hwi,
            net,
            debug,
            wall,
            clock,
            motors: motor_handles,
            encoders: encoder_handles,
            scheduler,
            config,
        }
    }
}

impl Rig {
    /// Default rig: host-clock HST, wall clock available at boot.
    pub fn new() -> Self {
        RigBuilder::new().build()
    }

    /// One pass, then sleep (virtually) for as long as the Scheduler asked.
    pub fn step(&mut self) -> RobotResult<TimeUs> {
        let sleep = self.scheduler.execute()?;
        self.host.advance(sleep);
        Ok(sleep)
    }

    /// Step until at least `span` of host time has passed.
    pub fn run_for(&mut self, span: TimeUs) -> RobotResult<()> {
        let start = self.host.us_since_device_start();
        while self.host.us_since_device_start().saturating_duration_since(start) < span {
            self.step()?;
        }
        Ok(())
    }

    /// Queue a request and step until the command processor has answered it.
    pub fn request(&mut self, line: &str) -> String {
        self.net.push_line(line);
        let deadline = self.host.us_since_device_start()
            + TimeUs::from_duration(self.config.command.poll_period);
        while self.net.output_text().is_empty() {
            assert!(
                self.host.us_since_device_start() <= deadline,
                "no reply to {line:?} within one poll period"
            );
            self.step().unwrap();
        }
        let mut replies = self.net.take_output_lines();
        assert_eq!(replies.len(), 1, "expected one reply to {line:?}: {replies:?}");
        replies.remove(0)
    }

    /// Present a two-bit quadrature sample on encoder `index`.
    pub fn set_encoder(&self, index: usize, sample: u8) {
        let pins = [
            (Pin::Encoder0Pin0, Pin::Encoder0Pin1),
            (Pin::Encoder1Pin0, Pin::Encoder1Pin1),
        ][index];
        self.hwi.set_input(pins.0, level(sample >> 1));
        self.hwi.set_input(pins.1, level(sample & 1));
    }

    /// Drive states currently on motor `index`'s pins.
    pub fn motor_pins(&self, index: usize) -> (Option<PinState>, Option<PinState>) {
        let pins = [
            (Pin::Motor0Pin0, Pin::Motor0Pin1),
            (Pin::Motor1Pin0, Pin::Motor1Pin1),
        ][index];
        (self.hwi.output(pins.0), self.hwi.output(pins.1))
    }
}

fn level(bit: u8) -> PinState {
    if bit & 1 == 1 {
        PinState::InputHigh
    } else {
        PinState::InputLow
    }
}

/// Both pins off.
pub const STOPPED_PINS: (Option<PinState>, Option<PinState>) =
    (Some(PinState::MotorNeg), Some(PinState::MotorNeg));

/// Pin 0 driven.
pub const FORWARD_PINS: (Option<PinState>, Option<PinState>) =
    (Some(PinState::MotorPos), Some(PinState::MotorNeg));
