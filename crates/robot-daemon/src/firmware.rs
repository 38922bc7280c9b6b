//! Firmware assembly: turns a [`FirmwareConfig`] into a ready-to-start
//! Scheduler with every worker registered.

use anyhow::{Context, Result};
use robot_common::{FirmwareConfig, HstBackend, HwiBackend, NetBackend, TimeUs};
use robot_hwi::{verify_pin_tables, Hwi, Pin, PinIoMode, SimulatedHwi, SysfsHwi};
use robot_runtime::{
    verify_command_registry, CounterHst, DebugInterface, Encoder, EncoderHandle, HighSpeedTimer,
    HstHousekeeping, MonotonicHst, Motor, MotorHandle, NetInterface, NetListener, NullNet,
    ProcessCommand, Scheduler, SchedulerBuilder, StdinNet, SyntheticCounter, SystemRealTime,
    TcpNet, TimeManager, TracingDebug, WallClock,
};
use std::rc::Rc;
use tracing::{info, warn};

/// Raw value the synthetic counter starts from, so device time zero does not
/// coincide with counter zero.
const SYNTHETIC_COUNTER_PHASE: u64 = 0x5a5a_5a5a;

const MOTOR_PINS: [(Pin, Pin); 2] = [
    (Pin::Motor0Pin0, Pin::Motor0Pin1),
    (Pin::Motor1Pin0, Pin::Motor1Pin1),
];

const ENCODER_PINS: [(Pin, Pin); 2] = [
    (Pin::Encoder0Pin0, Pin::Encoder0Pin1),
    (Pin::Encoder1Pin0, Pin::Encoder1Pin1),
];

/// Assembled firmware.
pub struct Firmware {
    /// Scheduler in SETUP with every worker registered.
    pub scheduler: Scheduler,
    /// Steering handles, by motor index.
    pub motors: Vec<MotorHandle>,
    /// Observation handles, by encoder index.
    pub encoders: Vec<EncoderHandle>,
    /// Wall-clock view kept current by the Time Manager.
    pub clock: WallClock,
    /// Device time source.
    pub hst: Rc<dyn HighSpeedTimer>,
}

/// Check the static registries, then build every subsystem from `config`.
///
/// Registration order fixes dispatch order among Commands due together:
/// command intake, time, HST housekeeping, motors, encoders, transport.
///
/// # Errors
///
/// Fails if a registry is incomplete or any backend cannot be initialized.
pub fn build(config: &FirmwareConfig) -> Result<Firmware> {
    verify_pin_tables().context("pin registry is incomplete")?;
    verify_command_registry().context("command registry is incomplete")?;

    let hst = build_hst(config)?;
    let hwi = build_hwi(config)?;
    let net = build_net(config)?;

    let debug = Rc::new(TracingDebug::new());
    if !config.debug.enabled {
        debug.disable();
    }

    let time_manager = TimeManager::new(
        Rc::new(SystemRealTime),
        Rc::clone(&hst),
        TimeUs::from_duration(config.time.resync_period),
        TimeUs::from_duration(config.time.step_warn_threshold),
    );
    let clock = time_manager.wall_clock();

    let mut motors = Vec::with_capacity(MOTOR_PINS.len());
    for (index, pins) in MOTOR_PINS.into_iter().enumerate() {
        let motor = Motor::new(
            format!("Motor {index}"),
            Rc::clone(&hwi),
            Rc::clone(&hst),
            pins,
            TimeUs::from_duration(config.motor.rearm),
            TimeUs::from_duration(config.motor.silence_window),
        )
        .with_context(|| format!("failed to set up motor {index}"))?;
        motors.push(motor);
    }

    let mut encoders = Vec::with_capacity(ENCODER_PINS.len());
    for (index, pins) in ENCODER_PINS.into_iter().enumerate() {
        let encoder = Encoder::new(
            format!("Encoder {index}"),
            Rc::clone(&hwi),
            pins,
            TimeUs::from_duration(config.encoder.rearm),
        )
        .with_context(|| format!("failed to set up encoder {index}"))?;
        encoders.push(encoder);
    }

    let motor_handles: Vec<MotorHandle> = motors.iter().map(Motor::handle).collect();
    let encoder_handles: Vec<EncoderHandle> = encoders.iter().map(Encoder::handle).collect();

    let mut processor = ProcessCommand::new(
        Rc::clone(&net),
        debug as Rc<dyn DebugInterface>,
        Rc::clone(&hst),
        clock.clone(),
        TimeUs::from_duration(config.command.poll_period),
    );
    for handle in &motor_handles {
        processor = processor.with_motor(handle.clone());
    }
    for handle in &encoder_handles {
        processor = processor.with_encoder(handle.clone());
    }
    match hwi.pin_mode(Pin::BatterySense, PinIoMode::Input) {
        Ok(()) => processor = processor.with_battery_sense(Rc::clone(&hwi), Pin::BatterySense),
        Err(e) => warn!(error = %e, "Battery sense unavailable; STATUS will omit it"),
    }

    let mut builder = SchedulerBuilder::new(Rc::clone(&hst))
        .config(config.scheduler.clone())
        .command(Box::new(processor))
        .command(Box::new(time_manager))
        .command(Box::new(HstHousekeeping::new(Rc::clone(&hst))));
    for motor in motors {
        builder = builder.command(Box::new(motor));
    }
    for encoder in encoders {
        builder = builder.command(Box::new(encoder));
    }
    builder = builder.command(Box::new(NetListener::new(
        net,
        TimeUs::from_duration(config.net.poll_period),
    )));

    let scheduler = builder.build().context("failed to register commands")?;
    info!(
        commands = scheduler.len(),
        hst = hst.debug_name(),
        hwi = hwi.debug_name(),
        "Firmware assembled"
    );

    Ok(Firmware {
        scheduler,
        motors: motor_handles,
        encoders: encoder_handles,
        clock,
        hst,
    })
}

fn build_hst(config: &FirmwareConfig) -> Result<Rc<dyn HighSpeedTimer>> {
    let host = Rc::new(MonotonicHst::new().context("failed to read the monotonic clock")?);
    match config.hst.backend {
        HstBackend::Monotonic => Ok(host),
        HstBackend::SimulatedCounter => {
            let bits = config.hst.counter_width_bits;
            let phase = SYNTHETIC_COUNTER_PHASE & ((1u64 << bits.min(32)) - 1);
            let counter = SyntheticCounter::new(bits, host, phase);
            let hst = CounterHst::new(
                counter,
                TimeUs::from_duration(config.hst.housekeeping_period),
            )
            .context("failed to set up the simulated counter")?;
            info!(
                bits,
                wrap = %hst.wrap_period(),
                "Using simulated {bits}-bit counter"
            );
            Ok(Rc::new(hst))
        }
    }
}

fn build_hwi(config: &FirmwareConfig) -> Result<Rc<dyn Hwi>> {
    match config.hwi.backend {
        HwiBackend::Simulated => Ok(Rc::new(SimulatedHwi::new())),
        HwiBackend::Sysfs => {
            let hwi = SysfsHwi::from_config(&config.hwi)
                .context("failed to set up the sysfs GPIO backend")?;
            Ok(Rc::new(hwi))
        }
    }
}

fn build_net(config: &FirmwareConfig) -> Result<Rc<dyn NetInterface>> {
    match config.net.backend {
        NetBackend::None => Ok(Rc::new(NullNet)),
        NetBackend::Stdin => Ok(Rc::new(StdinNet::new())),
        NetBackend::Tcp => {
            let net = TcpNet::bind(&config.net.listen)
                .with_context(|| format!("failed to listen on {}", config.net.listen))?;
            info!(addr = ?net.local_addr().ok(), "Accepting remote commands over TCP");
            Ok(Rc::new(net))
        }
    }
}
