//! Device time from a narrow wrapping counter.

use super::common::{RigBuilder, FORWARD_PINS, STOPPED_PINS};
use robot_common::{EngineState, RobotError, TimeUs};
use robot_runtime::{HighSpeedTimer, MotorDirection};

/// 16-bit counter: wraps every 65.536ms.
const WIDTH: u32 = 16;
const WRAP_US: u64 = 1 << WIDTH;

fn rig() -> super::common::Rig {
    RigBuilder::new()
        .counter(WIDTH, TimeUs::from_millis(20))
        .build()
}

#[test]
fn test_device_time_survives_many_wraps() {
    let mut rig = rig();
    rig.run_for(TimeUs::from_secs(2)).unwrap();

    let device = rig.hst.us_since_device_start().get();
    let host = rig.host.us_since_device_start().get();
    assert_eq!(device, host);
    assert!(device > 30 * WRAP_US);
    assert_eq!(rig.scheduler.state(), EngineState::Run);
}

#[test]
fn test_housekeeping_named_after_counter() {
    let rig = rig();
    let names: Vec<String> = rig
        .scheduler
        .command_stats()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names[2], "Counter High Speed Timer");
}

#[test]
fn test_missed_wrap_faults_and_stops_motors() {
    let mut rig = rig();
    assert_eq!(rig.request("FORWARD"), "OK FORWARD");
    rig.run_for(TimeUs::from_millis(20)).unwrap();
    assert_eq!(rig.motor_pins(0), FORWARD_PINS);

    // The loop stalls for two whole wraps
    rig.host.advance(TimeUs::new(2 * WRAP_US + 1_000));

    let err = (0..1_000)
        .find_map(|_| rig.step().err())
        .expect("housekeeping should detect the missed wrap");
    assert!(matches!(err, RobotError::TimingViolation(_)), "{err}");

    assert_eq!(rig.scheduler.state(), EngineState::Fault);
    assert_eq!(rig.motor_pins(0), STOPPED_PINS);
    assert_eq!(rig.motors[0].desired(), MotorDirection::Stopped);

    // A faulted engine runs no more passes but can still be stopped
    assert!(rig.step().is_err());
    rig.scheduler.stop().unwrap();
    assert_eq!(rig.scheduler.state(), EngineState::Stopped);
}
