//! Motors and encoders driven through the scheduler.

use super::common::{Rig, FORWARD_PINS, STOPPED_PINS};
use robot_common::TimeUs;
use robot_runtime::MotorDirection;

#[test]
fn test_remote_forward_drives_only_the_addressed_motor() {
    let mut rig = Rig::new();
    assert_eq!(rig.request("FORWARD"), "OK FORWARD");
    rig.run_for(TimeUs::from_millis(20)).unwrap();

    assert_eq!(rig.motor_pins(0), FORWARD_PINS);
    assert_eq!(rig.motor_pins(1), STOPPED_PINS);
    assert_eq!(rig.motors[0].direction(), MotorDirection::Forward);
}

#[test]
fn test_reverse_on_second_motor() {
    let mut rig = Rig::new();
    assert_eq!(rig.request("reverse 1"), "OK REVERSE");
    rig.run_for(TimeUs::from_millis(20)).unwrap();

    assert_eq!(rig.motors[1].direction(), MotorDirection::Reverse);
    assert_eq!(rig.motors[0].direction(), MotorDirection::Stopped);
}

#[test]
fn test_silent_peer_stops_motor() {
    let mut rig = Rig::new();
    rig.request("FORWARD");

    rig.run_for(TimeUs::from_millis(900)).unwrap();
    assert_eq!(rig.motor_pins(0), FORWARD_PINS);

    rig.run_for(TimeUs::from_millis(200)).unwrap();
    assert_eq!(rig.motor_pins(0), STOPPED_PINS);
    assert_eq!(rig.motors[0].timeouts(), 1);
    assert_eq!(rig.motors[0].desired(), MotorDirection::Stopped);
}

#[test]
fn test_refreshed_motor_keeps_running() {
    let mut rig = Rig::new();
    for _ in 0..6 {
        assert_eq!(rig.request("FORWARD"), "OK FORWARD");
        rig.run_for(TimeUs::from_millis(500)).unwrap();
    }
    assert_eq!(rig.motor_pins(0), FORWARD_PINS);
    assert_eq!(rig.motors[0].timeouts(), 0);
}

#[test]
fn test_encoder_ticks_reported_remotely() {
    let mut rig = Rig::new();
    for _ in 0..25 {
        for sample in [0b01, 0b11, 0b10, 0b00] {
            rig.set_encoder(0, sample);
            rig.run_for(TimeUs::from_millis(1)).unwrap();
        }
    }

    assert_eq!(rig.encoders[0].ticks(), 100);
    assert_eq!(rig.request("TICKS"), "TICKS 100");
    assert_eq!(rig.request("TICKS 1"), "TICKS 0");
    assert_eq!(rig.request("TICKS 2"), "ERR no encoder 2");
}

#[test]
fn test_encoder_reverse_and_double_step() {
    let mut rig = Rig::new();
    for sample in [0b10, 0b11, 0b01, 0b00] {
        rig.set_encoder(1, sample);
        rig.run_for(TimeUs::from_millis(1)).unwrap();
    }
    assert_eq!(rig.encoders[1].ticks(), -4);

    // Skipping a state cannot be attributed to a direction
    rig.set_encoder(1, 0b11);
    rig.run_for(TimeUs::from_millis(1)).unwrap();
    assert_eq!(rig.encoders[1].ticks(), -4);

    let status: serde_json::Value = serde_json::from_str(&rig.request("STATUS")).unwrap();
    assert_eq!(status["encoders"][1]["ticks"], -4);
    assert_eq!(status["encoders"][1]["invalid_transitions"], 1);
}
