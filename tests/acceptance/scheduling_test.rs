//! Dispatch order, pacing and lifecycle of the assembled firmware.

use super::common::{Rig, FORWARD_PINS, STOPPED_PINS};
use robot_common::{EngineState, TimeUs};

#[test]
fn test_first_pass_runs_every_worker_in_registration_order() {
    let mut rig = Rig::new();
    let sleep = rig.step().unwrap();

    // The encoder has the shortest rearm
    assert_eq!(sleep, TimeUs::new(500));

    let stats = rig.scheduler.command_stats();
    let names: Vec<&str> = stats.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "Process Command",
            "Time Manager",
            "Sim High Speed Timer",
            "Motor 0",
            "Motor 1",
            "Encoder 0",
            "Encoder 1",
            "Scripted Net Listener",
        ]
    );
    assert!(stats.iter().all(|s| s.runs == 1));
}

#[test]
fn test_run_counts_follow_rearm_periods() {
    let mut rig = Rig::new();
    rig.run_for(TimeUs::from_secs(1)).unwrap();

    let runs: Vec<u64> = rig.scheduler.command_stats().iter().map(|s| s.runs).collect();
    // intake 20ms, time 60s, housekeeping 1s, motors 10ms, encoders 500us, net 100ms
    assert_eq!(runs, [50, 1, 1, 100, 100, 2000, 2000, 10]);
    assert_eq!(rig.scheduler.pass_count(), 2000);
}

#[test]
fn test_virtual_time_has_no_lateness() {
    let mut rig = Rig::new();
    rig.run_for(TimeUs::from_millis(250)).unwrap();

    let metrics = rig.scheduler.metrics();
    assert_eq!(metrics.late_count(), 0);
    assert_eq!(metrics.max(), Some(TimeUs::ZERO));
    assert!(metrics.total_dispatches() > 500);
}

#[test]
fn test_stop_drives_motors_to_safe_state() {
    let mut rig = Rig::new();
    assert_eq!(rig.request("FORWARD 0"), "OK FORWARD");
    rig.run_for(TimeUs::from_millis(20)).unwrap();
    assert_eq!(rig.motor_pins(0), FORWARD_PINS);

    rig.scheduler.stop().unwrap();
    assert_eq!(rig.scheduler.state(), EngineState::Stopped);
    assert_eq!(rig.motor_pins(0), STOPPED_PINS);
    assert_eq!(rig.motor_pins(1), STOPPED_PINS);

    // No further passes, and stopping again is harmless
    assert!(rig.step().is_err());
    rig.scheduler.stop().unwrap();
}
