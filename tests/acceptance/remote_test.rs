//! The line protocol as a remote peer sees it.

use super::common::{Rig, RigBuilder, BOOT_WALL_CLOCK};
use robot_common::{RealTimeS, TimeUs};

#[test]
fn test_ping_and_errors() {
    let mut rig = Rig::new();
    assert_eq!(rig.request("PING"), "PONG");
    assert_eq!(rig.request("ping"), "PONG");
    assert_eq!(rig.request("jump"), "ERR unknown command 'jump'");
    assert_eq!(rig.request("FORWARD 7"), "ERR no motor 7");
    assert_eq!(rig.request("STOP x"), "ERR bad motor index 'x'");
}

#[test]
fn test_time_tracks_device_clock_between_syncs() {
    let mut rig = Rig::new();
    // Intake runs before the Time Manager within a pass
    rig.step().unwrap();
    assert_eq!(rig.request("TIME"), format!("TIME {BOOT_WALL_CLOCK}"));

    rig.run_for(TimeUs::from_secs(5)).unwrap();
    assert_eq!(rig.request("TIME"), format!("TIME {}", BOOT_WALL_CLOCK + 5));
    assert_eq!(rig.clock.sync_count(), 1);
}

#[test]
fn test_wall_clock_step_applied_at_next_resync() {
    let mut rig = Rig::new();
    rig.step().unwrap();
    let stepped = BOOT_WALL_CLOCK + 86_400;
    rig.wall.set(Some(RealTimeS::new(stepped)));

    rig.run_for(TimeUs::from_secs(30)).unwrap();
    let before: u64 = rig.request("TIME")[5..].parse().unwrap();
    assert!(before < stepped);

    // Resync at 60s picks up the step; device time is unaffected
    rig.run_for(TimeUs::from_secs(31)).unwrap();
    let after: u64 = rig.request("TIME")[5..].parse().unwrap();
    assert!((stepped..=stepped + 2).contains(&after), "{after}");
    assert_eq!(rig.clock.sync_count(), 2);
}

#[test]
fn test_unsynchronized_until_source_appears() {
    let mut rig = RigBuilder::new().unsynchronized().build();
    assert_eq!(rig.request("TIME"), "TIME UNSYNCED");

    let status: serde_json::Value = serde_json::from_str(&rig.request("STATUS")).unwrap();
    assert!(status["real_time_s"].is_null());

    rig.wall.set(Some(RealTimeS::new(BOOT_WALL_CLOCK)));
    rig.run_for(TimeUs::from_secs(61)).unwrap();
    assert!(rig.clock.is_synchronized());
    assert_ne!(rig.request("TIME"), "TIME UNSYNCED");
}

#[test]
fn test_status_summary() {
    let mut rig = Rig::new();
    rig.request("FORWARD 1");
    rig.run_for(TimeUs::from_millis(20)).unwrap();

    let status: serde_json::Value = serde_json::from_str(&rig.request("STATUS")).unwrap();
    assert_eq!(status["motors"], serde_json::json!(["STOPPED", "FORWARD"]));
    assert_eq!(status["encoders"].as_array().unwrap().len(), 2);
    assert_eq!(status["requests"], 2);
    assert!(status["device_ms"].as_u64().unwrap() >= 20);
    assert!(status["real_time_s"].as_u64().unwrap() >= BOOT_WALL_CLOCK);

    // Simulated battery sense wobbles around its midpoint
    let battery = status["battery"].as_u64().unwrap();
    assert!((185..=215).contains(&battery), "{battery}");
}

#[test]
fn test_quiet_mutes_debug_sink() {
    let mut rig = Rig::new();
    rig.request("PING");
    assert!(rig.debug.contents().contains("command: PING"));

    assert_eq!(rig.request("QUIET"), "OK QUIET");
    assert!(!rig.debug.is_enabled());

    let before = rig.debug.contents();
    rig.request("PING");
    assert_eq!(rig.debug.contents(), before);
}

#[test]
fn test_burst_is_spread_over_passes() {
    let mut rig = Rig::new();
    for _ in 0..20 {
        rig.net.push_line("PING");
    }

    while rig.net.output_text().is_empty() {
        rig.step().unwrap();
    }
    assert_eq!(rig.net.take_output_lines().len(), 16);

    rig.run_for(TimeUs::from_millis(40)).unwrap();
    assert_eq!(rig.net.take_output_lines().len(), 4);
}
