//! Configuration files feeding a running rig.

use super::common::{RigBuilder, FORWARD_PINS, STOPPED_PINS};
use robot_common::{ConfigError, FirmwareConfig, TimeUs};
use std::io::Write;

#[test]
fn test_config_file_sets_silence_window() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[motor]
rearm = "5ms"
silence_window = "200ms"

[command]
poll_period = "10ms"
"#
    )
    .unwrap();

    let config = FirmwareConfig::from_file(file.path()).unwrap();
    let mut rig = RigBuilder::new().configure(|c| *c = config).build();

    assert_eq!(rig.request("FORWARD"), "OK FORWARD");
    rig.run_for(TimeUs::from_millis(150)).unwrap();
    assert_eq!(rig.motor_pins(0), FORWARD_PINS);

    rig.run_for(TimeUs::from_millis(100)).unwrap();
    assert_eq!(rig.motor_pins(0), STOPPED_PINS);
}

#[test]
fn test_inconsistent_config_rejected() {
    let config = FirmwareConfig::from_toml(
        r#"
[motor]
rearm = "1s"
silence_window = "500ms"
"#,
    )
    .unwrap();

    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_registries_are_complete() {
    robot_hwi::verify_pin_tables().unwrap();
    robot_runtime::verify_command_registry().unwrap();
}
