//! End-to-end scenarios on a simulated robot.

mod common;
mod config_test;
mod counter_test;
mod drive_test;
mod remote_test;
mod scheduling_test;
