//! Cooperative scheduler for the robot firmware.
//!
//! One pass of [`Scheduler::execute`]:
//! 1. Read device time once
//! 2. Run every Command whose next-due time has arrived, in registration order
//! 3. Re-arm each at `now + returned delay`
//! 4. Report the time until the earliest next-due Command
//!
//! The caller sleeps for the reported duration (see [`sleep_for`]) and calls
//! `execute` again. A Command that overran is simply due on the next pass;
//! there is no catch-up and no fairness correction, so lateness is recorded
//! instead of hidden.

use crate::command::Command;
use crate::hst::HighSpeedTimer;
use robot_common::config::SchedulerConfig;
use robot_common::error::{RobotError, RobotResult};
use robot_common::metrics::LatenessMetrics;
use robot_common::state::{EngineState, StateMachine};
use robot_common::time::{DeviceTimeUs, TimeUs};
use serde::Serialize;
use std::rc::Rc;
use tracing::{debug, error, info, trace};

/// Per-Command diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandStats {
    /// Command name.
    pub name: String,
    /// Completed executions.
    pub runs: u64,
    /// When the Command is next due.
    pub next_due: DeviceTimeUs,
}

struct ScheduledCommand {
    command: Box<dyn Command>,
    next_due: DeviceTimeUs,
    runs: u64,
}

/// Single-threaded cooperative scheduler.
///
/// Owns every registered Command for the life of the process.
pub struct Scheduler {
    hst: Rc<dyn HighSpeedTimer>,
    commands: Vec<ScheduledCommand>,
    state: StateMachine,
    metrics: LatenessMetrics,
    pass_count: u64,
}

impl Scheduler {
    /// Create a scheduler timed by `hst`.
    pub fn new(hst: Rc<dyn HighSpeedTimer>, config: &SchedulerConfig) -> Self {
        let metrics = LatenessMetrics::new(
            config.lateness_histogram_size,
            TimeUs::from_duration(config.late_tolerance),
        );

        Self {
            hst,
            commands: Vec::new(),
            state: StateMachine::new(),
            metrics,
            pass_count: 0,
        }
    }

    /// Create a scheduler with default configuration.
    pub fn with_defaults(hst: Rc<dyn HighSpeedTimer>) -> Self {
        Self::new(hst, &SchedulerConfig::default())
    }

    /// Get the current engine state.
    pub fn state(&self) -> EngineState {
        self.state.state()
    }

    /// Get dispatch lateness metrics.
    pub fn metrics(&self) -> &LatenessMetrics {
        &self.metrics
    }

    /// Completed dispatch passes.
    pub fn pass_count(&self) -> u64 {
        self.pass_count
    }

    /// Number of registered Commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True if no Command is registered.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Diagnostics for every Command, in registration order.
    pub fn command_stats(&self) -> Vec<CommandStats> {
        self.commands
            .iter()
            .map(|entry| CommandStats {
                name: entry.command.debug_name().to_string(),
                runs: entry.runs,
                next_due: entry.next_due,
            })
            .collect()
    }

    /// Register a Command. It is due immediately.
    ///
    /// # Errors
    ///
    /// Registration is only possible in SETUP.
    pub fn add_command(&mut self, command: Box<dyn Command>) -> RobotResult<()> {
        if self.state.state() != EngineState::Setup {
            return Err(RobotError::InvalidStateTransition {
                from: self.state.state().to_string(),
                to: EngineState::Setup.to_string(),
            });
        }

        let now = self.hst.us_since_device_start();
        debug!(command = command.debug_name(), due = %now, "Registered command");
        self.commands.push(ScheduledCommand {
            command,
            next_due: now,
            runs: 0,
        });
        Ok(())
    }

    /// Leave SETUP and start dispatching.
    ///
    /// # Errors
    ///
    /// Fails if no Command is registered or the engine is not in SETUP.
    pub fn start(&mut self) -> RobotResult<()> {
        if self.commands.is_empty() {
            return Err(RobotError::Config(
                "scheduler has no commands to run".into(),
            ));
        }

        self.state.transition(EngineState::Run)?;
        info!(
            commands = self.commands.len(),
            hst = self.hst.debug_name(),
            "Starting cooperative execution"
        );
        Ok(())
    }

    /// Run one dispatch pass and return how long the caller should sleep.
    ///
    /// # Errors
    ///
    /// Fails outside RUN, or with the error of the first Command that failed;
    /// in the latter case the engine is in FAULT and every Command has been
    /// driven to its safe state.
    pub fn execute(&mut self) -> RobotResult<TimeUs> {
        if self.state.state() != EngineState::Run {
            return Err(RobotError::Fault(format!(
                "Cannot run a pass in state {}",
                self.state.state()
            )));
        }

        let now = self.hst.us_since_device_start();
        let mut failure = None;
        let mut dispatched = 0usize;

        for entry in &mut self.commands {
            if entry.next_due > now {
                continue;
            }

            self.metrics.record(now.saturating_duration_since(entry.next_due));
            match entry.command.execute() {
                Ok(delay) => {
                    entry.next_due = now + delay;
                    entry.runs += 1;
                    dispatched += 1;
                }
                Err(e) => {
                    failure = Some((entry.command.debug_name().to_string(), e));
                    break;
                }
            }
        }

        if let Some((name, e)) = failure {
            self.enter_fault(&format!("command '{name}' failed: {e}"));
            return Err(e);
        }

        self.pass_count += 1;

        let sleep = self
            .commands
            .iter()
            .map(|entry| entry.next_due.saturating_duration_since(now))
            .min()
            .unwrap_or(TimeUs::ZERO);

        trace!(
            pass = self.pass_count,
            now = %now,
            dispatched,
            sleep = %sleep,
            "Pass complete"
        );

        Ok(sleep)
    }

    /// Run passes until `keep_running` returns false or the engine leaves RUN.
    ///
    /// This blocks the current thread.
    ///
    /// # Errors
    ///
    /// Propagates the first pass failure.
    pub fn run(&mut self, mut keep_running: impl FnMut() -> bool) -> RobotResult<()> {
        info!("Entering main scheduler loop");

        while self.state.state() == EngineState::Run && keep_running() {
            let delay = self.execute()?;
            sleep_for(delay);
        }

        info!(
            final_state = %self.state.state(),
            passes = self.pass_count,
            "Scheduler loop exited"
        );
        Ok(())
    }

    /// Stop gracefully, driving every Command to its safe state.
    ///
    /// # Errors
    ///
    /// Never fails from SETUP, RUN or FAULT; stopping twice is a no-op.
    pub fn stop(&mut self) -> RobotResult<()> {
        if self.state.state() == EngineState::Stopped {
            return Ok(());
        }

        info!("Stopping scheduler");
        self.state.transition(EngineState::Stopped)?;
        self.set_safe_state();
        Ok(())
    }

    fn enter_fault(&mut self, reason: &str) {
        error!(reason, "Entering FAULT state");
        self.state.enter_fault();
        self.set_safe_state();
    }

    fn set_safe_state(&mut self) {
        debug!("Driving commands to safe state");
        for entry in &mut self.commands {
            entry.command.enter_safe_state();
        }
    }
}

/// Builder for configuring the scheduler.
pub struct SchedulerBuilder {
    hst: Rc<dyn HighSpeedTimer>,
    config: SchedulerConfig,
    commands: Vec<Box<dyn Command>>,
}

impl SchedulerBuilder {
    /// Create a new builder timed by `hst`.
    pub fn new(hst: Rc<dyn HighSpeedTimer>) -> Self {
        Self {
            hst,
            config: SchedulerConfig::default(),
            commands: Vec::new(),
        }
    }

    /// Set the lateness ring buffer size.
    pub fn lateness_histogram_size(mut self, size: usize) -> Self {
        self.config.lateness_histogram_size = size;
        self
    }

    /// Set the lateness beyond which a dispatch counts as late.
    pub fn late_tolerance(mut self, tolerance: TimeUs) -> Self {
        self.config.late_tolerance = tolerance.as_duration();
        self
    }

    /// Set the full scheduler configuration.
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Queue a Command for registration, in order.
    pub fn command(mut self, command: Box<dyn Command>) -> Self {
        self.commands.push(command);
        self
    }

    /// Build the scheduler, still in SETUP.
    ///
    /// # Errors
    ///
    /// Propagates registration errors.
    pub fn build(self) -> RobotResult<Scheduler> {
        let mut scheduler = Scheduler::new(self.hst, &self.config);
        for command in self.commands {
            scheduler.add_command(command)?;
        }
        Ok(scheduler)
    }
}

/// Sleep for `delay` on the host monotonic clock.
///
/// A signal may cut the sleep short; the following pass then finds nothing
/// due and reports the remaining time again.
#[cfg(target_os = "linux")]
pub fn sleep_for(delay: TimeUs) {
    if delay == TimeUs::ZERO {
        return;
    }

    let duration = delay.as_duration();
    let ts = libc::timespec {
        tv_sec: libc::time_t::try_from(duration.as_secs()).unwrap_or(libc::time_t::MAX),
        tv_nsec: libc::c_long::try_from(duration.subsec_nanos()).unwrap_or(0),
    };

    // SAFETY: `ts` is a valid timespec and the remainder pointer may be null.
    unsafe {
        libc::clock_nanosleep(libc::CLOCK_MONOTONIC, 0, &ts, std::ptr::null_mut());
    }
}

/// Sleep for `delay`.
#[cfg(not(target_os = "linux"))]
pub fn sleep_for(delay: TimeUs) {
    if delay > TimeUs::ZERO {
        std::thread::sleep(delay.as_duration());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hst::SimHst;
    use std::cell::RefCell;

    /// Scripted Command: returns its delays in order, repeating the last one.
    struct MockCommand {
        name: &'static str,
        delays: Vec<TimeUs>,
        log: Rc<RefCell<Vec<&'static str>>>,
        fail_on_run: Option<u64>,
        runs: u64,
        safe: Rc<RefCell<Vec<&'static str>>>,
    }

    impl MockCommand {
        fn new(name: &'static str, delay_us: u64, log: &Rc<RefCell<Vec<&'static str>>>) -> Self {
            Self {
                name,
                delays: vec![TimeUs::new(delay_us)],
                log: log.clone(),
                fail_on_run: None,
                runs: 0,
                safe: Rc::new(RefCell::new(Vec::new())),
            }
        }
    }

    impl Command for MockCommand {
        fn execute(&mut self) -> RobotResult<TimeUs> {
            self.runs += 1;
            if self.fail_on_run == Some(self.runs) {
                return Err(RobotError::Fault(format!("{} failed", self.name)));
            }
            self.log.borrow_mut().push(self.name);
            let index = usize::try_from(self.runs - 1).unwrap().min(self.delays.len() - 1);
            Ok(self.delays[index])
        }

        fn debug_name(&self) -> &str {
            self.name
        }

        fn enter_safe_state(&mut self) {
            self.safe.borrow_mut().push(self.name);
        }
    }

    fn rig() -> (Rc<SimHst>, Scheduler, Rc<RefCell<Vec<&'static str>>>) {
        let clock = Rc::new(SimHst::new());
        let scheduler = Scheduler::with_defaults(clock.clone());
        (clock, scheduler, Rc::new(RefCell::new(Vec::new())))
    }

    #[test]
    fn test_first_pass_runs_all_and_sleeps_minimum() {
        let (clock, mut scheduler, log) = rig();
        scheduler.add_command(Box::new(MockCommand::new("a", 10_000, &log))).unwrap();
        scheduler.add_command(Box::new(MockCommand::new("b", 5_000, &log))).unwrap();
        scheduler.add_command(Box::new(MockCommand::new("c", 20_000, &log))).unwrap();
        scheduler.start().unwrap();

        assert_eq!(scheduler.execute().unwrap(), TimeUs::new(5_000));
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);

        log.borrow_mut().clear();
        clock.advance(TimeUs::new(5_000));
        assert_eq!(scheduler.execute().unwrap(), TimeUs::new(5_000));
        assert_eq!(*log.borrow(), vec!["b"]);

        let stats = scheduler.command_stats();
        assert_eq!(stats[0].next_due, DeviceTimeUs::new(10_000));
        assert_eq!(stats[1].next_due, DeviceTimeUs::new(10_000));
        assert_eq!(stats[2].next_due, DeviceTimeUs::new(20_000));
        assert_eq!(stats[1].runs, 2);
    }

    #[test]
    fn test_simultaneously_due_run_in_registration_order() {
        let (clock, mut scheduler, log) = rig();
        for name in ["first", "second", "third"] {
            scheduler.add_command(Box::new(MockCommand::new(name, 1_000, &log))).unwrap();
        }
        scheduler.start().unwrap();

        for _ in 0..3 {
            scheduler.execute().unwrap();
            clock.advance(TimeUs::new(1_000));
        }

        assert_eq!(
            *log.borrow(),
            vec!["first", "second", "third", "first", "second", "third", "first", "second", "third"]
        );
    }

    #[test]
    fn test_overrun_is_due_immediately_without_debt() {
        let (clock, mut scheduler, log) = rig();
        scheduler.add_command(Box::new(MockCommand::new("slow", 1_000, &log))).unwrap();
        scheduler.start().unwrap();
        scheduler.execute().unwrap();

        // The loop overslept by 4ms.
        clock.advance(TimeUs::new(5_000));
        assert_eq!(scheduler.execute().unwrap(), TimeUs::new(1_000));
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(scheduler.metrics().max(), Some(TimeUs::new(4_000)));
        assert_eq!(scheduler.metrics().late_count(), 1);

        // Only one catch-up run, re-armed relative to the late pass.
        assert_eq!(scheduler.execute().unwrap(), TimeUs::new(1_000));
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_nothing_due_reports_remaining_time() {
        let (clock, mut scheduler, log) = rig();
        scheduler.add_command(Box::new(MockCommand::new("a", 10_000, &log))).unwrap();
        scheduler.start().unwrap();
        scheduler.execute().unwrap();

        clock.advance(TimeUs::new(3_000));
        assert_eq!(scheduler.execute().unwrap(), TimeUs::new(7_000));
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(scheduler.pass_count(), 2);
    }

    #[test]
    fn test_add_after_start_is_rejected() {
        let (_clock, mut scheduler, log) = rig();
        scheduler.add_command(Box::new(MockCommand::new("a", 1_000, &log))).unwrap();
        scheduler.start().unwrap();

        let result = scheduler.add_command(Box::new(MockCommand::new("late", 1_000, &log)));
        assert!(matches!(result, Err(RobotError::InvalidStateTransition { .. })));
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_start_requires_commands() {
        let (_clock, mut scheduler, _log) = rig();
        assert!(scheduler.is_empty());
        assert!(scheduler.start().is_err());
        assert_eq!(scheduler.state(), EngineState::Setup);
    }

    #[test]
    fn test_execute_before_start_fails() {
        let (_clock, mut scheduler, log) = rig();
        scheduler.add_command(Box::new(MockCommand::new("a", 1_000, &log))).unwrap();
        assert!(scheduler.execute().is_err());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_failure_enters_fault_and_safes_everything() {
        let (_clock, mut scheduler, log) = rig();
        let safe = Rc::new(RefCell::new(Vec::new()));

        let mut ok = MockCommand::new("ok", 1_000, &log);
        ok.safe = safe.clone();
        let mut bad = MockCommand::new("bad", 1_000, &log);
        bad.safe = safe.clone();
        bad.fail_on_run = Some(1);
        let mut never = MockCommand::new("never", 1_000, &log);
        never.safe = safe.clone();

        scheduler.add_command(Box::new(ok)).unwrap();
        scheduler.add_command(Box::new(bad)).unwrap();
        scheduler.add_command(Box::new(never)).unwrap();
        scheduler.start().unwrap();

        let result = scheduler.execute();
        assert_eq!(result, Err(RobotError::Fault("bad failed".into())));
        assert_eq!(scheduler.state(), EngineState::Fault);
        assert_eq!(*log.borrow(), vec!["ok"]);
        assert_eq!(*safe.borrow(), vec!["ok", "bad", "never"]);

        // FAULT is terminal for dispatching
        assert!(scheduler.execute().is_err());
        scheduler.stop().unwrap();
        assert_eq!(scheduler.state(), EngineState::Stopped);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (_clock, mut scheduler, log) = rig();
        scheduler.add_command(Box::new(MockCommand::new("a", 1_000, &log))).unwrap();
        scheduler.start().unwrap();
        scheduler.stop().unwrap();
        scheduler.stop().unwrap();
        assert_eq!(scheduler.state(), EngineState::Stopped);
    }

    #[test]
    fn test_run_until_predicate() {
        let (_clock, mut scheduler, log) = rig();
        scheduler.add_command(Box::new(MockCommand::new("a", 0, &log))).unwrap();
        scheduler.start().unwrap();

        let mut remaining = 5;
        scheduler
            .run(|| {
                remaining -= 1;
                remaining >= 0
            })
            .unwrap();

        assert_eq!(scheduler.pass_count(), 5);
        assert_eq!(log.borrow().len(), 5);
    }

    #[test]
    fn test_scheduler_builder() {
        let clock = Rc::new(SimHst::new());
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut scheduler = SchedulerBuilder::new(clock)
            .lateness_histogram_size(16)
            .late_tolerance(TimeUs::new(500))
            .command(Box::new(MockCommand::new("a", 2_000, &log)))
            .command(Box::new(MockCommand::new("b", 3_000, &log)))
            .build()
            .unwrap();

        assert_eq!(scheduler.state(), EngineState::Setup);
        scheduler.start().unwrap();
        assert_eq!(scheduler.execute().unwrap(), TimeUs::new(2_000));
        assert_eq!(
            scheduler.command_stats().iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_sleep_for_zero_returns() {
        sleep_for(TimeUs::ZERO);
        sleep_for(TimeUs::new(100));
    }
}
