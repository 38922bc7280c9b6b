//! The cooperative task contract.

use robot_common::{RobotResult, TimeUs};

/// A cooperative task owned by the [`Scheduler`](crate::scheduler::Scheduler).
///
/// `execute` does a bounded amount of work and reports how long until it
/// wants to run again. It must never block: there is one thread of control
/// and a Command that waits stalls every other Command.
pub trait Command {
    /// Run once and return the delay until the next run.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the engine: the Scheduler enters FAULT and drives
    /// every Command to its safe state.
    fn execute(&mut self) -> RobotResult<TimeUs>;

    /// Name for diagnostics.
    fn debug_name(&self) -> &str;

    /// Put any owned hardware into a safe condition. Called on fault and on
    /// orderly stop; must not fail.
    fn enter_safe_state(&mut self) {}
}
