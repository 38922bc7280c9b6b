use thiserror::Error;

/// Firmware error types covering configuration, contract violations, and fatal timing faults.
///
/// Everything here is fatal to the control loop: transport hiccups are not
/// errors and never reach this type.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RobotError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A closed enumeration is missing an entry in one of its lookup tables.
    #[error("registry '{table}' is incomplete: missing entry for {missing}")]
    IncompleteRegistry {
        /// Name of the table that failed the check.
        table: &'static str,
        /// Enumerator without a valid entry.
        missing: String,
    },

    /// Device time can no longer be trusted (e.g. missed counter wraps).
    #[error("timing violation: {0}")]
    TimingViolation(String),

    /// A pin was used against its configured direction, or before being configured.
    #[error("pin mode violation: {operation} on {pin} (mode: {mode})")]
    PinModeViolation {
        /// Diagnostic name of the pin.
        pin: String,
        /// Current mode name, or "unconfigured".
        mode: String,
        /// Attempted operation.
        operation: &'static str,
    },

    /// Hardware I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Generic engine fault.
    #[error("engine fault: {0}")]
    Fault(String),
}

/// Convenience type alias for firmware operations.
pub type RobotResult<T> = Result<T, RobotError>;
