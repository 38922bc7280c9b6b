//! Diagnostic byte sinks.
//!
//! Purely informational: nothing in the control path depends on whether a
//! write reached anyone.

use crate::net::LineBuffer;
use std::cell::{Cell, RefCell};
use tracing::debug;

/// A byte-oriented diagnostic stream that can be muted.
pub trait DebugInterface {
    /// Write bytes. Returns how many were consumed.
    fn write(&self, bytes: &[u8]) -> usize;

    /// Mute the sink for the rest of the process.
    fn disable(&self);

    /// Convenience for text.
    fn write_str(&self, text: &str) -> usize {
        self.write(text.as_bytes())
    }
}

/// Forwards complete lines to `tracing` at DEBUG level.
#[derive(Debug)]
pub struct TracingDebug {
    lines: RefCell<LineBuffer>,
    enabled: Cell<bool>,
}

impl Default for TracingDebug {
    fn default() -> Self {
        Self::new()
    }
}

impl TracingDebug {
    /// Enabled sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines: RefCell::new(LineBuffer::default()),
            enabled: Cell::new(true),
        }
    }

    /// True until [`DebugInterface::disable`] is called.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }
}

impl DebugInterface for TracingDebug {
    fn write(&self, bytes: &[u8]) -> usize {
        if !self.enabled.get() {
            return bytes.len();
        }
        let mut lines = self.lines.borrow_mut();
        lines.push(bytes);
        while let Some(line) = lines.next_line() {
            debug!(target: "robot::debug", "{line}");
        }
        bytes.len()
    }

    fn disable(&self) {
        self.enabled.set(false);
        self.lines.borrow_mut().clear();
    }
}

/// Captures output in memory for tests.
#[derive(Debug)]
pub struct MemoryDebug {
    buffer: RefCell<Vec<u8>>,
    enabled: Cell<bool>,
}

impl Default for MemoryDebug {
    fn default() -> Self {
        Self {
            buffer: RefCell::new(Vec::new()),
            enabled: Cell::new(true),
        }
    }
}

impl MemoryDebug {
    /// Enabled, empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything captured so far.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.borrow()).into_owned()
    }

    /// True until disabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }
}

impl DebugInterface for MemoryDebug {
    fn write(&self, bytes: &[u8]) -> usize {
        if self.enabled.get() {
            self.buffer.borrow_mut().extend_from_slice(bytes);
        }
        bytes.len()
    }

    fn disable(&self) {
        self.enabled.set(false);
    }
}
