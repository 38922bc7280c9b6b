//! Signal handling for graceful firmware shutdown.
//!
//! SIGTERM and SIGINT set an atomic flag that the control loop polls between
//! passes. The loop is single-threaded, so no relay thread is needed: the
//! handler itself only touches atomics, and a pacing sleep interrupted by
//! the signal simply returns early.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
static SIGNAL_COUNT: AtomicU32 = AtomicU32::new(0);
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Signals the firmware reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM, sent by service managers.
    Terminate,
    /// SIGINT (Ctrl+C).
    Interrupt,
}

impl SignalKind {
    #[cfg(unix)]
    fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            libc::SIGTERM => Some(Self::Terminate),
            libc::SIGINT => Some(Self::Interrupt),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Shutdown flag shared between signal handlers and the control loop.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    manual: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Install handlers for SIGTERM and SIGINT.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a handler cannot be installed.
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        register_unix_handlers()?;

        Ok(Self::detached())
    }

    /// A handler that only reacts to [`SignalHandler::request_shutdown`].
    #[must_use]
    pub fn detached() -> Self {
        Self {
            manual: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True once a shutdown signal arrived or shutdown was requested manually.
    #[inline]
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        SHUTDOWN_FLAG.load(Ordering::Relaxed) || self.manual.load(Ordering::Relaxed)
    }

    /// Request shutdown without a signal.
    pub fn request_shutdown(&self) {
        info!("Manual shutdown requested");
        self.manual.store(true, Ordering::Relaxed);
    }

    /// Signals received since the process started.
    #[must_use]
    pub fn signal_count(&self) -> u32 {
        SIGNAL_COUNT.load(Ordering::Relaxed)
    }

    /// Most recent signal received, if any.
    #[must_use]
    pub fn last_signal(&self) -> Option<SignalKind> {
        #[cfg(unix)]
        {
            SignalKind::from_raw(LAST_SIGNAL.load(Ordering::Relaxed))
        }
        #[cfg(not(unix))]
        {
            None
        }
    }
}

#[cfg(unix)]
extern "C" fn on_shutdown_signal(raw: libc::c_int) {
    // Async-signal-safe: atomics only.
    LAST_SIGNAL.store(raw, Ordering::Relaxed);
    SIGNAL_COUNT.fetch_add(1, Ordering::Relaxed);
    SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn register_unix_handlers() -> std::io::Result<()> {
    for signal in [libc::SIGTERM, libc::SIGINT] {
        // SAFETY: the handler only performs atomic stores, which are
        // async-signal-safe, and has the C ABI `signal` expects.
        let previous =
            unsafe { libc::signal(signal, on_shutdown_signal as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }
    debug!("Unix signal handlers registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_handler_starts_clear() {
        let handler = SignalHandler::detached();
        assert!(!handler.manual.load(Ordering::Relaxed));
    }

    #[test]
    fn test_manual_shutdown_is_shared_between_clones() {
        let handler = SignalHandler::detached();
        let clone = handler.clone();

        clone.request_shutdown();
        assert!(handler.shutdown_requested());
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_names() {
        assert_eq!(SignalKind::from_raw(libc::SIGTERM), Some(SignalKind::Terminate));
        assert_eq!(SignalKind::from_raw(libc::SIGINT), Some(SignalKind::Interrupt));
        assert_eq!(SignalKind::from_raw(libc::SIGHUP), None);
        assert_eq!(SignalKind::Interrupt.to_string(), "SIGINT");
    }
}
