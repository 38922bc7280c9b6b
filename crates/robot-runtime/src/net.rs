//! Line-oriented byte-stream transports for remote commands.
//!
//! Transport trouble is never an error here: a missing line is `None`, a
//! failed write reports zero bytes, and a dropped TCP client is simply
//! forgotten until the next one connects.

use crate::command::Command;
use robot_common::{RobotError, RobotResult, TimeUs};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Longest accepted line, newline excluded.
pub const MAX_LINE: usize = 512;

/// Requests handled per pass, so a chatty peer cannot stall the loop.
pub(crate) const MAX_LINES_PER_PASS: usize = 16;

/// Bytes a transport buffers ahead of the reader. Anything beyond this stays
/// in the kernel until the buffered lines have been consumed.
const MAX_PENDING: usize = MAX_LINES_PER_PASS * MAX_LINE;

/// Non-blocking line transport.
pub trait NetInterface {
    /// Next complete line, without its terminator, if one is available.
    fn read_line(&self) -> Option<String>;

    /// Queue bytes for the peer. Returns how many were accepted.
    fn write(&self, bytes: &[u8]) -> usize;

    /// Push queued bytes out.
    fn flush(&self);

    /// Connection housekeeping (accepting clients and the like).
    fn poll(&self) {}

    /// Name for diagnostics.
    fn debug_name(&self) -> &str;
}

/// Splits a byte stream into lines.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
    discarding: bool,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    pub(crate) fn next_line(&mut self) -> Option<String> {
        loop {
            let Some(end) = self.pending.iter().position(|&b| b == b'\n') else {
                if self.pending.len() > MAX_LINE {
                    // Drop the oversized fragment and everything up to the next newline.
                    self.pending.clear();
                    self.discarding = true;
                }
                return None;
            };

            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            if std::mem::take(&mut self.discarding) || raw.len() - 1 > MAX_LINE {
                warn!(len = raw.len(), "Discarding oversized line");
                continue;
            }

            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            return Some(line.trim_end_matches('\r').to_string());
        }
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }

    pub(crate) fn is_full(&self) -> bool {
        self.pending.len() >= MAX_PENDING
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Discards output and never has input.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNet;

impl NetInterface for NullNet {
    fn read_line(&self) -> Option<String> {
        None
    }

    fn write(&self, bytes: &[u8]) -> usize {
        bytes.len()
    }

    fn flush(&self) {}

    fn debug_name(&self) -> &str {
        "Null Net"
    }
}

/// In-memory transport for tests and scripted runs.
#[derive(Debug, Default)]
pub struct ScriptedNet {
    input: RefCell<VecDeque<String>>,
    output: RefCell<Vec<u8>>,
}

impl ScriptedNet {
    /// Empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a line as if the peer had sent it.
    pub fn push_line(&self, line: impl Into<String>) {
        self.input.borrow_mut().push_back(line.into());
    }

    /// Everything written so far, as text.
    #[must_use]
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output.borrow()).into_owned()
    }

    /// Drain the written text, returning complete lines.
    pub fn take_output_lines(&self) -> Vec<String> {
        let bytes = std::mem::take(&mut *self.output.borrow_mut());
        let text = String::from_utf8_lossy(&bytes).into_owned();
        text.lines().map(str::to_string).collect()
    }
}

impl NetInterface for ScriptedNet {
    fn read_line(&self) -> Option<String> {
        self.input.borrow_mut().pop_front()
    }

    fn write(&self, bytes: &[u8]) -> usize {
        self.output.borrow_mut().extend_from_slice(bytes);
        bytes.len()
    }

    fn flush(&self) {}

    fn debug_name(&self) -> &str {
        "Scripted Net"
    }
}

struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    lines: LineBuffer,
}

/// Single-client, non-blocking TCP server.
pub struct TcpNet {
    listener: TcpListener,
    client: RefCell<Option<Client>>,
}

impl TcpNet {
    /// Listen on `addr` without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::Io`] if the socket cannot be bound.
    pub fn bind(addr: &str) -> RobotResult<Self> {
        let listener = TcpListener::bind(addr)
            .and_then(|l| l.set_nonblocking(true).map(|()| l))
            .map_err(|e| RobotError::Io(format!("bind {addr}: {e}")))?;
        let bound = listener
            .local_addr()
            .map_or_else(|_| addr.to_string(), |a| a.to_string());
        info!(addr = %bound, "Command listener bound");
        Ok(Self {
            listener,
            client: RefCell::new(None),
        })
    }

    /// Address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::Io`] if the socket address is unavailable.
    pub fn local_addr(&self) -> RobotResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| RobotError::Io(e.to_string()))
    }

    /// True while a client is connected.
    #[must_use]
    pub fn has_client(&self) -> bool {
        self.client.borrow().is_some()
    }

    fn drop_client(&self, reason: &str) {
        if let Some(client) = self.client.borrow_mut().take() {
            info!(peer = %client.peer, reason, "Client disconnected");
        }
    }

    fn accept(&self) {
        if self.has_client() {
            return;
        }
        match self.listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    warn!(%peer, error = %e, "Rejecting client");
                    return;
                }
                info!(%peer, "Client connected");
                *self.client.borrow_mut() = Some(Client {
                    stream,
                    peer,
                    lines: LineBuffer::default(),
                });
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => warn!(error = %e, "Accept failed"),
        }
    }

    /// Pull available bytes into the line buffer, up to [`MAX_PENDING`].
    fn fill(&self) {
        let mut closed = None;
        if let Some(client) = self.client.borrow_mut().as_mut() {
            let mut buf = [0u8; 256];
            while !client.lines.is_full() {
                match client.stream.read(&mut buf) {
                    Ok(0) => {
                        closed = Some("eof");
                        break;
                    }
                    Ok(n) => client.lines.push(&buf[..n]),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        debug!(error = %e, "Read failed");
                        closed = Some("read error");
                        break;
                    }
                }
            }
        }
        if let Some(reason) = closed {
            self.drop_client(reason);
        }
    }
}

impl NetInterface for TcpNet {
    fn read_line(&self) -> Option<String> {
        // Lines already buffered are served before looking at the socket.
        let buffered = self
            .client
            .borrow_mut()
            .as_mut()
            .and_then(|c| c.lines.next_line());
        if buffered.is_some() {
            return buffered;
        }

        self.fill();
        self.client
            .borrow_mut()
            .as_mut()
            .and_then(|c| c.lines.next_line())
    }

    fn write(&self, bytes: &[u8]) -> usize {
        let result = match self.client.borrow_mut().as_mut() {
            Some(client) => client.stream.write(bytes),
            None => return 0,
        };
        match result {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => 0,
            Err(e) => {
                debug!(error = %e, "Write failed");
                self.drop_client("write error");
                0
            }
        }
    }

    fn flush(&self) {
        let result = match self.client.borrow_mut().as_mut() {
            Some(client) => client.stream.flush(),
            None => return,
        };
        if let Err(e) = result {
            if e.kind() != ErrorKind::WouldBlock {
                self.drop_client("flush error");
            }
        }
    }

    fn poll(&self) {
        self.accept();
    }

    fn debug_name(&self) -> &str {
        "TCP Net"
    }
}

/// Lines from standard input, replies to standard output.
#[derive(Debug, Default)]
pub struct StdinNet {
    lines: RefCell<LineBuffer>,
    closed: std::cell::Cell<bool>,
}

impl StdinNet {
    /// Use the process's stdin and stdout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn stdin_ready() -> bool {
        use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
        use std::os::fd::AsFd;

        let stdin = io::stdin();
        let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::ZERO) {
            Ok(n) if n > 0 => fds[0].revents().is_some_and(|r| {
                r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP)
            }),
            _ => false,
        }
    }

    fn fill(&self) {
        if self.closed.get() || self.lines.borrow().is_full() || !Self::stdin_ready() {
            return;
        }

        // At least as large as stdin's internal buffer so reads bypass it
        // and readiness on the descriptor stays meaningful.
        let mut buf = [0u8; 8192];
        match io::stdin().lock().read(&mut buf) {
            Ok(0) => {
                debug!("stdin closed");
                self.closed.set(true);
            }
            Ok(n) => self.lines.borrow_mut().push(&buf[..n]),
            Err(e) => debug!(error = %e, "stdin read failed"),
        }
    }
}

impl NetInterface for StdinNet {
    fn read_line(&self) -> Option<String> {
        if let Some(line) = self.lines.borrow_mut().next_line() {
            return Some(line);
        }
        self.fill();
        self.lines.borrow_mut().next_line()
    }

    fn write(&self, bytes: &[u8]) -> usize {
        io::stdout().write(bytes).unwrap_or(0)
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
    }

    fn debug_name(&self) -> &str {
        "Stdin Net"
    }
}

/// Registers a transport's housekeeping with the Scheduler.
pub struct NetListener {
    net: Rc<dyn NetInterface>,
    period: TimeUs,
    name: String,
}

impl NetListener {
    /// Poll `net` every `period`.
    #[must_use]
    pub fn new(net: Rc<dyn NetInterface>, period: TimeUs) -> Self {
        let name = format!("{} Listener", net.debug_name());
        Self { net, period, name }
    }
}

impl Command for NetListener {
    fn execute(&mut self) -> RobotResult<TimeUs> {
        self.net.poll();
        Ok(self.period)
    }

    fn debug_name(&self) -> &str {
        &self.name
    }
}
