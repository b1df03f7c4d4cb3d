//! The seam between the session manager and the OS pseudo-terminal.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use webterm_core::TermResult;

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

impl WindowSize {
    pub const fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(webterm_core::DEFAULT_ROWS, webterm_core::DEFAULT_COLS)
    }
}

impl std::fmt::Display for WindowSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// Result of one bounded read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Decoded output. May be empty if only part of a character arrived.
    Data(String),
    /// Nothing arrived within the timeout.
    Timeout,
    /// The process closed its side of the terminal.
    EndOfOutput,
}

/// A child process attached to a pseudo-terminal.
///
/// Implementations are not internally synchronized; callers serialize all
/// access behind one lock.
pub trait TerminalProcess: Send {
    /// Non-blocking liveness check.
    fn is_alive(&mut self) -> bool;

    /// Read up to `max_bytes`, waiting at most `timeout` for output.
    fn read_nonblocking(&mut self, max_bytes: usize, timeout: Duration)
        -> TermResult<ReadOutcome>;

    /// Write raw bytes to the process input.
    fn send(&mut self, data: &[u8]) -> TermResult<()>;

    /// Resize the terminal; the foreground program receives SIGWINCH.
    fn set_window_size(&mut self, size: WindowSize) -> TermResult<()>;

    /// The size the terminal currently reports.
    fn window_size(&self) -> TermResult<WindowSize>;

    /// Terminate the child. Succeeds if it has already exited.
    fn close(&mut self, force: bool) -> TermResult<()>;
}

/// Everything needed to start a terminal process.
#[derive(Debug, Clone)]
pub struct SpawnRequest<'a> {
    pub shell: &'a Path,
    pub size: WindowSize,
    /// Value for `TERM`.
    pub term: &'a str,
    /// Extra variables layered over the inherited environment.
    pub env: &'a HashMap<String, String>,
    pub cwd: Option<&'a Path>,
}

/// Creates terminal processes. The native implementation opens a real PTY.
pub trait SpawnTerminal: Send + Sync {
    fn spawn(&self, request: &SpawnRequest<'_>) -> TermResult<Box<dyn TerminalProcess>>;
}
