//! Terminal session lifecycle management.
//!
//! Owns the shell process, its replay buffer and the reader thread, and
//! serializes every operation that touches the process behind one lock.

use super::events::{EventBus, SessionEvent};
use super::process::{SpawnRequest, SpawnTerminal, WindowSize};
use super::pty::NativeSpawner;
use super::reader::{ReaderLoop, ReaderSettings};
use super::replay_buffer::{ReplayBuffer, DEFAULT_REPLAY_BUFFER_SIZE};
use super::shell::{default_candidates, select_shell, ShellCandidate};
use super::{lock_or_recover, SharedProcess};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use webterm_core::{TermError, TermResult};

/// Status notice published after a successful reset.
pub const RESET_NOTICE: &str = "Terminal has been reset.";

/// Settings for the single terminal session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Replay buffer capacity in bytes.
    pub buffer_size: usize,
    /// Size a freshly spawned shell starts with.
    pub initial_size: WindowSize,
    /// Value for `TERM`.
    pub term: String,
    /// Shells in priority order.
    pub shells: Vec<ShellCandidate>,
    /// Extra environment layered over the server's own.
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub reader: ReaderSettings,
    /// How long teardown waits for the reader to let go of the process.
    pub stop_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_REPLAY_BUFFER_SIZE,
            initial_size: WindowSize::default(),
            term: "xterm-256color".to_string(),
            shells: default_candidates(),
            env: HashMap::new(),
            cwd: None,
            reader: ReaderSettings::default(),
            stop_timeout: Duration::from_secs(1),
        }
    }
}

/// Coarse lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Running,
    /// Shut down, failed to start, or the shell ended on its own.
    Stopped,
}

/// What a newly connected viewer needs: everything so far, and everything
/// from now on, with no gap or overlap between the two.
#[derive(Debug)]
pub struct Attachment {
    pub snapshot: String,
    pub events: broadcast::Receiver<SessionEvent>,
}

struct Lifecycle {
    state: SessionState,
    reader: Option<ReaderLoop>,
    shell: Option<ShellCandidate>,
}

/// Manages the terminal session shared by all viewers.
pub struct SessionManager {
    config: SessionConfig,
    spawner: Arc<dyn SpawnTerminal>,
    process: SharedProcess,
    buffer: Arc<ReplayBuffer>,
    events: EventBus,
    /// Serializes initialize/reset/shutdown.
    lifecycle: Mutex<Lifecycle>,
}

impl SessionManager {
    /// Create a manager that spawns real PTY-backed shells.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_spawner(config, Arc::new(NativeSpawner))
    }

    pub fn with_spawner(config: SessionConfig, spawner: Arc<dyn SpawnTerminal>) -> Self {
        let buffer = Arc::new(ReplayBuffer::new(config.buffer_size));
        Self {
            config,
            spawner,
            process: Arc::new(Mutex::new(None)),
            buffer,
            events: EventBus::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Uninitialized,
                reader: None,
                shell: None,
            }),
        }
    }

    /// Start a fresh shell, discarding any previous one and its history.
    pub fn initialize(&self) -> TermResult<()> {
        let mut lifecycle = lock_or_recover(&self.lifecycle);
        self.teardown(&mut lifecycle);
        if !self.buffer.is_empty() {
            debug!(
                discarded = self.buffer.len(),
                total_written = self.buffer.total_written(),
                "clearing replay buffer"
            );
        }
        self.buffer.clear();

        match self.start(&mut lifecycle) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, "failed to start terminal session");
                lifecycle.state = SessionState::Stopped;
                lifecycle.shell = None;
                Err(e)
            }
        }
    }

    fn start(&self, lifecycle: &mut Lifecycle) -> TermResult<()> {
        let shell = select_shell(&self.config.shells)?.clone();

        {
            let mut slot = lock_or_recover(&self.process);
            *slot = None;
            let request = SpawnRequest {
                shell: &shell.path,
                size: self.config.initial_size,
                term: &self.config.term,
                env: &self.config.env,
                cwd: self.config.cwd.as_deref(),
            };
            let mut process = self.spawner.spawn(&request)?;
            if let Some(line) = &shell.startup {
                if let Err(e) = process.send(format!("{line}\n").as_bytes()) {
                    debug!(error = %e, "startup command failed, ignoring");
                }
            }
            *slot = Some(process);
        }

        lifecycle.reader = Some(ReaderLoop::start(
            self.process.clone(),
            self.buffer.clone(),
            self.events.clone(),
            self.config.reader,
        )?);
        lifecycle.state = SessionState::Running;
        info!(shell = %shell.path.display(), "terminal session started");

        if shell.is_minimal() {
            warn!(shell = %shell.path.display(), "running minimal fallback shell");
            self.events.publish(SessionEvent::Status(format!(
                "Started minimal shell {} without user configuration",
                shell.path.display()
            )));
        }
        lifecycle.shell = Some(shell);
        Ok(())
    }

    /// Stop the reader and force-close a live process. The process handle
    /// stays in its slot.
    fn teardown(&self, lifecycle: &mut Lifecycle) {
        if let Some(reader) = lifecycle.reader.take() {
            reader.stop(self.config.stop_timeout);
        }
        let mut slot = lock_or_recover(&self.process);
        if let Some(process) = slot.as_mut() {
            if process.is_alive() {
                if let Err(e) = process.close(true) {
                    warn!(error = %e, "failed to close terminal process");
                }
            }
        }
    }

    /// Forward keystrokes or text to the shell. Empty input is ignored.
    pub fn send_input(&self, data: &[u8]) -> TermResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let result = {
            let mut slot = lock_or_recover(&self.process);
            match slot.as_mut() {
                Some(process) => {
                    if process.is_alive() {
                        process.send(data)
                    } else {
                        Err(TermError::NotRunning)
                    }
                }
                None => Err(TermError::NotRunning),
            }
        };
        if let Err(e) = &result {
            debug!(error = %e, "input rejected");
            self.events.publish(SessionEvent::Error(e.to_string()));
        }
        result
    }

    /// Resize the terminal and announce the new geometry.
    pub fn resize(&self, rows: u16, cols: u16) -> TermResult<()> {
        let result = if rows == 0 || cols == 0 {
            Err(TermError::InvalidSize { rows, cols })
        } else {
            let mut slot = lock_or_recover(&self.process);
            match slot.as_mut() {
                Some(process) => {
                    if process.is_alive() {
                        process.set_window_size(WindowSize::new(rows, cols))
                    } else {
                        Err(TermError::NotRunning)
                    }
                }
                None => Err(TermError::NotRunning),
            }
        };
        match &result {
            Ok(()) => {
                debug!(rows, cols, "terminal resized");
                self.events
                    .publish(SessionEvent::Status(format!("Terminal resized to {rows}x{cols}")));
            }
            Err(e) => self.events.publish(SessionEvent::Error(e.to_string())),
        }
        result
    }

    /// Replace the shell with a fresh one and clear history.
    pub fn reset(&self) -> TermResult<()> {
        match self.initialize() {
            Ok(()) => {
                info!("terminal reset");
                self.events.publish(SessionEvent::Status(RESET_NOTICE.to_string()));
                Ok(())
            }
            Err(e) => {
                self.events
                    .publish(SessionEvent::Error(format!("Reset failed: {e}")));
                Err(e)
            }
        }
    }

    /// Everything currently in the replay buffer.
    pub fn buffer_snapshot(&self) -> String {
        String::from_utf8_lossy(&self.buffer.contents()).into_owned()
    }

    /// Snapshot the buffer and subscribe to events atomically.
    ///
    /// The reader appends and publishes while holding the process lock, so
    /// taking both under that lock means every chunk lands in exactly one of
    /// the two.
    pub fn connect(&self) -> Attachment {
        let _slot = lock_or_recover(&self.process);
        Attachment {
            snapshot: self.buffer_snapshot(),
            events: self.subscribe(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Stop the reader, kill the shell and release it.
    pub fn shutdown(&self) {
        let mut lifecycle = lock_or_recover(&self.lifecycle);
        self.teardown(&mut lifecycle);
        *lock_or_recover(&self.process) = None;
        lifecycle.state = SessionState::Stopped;
        info!("terminal session shut down");
    }

    pub fn state(&self) -> SessionState {
        let lifecycle = lock_or_recover(&self.lifecycle);
        match (&lifecycle.state, &lifecycle.reader) {
            (SessionState::Running, Some(reader)) if !reader.is_active() => SessionState::Stopped,
            (state, _) => *state,
        }
    }

    pub fn is_alive(&self) -> bool {
        lock_or_recover(&self.process)
            .as_mut()
            .is_some_and(|p| p.is_alive())
    }

    /// The size the live terminal reports.
    pub fn window_size(&self) -> Option<WindowSize> {
        lock_or_recover(&self.process)
            .as_ref()
            .and_then(|p| p.window_size().ok())
    }

    /// Path of the shell started by the last successful initialize.
    pub fn shell(&self) -> Option<PathBuf> {
        lock_or_recover(&self.lifecycle)
            .shell
            .as_ref()
            .map(|s| s.path.clone())
    }
}
