//! Background reader that drains the PTY into the replay buffer.
//!
//! Runs on a dedicated OS thread because the underlying read is a bounded
//! poll, not an async source. Each iteration takes the process lock, waits
//! at most `poll_timeout` for output, releases the lock and sleeps
//! `idle_sleep`, so output reaches viewers within roughly the sum of the two.

use super::events::{EventBus, SessionEvent};
use super::process::{ReadOutcome, TerminalProcess};
use super::replay_buffer::ReplayBuffer;
use super::{lock_or_recover, SharedProcess};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use webterm_core::{TermError, TermResult};

/// Upper bound on reads when draining a process that has already exited.
const MAX_DRAIN_READS: usize = 64;

/// Timing and sizing knobs for the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderSettings {
    /// Maximum bytes per read.
    pub chunk_size: usize,
    /// How long one read waits for output while holding the process lock.
    pub poll_timeout: Duration,
    /// Pause between iterations, outside the lock.
    pub idle_sleep: Duration,
    /// Pause after a recoverable read error.
    pub error_backoff: Duration,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            poll_timeout: Duration::from_millis(50),
            idle_sleep: Duration::from_millis(10),
            error_backoff: Duration::from_millis(500),
        }
    }
}

struct ReaderContext {
    process: SharedProcess,
    buffer: Arc<ReplayBuffer>,
    events: EventBus,
    settings: ReaderSettings,
    stop: Arc<AtomicBool>,
}

enum Step {
    Continue,
    Ended,
    Backoff(TermError),
    Fatal(TermError),
}

/// Handle to a running reader thread.
///
/// Dropping the handle requests a stop without waiting for it.
pub struct ReaderLoop {
    stop: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    /// Disconnects when the thread exits.
    done_rx: mpsc::Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl ReaderLoop {
    /// Start a reader over `process`.
    pub fn start(
        process: SharedProcess,
        buffer: Arc<ReplayBuffer>,
        events: EventBus,
        settings: ReaderSettings,
    ) -> TermResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let ctx = ReaderContext {
            process,
            buffer,
            events,
            settings,
            stop: stop.clone(),
        };
        let thread_active = active.clone();
        let handle = std::thread::Builder::new()
            .name("webterm-reader".into())
            .spawn(move || {
                run(&ctx);
                thread_active.store(false, Ordering::Release);
                drop(done_tx);
            })?;

        Ok(Self {
            stop,
            active,
            done_rx,
            handle: Some(handle),
        })
    }

    /// Whether the thread is still looping.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Wait up to `timeout` for the loop to finish on its own.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        matches!(
            self.done_rx.recv_timeout(timeout),
            Err(mpsc::RecvTimeoutError::Disconnected)
        )
    }

    /// Request a stop and wait up to `timeout` for the thread to let go of
    /// the process. Returns `false` if it did not acknowledge in time; the
    /// thread is then left detached and exits at its next iteration.
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Release);
        if self.wait_finished(timeout) {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
            debug!("reader stopped");
            true
        } else {
            warn!(timeout_ms = timeout.as_millis() as u64, "reader did not stop in time");
            false
        }
    }
}

impl Drop for ReaderLoop {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

fn run(ctx: &ReaderContext) {
    debug!("reader started");
    loop {
        if ctx.stop.load(Ordering::Acquire) {
            break;
        }

        let step = {
            let mut guard = lock_or_recover(&ctx.process);
            // A stop may have been requested while we waited for the lock.
            if ctx.stop.load(Ordering::Acquire) {
                break;
            }
            let Some(process) = guard.as_mut() else {
                break;
            };

            if !process.is_alive() {
                drain(process.as_mut(), ctx);
                Step::Ended
            } else {
                match process.read_nonblocking(ctx.settings.chunk_size, ctx.settings.poll_timeout) {
                    Ok(ReadOutcome::Data(text)) => {
                        deliver(ctx, text);
                        Step::Continue
                    }
                    Ok(ReadOutcome::Timeout) => Step::Continue,
                    Ok(ReadOutcome::EndOfOutput) => {
                        retire(process.as_mut());
                        Step::Ended
                    }
                    Err(e) if e.is_recoverable() => Step::Backoff(e),
                    Err(e) => {
                        retire(process.as_mut());
                        Step::Fatal(e)
                    }
                }
            }
        };

        match step {
            Step::Continue => std::thread::sleep(ctx.settings.idle_sleep),
            Step::Ended => {
                info!("terminal output closed");
                ctx.events.publish(SessionEvent::Ended);
                break;
            }
            Step::Backoff(e) => {
                warn!(error = %e, "terminal read failed, retrying");
                ctx.events.publish(SessionEvent::Error(e.to_string()));
                std::thread::sleep(ctx.settings.error_backoff);
            }
            Step::Fatal(e) => {
                error!(error = %e, "terminal read failed, stopping reader");
                ctx.events.publish(SessionEvent::Error(e.to_string()));
                break;
            }
        }
    }
    debug!("reader exited");
}

/// Append to the replay buffer and publish, with the process lock held.
fn deliver(ctx: &ReaderContext, text: String) {
    if text.is_empty() {
        return;
    }
    ctx.buffer.write(text.as_bytes());
    ctx.events.publish(SessionEvent::Output(text));
}

/// Kill a process the reader is giving up on, so the session stops
/// accepting input until it is initialized again.
fn retire(process: &mut dyn TerminalProcess) {
    if let Err(e) = process.close(true) {
        warn!(error = %e, "failed to close terminal process after read loop ended");
    }
}

/// Collect whatever the exited process left in the terminal.
fn drain(process: &mut dyn TerminalProcess, ctx: &ReaderContext) {
    for _ in 0..MAX_DRAIN_READS {
        match process.read_nonblocking(ctx.settings.chunk_size, Duration::ZERO) {
            Ok(ReadOutcome::Data(text)) => deliver(ctx, text),
            _ => break,
        }
    }
}
