//! Scripted terminal process for exercising the reader and manager without
//! a real PTY.

use super::events::SessionEvent;
use super::process::{ReadOutcome, SpawnRequest, SpawnTerminal, TerminalProcess, WindowSize};
use super::lock_or_recover;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use webterm_core::{TermError, TermResult};

#[derive(Debug)]
struct FakeState {
    script: VecDeque<TermResult<ReadOutcome>>,
    alive: bool,
    sent: Vec<u8>,
    size: WindowSize,
    closed: Option<bool>,
}

#[derive(Debug, Default)]
struct Probes {
    busy: AtomicBool,
    overlaps: AtomicUsize,
    torn_reads: AtomicUsize,
    reads: AtomicUsize,
}

/// Test-side handle for scripting and inspecting a `FakeProcess`.
#[derive(Debug, Clone)]
pub struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
    probes: Arc<Probes>,
}

impl FakeHandle {
    pub fn push(&self, outcome: TermResult<ReadOutcome>) {
        lock_or_recover(&self.state).script.push_back(outcome);
    }

    pub fn push_output(&self, text: &str) {
        self.push(Ok(ReadOutcome::Data(text.to_string())));
    }

    pub fn set_alive(&self, alive: bool) {
        lock_or_recover(&self.state).alive = alive;
    }

    pub fn sent(&self) -> Vec<u8> {
        lock_or_recover(&self.state).sent.clone()
    }

    pub fn size(&self) -> WindowSize {
        lock_or_recover(&self.state).size
    }

    /// `Some(force)` once the process has been closed.
    pub fn closed(&self) -> Option<bool> {
        lock_or_recover(&self.state).closed
    }

    pub fn overlaps(&self) -> usize {
        self.probes.overlaps.load(Ordering::SeqCst)
    }

    pub fn torn_reads(&self) -> usize {
        self.probes.torn_reads.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.probes.reads.load(Ordering::SeqCst)
    }
}

/// A terminal process driven by a script of read outcomes.
///
/// Once the script runs dry every read times out. Resizes update rows and
/// columns in two separate steps, so a read that runs concurrently with a
/// resize can observe a half-applied size; such reads are counted.
#[derive(Debug)]
pub struct FakeProcess {
    handle: FakeHandle,
}

impl FakeProcess {
    pub fn new() -> (Self, FakeHandle) {
        let handle = FakeHandle {
            state: Arc::new(Mutex::new(FakeState {
                script: VecDeque::new(),
                alive: true,
                sent: Vec::new(),
                size: WindowSize::default(),
                closed: None,
            })),
            probes: Arc::new(Probes::default()),
        };
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }

    fn enter(&self) {
        if self.handle.probes.busy.swap(true, Ordering::SeqCst) {
            self.handle.probes.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn leave(&self) {
        self.handle.probes.busy.store(false, Ordering::SeqCst);
    }
}

impl TerminalProcess for FakeProcess {
    fn is_alive(&mut self) -> bool {
        lock_or_recover(&self.handle.state).alive
    }

    fn read_nonblocking(
        &mut self,
        _max_bytes: usize,
        timeout: Duration,
    ) -> TermResult<ReadOutcome> {
        self.enter();
        self.handle.probes.reads.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut state = lock_or_recover(&self.handle.state);
            // Resizes in tests always keep cols == rows * 3.
            if state.size.cols != state.size.rows.saturating_mul(3)
                && state.size != WindowSize::default()
            {
                self.handle.probes.torn_reads.fetch_add(1, Ordering::SeqCst);
            }
            state.script.pop_front()
        };
        let outcome = match next {
            Some(outcome) => outcome,
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(1)));
                Ok(ReadOutcome::Timeout)
            }
        };
        self.leave();
        outcome
    }

    fn send(&mut self, data: &[u8]) -> TermResult<()> {
        self.enter();
        let mut state = lock_or_recover(&self.handle.state);
        let result = if state.alive {
            state.sent.extend_from_slice(data);
            Ok(())
        } else {
            Err(TermError::TransientIo("process exited".into()))
        };
        drop(state);
        self.leave();
        result
    }

    fn set_window_size(&mut self, size: WindowSize) -> TermResult<()> {
        self.enter();
        lock_or_recover(&self.handle.state).size.rows = size.rows;
        std::thread::sleep(Duration::from_micros(200));
        lock_or_recover(&self.handle.state).size.cols = size.cols;
        self.leave();
        Ok(())
    }

    fn window_size(&self) -> TermResult<WindowSize> {
        Ok(lock_or_recover(&self.handle.state).size)
    }

    fn close(&mut self, force: bool) -> TermResult<()> {
        let mut state = lock_or_recover(&self.handle.state);
        state.alive = false;
        state.closed = Some(force);
        Ok(())
    }
}

/// Spawner that hands out `FakeProcess`es and remembers their handles.
#[derive(Debug, Default)]
pub struct FakeSpawner {
    spawned: Mutex<Vec<FakeHandle>>,
    fail: AtomicBool,
    last_request: Mutex<Option<(std::path::PathBuf, WindowSize, String)>>,
}

impl FakeSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn spawned(&self) -> Vec<FakeHandle> {
        lock_or_recover(&self.spawned).clone()
    }

    pub fn last(&self) -> Option<FakeHandle> {
        lock_or_recover(&self.spawned).last().cloned()
    }

    /// Shell path, initial size and `TERM` of the most recent spawn.
    pub fn last_request(&self) -> Option<(std::path::PathBuf, WindowSize, String)> {
        lock_or_recover(&self.last_request).clone()
    }
}

impl SpawnTerminal for FakeSpawner {
    fn spawn(&self, request: &SpawnRequest<'_>) -> TermResult<Box<dyn TerminalProcess>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TermError::Spawn("fake spawn failure".into()));
        }
        *lock_or_recover(&self.last_request) = Some((
            request.shell.to_path_buf(),
            request.size,
            request.term.to_string(),
        ));
        let (process, handle) = FakeProcess::new();
        lock_or_recover(&handle.state).size = request.size;
        lock_or_recover(&self.spawned).push(handle);
        Ok(Box::new(process))
    }
}

/// Collect events until `done` holds on everything received so far, or
/// two seconds pass.
pub fn recv_until(
    rx: &mut broadcast::Receiver<SessionEvent>,
    done: impl Fn(&[SessionEvent]) -> bool,
) -> Vec<SessionEvent> {
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut seen = Vec::new();
    while !done(&seen) && Instant::now() < deadline {
        match rx.try_recv() {
            Ok(event) => seen.push(event),
            Err(broadcast::error::TryRecvError::Empty) => {
                std::thread::sleep(Duration::from_millis(1))
            }
            Err(_) => break,
        }
    }
    seen
}
