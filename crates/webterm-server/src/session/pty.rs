//! PTY wrapper using portable-pty.
//!
//! Opens a pseudo-terminal running a shell at a given size. The master side
//! is switched to non-blocking mode so reads can be bounded with `poll(2)`;
//! output is decoded as UTF-8 incrementally so characters split across two
//! reads are delivered whole.

use super::process::{ReadOutcome, SpawnRequest, SpawnTerminal, TerminalProcess, WindowSize};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{self, Read, Write};
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use webterm_core::{TermError, TermResult};

/// How long a graceful close waits for the shell to exit before killing it.
const GRACEFUL_CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// How long a write waits for the PTY to drain before giving up.
const WRITE_STALL_TIMEOUT_MS: i32 = 1_000;

/// A managed PTY instance.
pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
    /// Non-blocking master descriptor used for readiness polling.
    fd: RawFd,
    decoder: Utf8Decoder,
    shell: PathBuf,
}

impl PtyHandle {
    /// Spawn `request.shell` attached to a new PTY.
    pub fn spawn(request: &SpawnRequest<'_>) -> TermResult<Self> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(to_pty_size(request.size))
            .map_err(|e| TermError::Spawn(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(request.shell);
        match request.cwd {
            Some(dir) => cmd.cwd(dir),
            None => {
                if let Ok(dir) = std::env::current_dir() {
                    cmd.cwd(dir);
                }
            }
        }
        for (key, value) in request.env {
            cmd.env(key, value);
        }
        cmd.env("TERM", request.term);

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            TermError::Spawn(format!(
                "failed to spawn {}: {e}",
                request.shell.display()
            ))
        })?;
        // Holding the slave open would keep the master from ever seeing hangup.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TermError::Spawn(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TermError::Spawn(format!("failed to take PTY writer: {e}")))?;
        let fd = pair
            .master
            .as_raw_fd()
            .ok_or_else(|| TermError::Spawn("PTY master has no file descriptor".into()))?;
        set_non_blocking(fd)?;

        info!(
            shell = %request.shell.display(),
            pid = ?child.process_id(),
            rows = request.size.rows,
            cols = request.size.cols,
            "PTY spawned"
        );

        Ok(Self {
            master: pair.master,
            child,
            reader,
            writer,
            fd,
            decoder: Utf8Decoder::default(),
            shell: request.shell.to_path_buf(),
        })
    }


    fn hang_up(&self) {
        if let Some(pid) = self.child.process_id() {
            let pid = pid as libc::pid_t;
            // SAFETY: plain signal delivery to our own child.
            unsafe {
                libc::kill(pid, libc::SIGHUP);
                libc::kill(pid, libc::SIGCONT);
            }
        }
    }

    fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !self.is_alive() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        !self.is_alive()
    }
}

impl TerminalProcess for PtyHandle {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn read_nonblocking(
        &mut self,
        max_bytes: usize,
        timeout: Duration,
    ) -> TermResult<ReadOutcome> {
        if max_bytes == 0 {
            return Ok(ReadOutcome::Timeout);
        }

        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
        match wait_readable(self.fd, timeout_ms)? {
            Readiness::Idle => return Ok(ReadOutcome::Timeout),
            Readiness::HungUp => return Ok(ReadOutcome::EndOfOutput),
            Readiness::Readable => {}
        }

        let mut buf = vec![0u8; max_bytes];
        let mut total = 0;
        loop {
            match self.reader.read(&mut buf[total..]) {
                Ok(0) => {
                    if total == 0 {
                        return Ok(ReadOutcome::EndOfOutput);
                    }
                    break;
                }
                Ok(n) => {
                    total += n;
                    if total == buf.len() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // Linux reports a closed slave as EIO on the master.
                Err(e) if e.raw_os_error() == Some(libc::EIO) => {
                    if total == 0 {
                        return Ok(ReadOutcome::EndOfOutput);
                    }
                    break;
                }
                Err(e) => {
                    if total == 0 {
                        return Err(TermError::TransientIo(format!("PTY read failed: {e}")));
                    }
                    break;
                }
            }
        }

        if total == 0 {
            return Ok(ReadOutcome::Timeout);
        }
        Ok(ReadOutcome::Data(self.decoder.decode(&buf[..total])))
    }

    fn send(&mut self, data: &[u8]) -> TermResult<()> {
        let mut offset = 0;
        while offset < data.len() {
            match self.writer.write(&data[offset..]) {
                Ok(0) => {
                    return Err(TermError::TransientIo(
                        "write returned 0 bytes, PTY closed".into(),
                    ));
                }
                Ok(n) => offset += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    wait_writable(self.fd, WRITE_STALL_TIMEOUT_MS)?;
                }
                Err(e) => return Err(TermError::TransientIo(format!("PTY write failed: {e}"))),
            }
        }
        match self.writer.flush() {
            Err(e) if e.kind() != io::ErrorKind::WouldBlock => {
                Err(TermError::TransientIo(format!("PTY flush failed: {e}")))
            }
            _ => Ok(()),
        }
    }

    fn set_window_size(&mut self, size: WindowSize) -> TermResult<()> {
        self.master
            .resize(to_pty_size(size))
            .map_err(|e| TermError::TransientIo(format!("PTY resize failed: {e}")))?;
        debug!(rows = size.rows, cols = size.cols, "PTY resized");
        Ok(())
    }

    fn window_size(&self) -> TermResult<WindowSize> {
        let size = self
            .master
            .get_size()
            .map_err(|e| TermError::TransientIo(format!("PTY size query failed: {e}")))?;
        Ok(WindowSize::new(size.rows, size.cols))
    }

    fn close(&mut self, force: bool) -> TermResult<()> {
        if !self.is_alive() {
            return Ok(());
        }

        if !force {
            self.hang_up();
            if self.wait_for_exit(GRACEFUL_CLOSE_TIMEOUT) {
                info!(shell = %self.shell.display(), "PTY child exited after hangup");
                return Ok(());
            }
        }

        if let Err(e) = self.child.kill() {
            if !self.is_alive() {
                return Ok(());
            }
            return Err(TermError::TransientIo(format!("kill failed: {e}")));
        }
        let status = self.child.wait();
        info!(shell = %self.shell.display(), status = ?status.ok(), "PTY child killed");
        Ok(())
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Spawns real PTY-backed processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSpawner;

impl SpawnTerminal for NativeSpawner {
    fn spawn(&self, request: &SpawnRequest<'_>) -> TermResult<Box<dyn TerminalProcess>> {
        Ok(Box::new(PtyHandle::spawn(request)?))
    }
}

fn to_pty_size(size: WindowSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Incremental UTF-8 decoder that carries incomplete trailing sequences
/// over to the next chunk. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(bytes);

        let mut out = String::with_capacity(input.len());
        let mut rest = &input[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    if let Ok(s) = std::str::from_utf8(&rest[..valid]) {
                        out.push_str(s);
                    }
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + len..];
                        }
                        None => {
                            self.pending = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}

enum Readiness {
    Readable,
    Idle,
    HungUp,
}

fn set_non_blocking(fd: RawFd) -> TermResult<()> {
    // SAFETY: fcntl on a descriptor we own.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(TermError::Spawn(io::Error::last_os_error().to_string()));
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if result < 0 {
        return Err(TermError::Spawn(io::Error::last_os_error().to_string()));
    }
    Ok(())
}

fn wait_readable(fd: RawFd, timeout_ms: i32) -> TermResult<Readiness> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    // SAFETY: one valid pollfd for the duration of the call.
    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if result < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(Readiness::Idle);
        }
        return Err(TermError::TransientIo(format!("poll failed: {err}")));
    }
    if result == 0 {
        return Ok(Readiness::Idle);
    }

    if pollfd.revents & libc::POLLNVAL != 0 {
        return Err(TermError::Fatal("PTY descriptor is no longer valid".into()));
    }
    // Drain pending output before reporting hangup; POLLERR surfaces via read().
    if pollfd.revents & (libc::POLLIN | libc::POLLERR) != 0 {
        return Ok(Readiness::Readable);
    }
    if pollfd.revents & libc::POLLHUP != 0 {
        return Ok(Readiness::HungUp);
    }
    Ok(Readiness::Idle)
}

fn wait_writable(fd: RawFd, timeout_ms: i32) -> TermResult<()> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };

    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if result < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(());
        }
        return Err(TermError::TransientIo(format!("poll failed: {err}")));
    }
    if result == 0 {
        return Err(TermError::TransientIo("PTY input stalled".into()));
    }
    if pollfd.revents & libc::POLLNVAL != 0 {
        return Err(TermError::Fatal("PTY descriptor is no longer valid".into()));
    }
    if pollfd.revents & (libc::POLLERR | libc::POLLHUP) != 0 {
        return Err(TermError::TransientIo("PTY closed while writing".into()));
    }
    Ok(())
}
