//! Terminal session: PTY process, replay buffer, reader thread, lifecycle.

pub mod events;
pub mod manager;
pub mod process;
pub mod pty;
pub mod reader;
pub mod replay_buffer;
pub mod shell;

#[cfg(test)]
pub(crate) mod testing;

pub use events::SessionEvent;
pub use manager::{SessionConfig, SessionManager};
pub use process::{TerminalProcess, WindowSize};
pub use reader::ReaderSettings;

use std::sync::{Arc, Mutex, MutexGuard};

/// The process slot shared by the manager and the reader thread. Every
/// operation on the process happens while holding this lock.
pub type SharedProcess = Arc<Mutex<Option<Box<dyn TerminalProcess>>>>;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
