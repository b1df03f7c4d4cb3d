//! Bounded output history for replaying to newly joined viewers.
//!
//! Stores the last `max_size` bytes of terminal output so that a viewer
//! connecting mid-session can receive a scrollback snapshot without the
//! server keeping unbounded history.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::lock_or_recover;

/// Default replay capacity (500,000 bytes).
pub const DEFAULT_REPLAY_BUFFER_SIZE: usize = 500_000;

#[derive(Debug, Default)]
struct Inner {
    bytes: VecDeque<u8>,
    /// Total bytes ever written since the last clear.
    total_written: u64,
}

/// A thread-safe, append-only byte log that truncates from the front.
///
/// `write`, `contents` and `clear` are mutually exclusive, so a reader never
/// observes a buffer that has been appended to but not yet truncated.
#[derive(Debug)]
pub struct ReplayBuffer {
    inner: Mutex<Inner>,
    max_size: usize,
}

impl ReplayBuffer {
    /// Create a buffer that retains at most `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                bytes: VecDeque::with_capacity(max_size.min(64 * 1024)),
                total_written: 0,
            }),
            max_size,
        }
    }

    /// Append `data`, discarding the oldest bytes beyond `max_size`.
    pub fn write(&self, data: &[u8]) {
        let mut inner = lock_or_recover(&self.inner);
        inner.total_written += data.len() as u64;

        if data.len() >= self.max_size {
            inner.bytes.clear();
            inner
                .bytes
                .extend(&data[data.len() - self.max_size..]);
            return;
        }

        inner.bytes.extend(data);
        let excess = inner.bytes.len().saturating_sub(self.max_size);
        if excess > 0 {
            inner.bytes.drain(..excess);
        }
    }

    /// Snapshot of the retained bytes, oldest first.
    pub fn contents(&self) -> Vec<u8> {
        let inner = lock_or_recover(&self.inner);
        let (front, back) = inner.bytes.as_slices();
        let mut out = Vec::with_capacity(front.len() + back.len());
        out.extend_from_slice(front);
        out.extend_from_slice(back);
        out
    }

    /// Drop all retained history.
    pub fn clear(&self) {
        let mut inner = lock_or_recover(&self.inner);
        inner.bytes.clear();
        inner.total_written = 0;
    }

    /// Number of bytes currently retained.
    pub fn len(&self) -> usize {
        lock_or_recover(&self.inner).bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes written since construction or the last `clear`.
    pub fn total_written(&self) -> u64 {
        lock_or_recover(&self.inner).total_written
    }
}

impl Default for ReplayBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn basic_write_read() {
        let rb = ReplayBuffer::new(10);
        rb.write(b"hello");
        assert_eq!(rb.contents(), b"hello");
        assert_eq!(rb.len(), 5);
    }

    #[test]
    fn truncates_from_front() {
        let rb = ReplayBuffer::new(5);
        rb.write(b"abcde");
        rb.write(b"fg");
        assert_eq!(rb.contents(), b"cdefg");
        assert_eq!(rb.len(), 5);
        assert_eq!(rb.total_written(), 7);
    }

    #[test]
    fn single_write_larger_than_capacity() {
        let rb = ReplayBuffer::new(4);
        rb.write(b"0123456789");
        assert_eq!(rb.contents(), b"6789");
    }

    #[test]
    fn writes_preserve_order() {
        let rb = ReplayBuffer::new(100);
        rb.write(b"first ");
        assert_eq!(rb.contents(), b"first ");
        rb.write(b"second");
        assert_eq!(rb.contents(), b"first second");
    }

    #[test]
    fn clear_empties() {
        let rb = ReplayBuffer::new(10);
        rb.write(b"data");
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.contents(), Vec::<u8>::new());
        assert_eq!(rb.total_written(), 0);
    }

    #[test]
    fn zero_capacity() {
        let rb = ReplayBuffer::new(0);
        rb.write(b"test");
        assert!(rb.is_empty());
    }

    #[test]
    fn six_hundred_thousand_into_five_hundred_thousand() {
        let rb = ReplayBuffer::new(DEFAULT_REPLAY_BUFFER_SIZE);
        let all: Vec<u8> = (0..600_000u32).map(|i| (i % 251) as u8).collect();
        for chunk in all.chunks(4096) {
            rb.write(chunk);
        }
        let contents = rb.contents();
        assert_eq!(contents.len(), 500_000);
        assert_eq!(contents, &all[100_000..]);
    }

    #[test]
    fn concurrent_readers_see_whole_writes() {
        // Every write is 8 identical bytes and the capacity is a multiple of
        // 8, so any snapshot must consist of whole 8-byte runs.
        let rb = Arc::new(ReplayBuffer::new(64));
        let writer = {
            let rb = rb.clone();
            std::thread::spawn(move || {
                for i in 0..2_000u32 {
                    rb.write(&[(i % 256) as u8; 8]);
                }
            })
        };
        for _ in 0..2_000 {
            let snap = rb.contents();
            assert!(snap.len() <= 64);
            assert_eq!(snap.len() % 8, 0);
            for run in snap.chunks(8) {
                assert!(run.iter().all(|b| *b == run[0]));
            }
        }
        writer.join().unwrap();
    }

    proptest! {
        #[test]
        fn retains_suffix_of_all_writes(
            max_size in 0usize..256,
            writes in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..64),
                0..32,
            ),
        ) {
            let rb = ReplayBuffer::new(max_size);
            let mut all = Vec::new();
            for w in &writes {
                rb.write(w);
                all.extend_from_slice(w);
                let contents = rb.contents();
                prop_assert!(contents.len() <= max_size);
                let keep = all.len().min(max_size);
                prop_assert_eq!(&contents[..], &all[all.len() - keep..]);
            }
        }
    }
}
