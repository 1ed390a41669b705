//! Bounded blocking byte pipe.
//!
//! Connects a synchronous writer to the chunker thread. The writer blocks
//! when the pipe is full, the reader blocks when it is empty, and closing
//! the write end drains the remaining bytes before the reader observes
//! end-of-stream. Dropping the reader breaks the pipe for the writer.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Error raised when writing into a pipe whose reader is gone.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("broken pipe: reader dropped")]
pub struct BrokenPipe;

struct State {
    buf: VecDeque<u8>,
    capacity: usize,
    closed: bool,
    reader_gone: bool,
}

struct Shared {
    state: Mutex<State>,
    readable: Condvar,
    writable: Condvar,
}

/// Creates a bounded pipe with the given capacity in bytes.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    assert!(capacity > 0, "pipe capacity must be non-zero");
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buf: VecDeque::with_capacity(capacity),
            capacity,
            closed: false,
            reader_gone: false,
        }),
        readable: Condvar::new(),
        writable: Condvar::new(),
    });
    (
        PipeWriter {
            shared: Arc::clone(&shared),
        },
        PipeReader { shared },
    )
}

/// Write end of the pipe.
pub struct PipeWriter {
    shared: Arc<Shared>,
}

impl PipeWriter {
    /// Writes all of `data`, blocking while the pipe is full.
    ///
    /// Returns the number of bytes written, which is `data.len()` unless
    /// the reader disappeared mid-write.
    pub fn write(&self, data: &[u8]) -> Result<usize, BrokenPipe> {
        let mut written = 0;
        let mut state = self.shared.state.lock();
        while written < data.len() {
            if state.reader_gone {
                return Err(BrokenPipe);
            }
            let free = state.capacity - state.buf.len();
            if free == 0 {
                self.shared.writable.wait(&mut state);
                continue;
            }
            let take = free.min(data.len() - written);
            state.buf.extend(&data[written..written + take]);
            written += take;
            self.shared.readable.notify_one();
        }
        Ok(written)
    }

    /// Closes the write end. The reader drains buffered bytes and then
    /// observes end-of-stream. Idempotent.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        self.shared.readable.notify_all();
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read end of the pipe.
pub struct PipeReader {
    shared: Arc<Shared>,
}

impl PipeReader {
    /// Reads up to `buf.len()` bytes, blocking while the pipe is empty.
    ///
    /// Returns 0 only after the write end is closed and the pipe drained.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let mut state = self.shared.state.lock();
        loop {
            if !state.buf.is_empty() {
                let take = buf.len().min(state.buf.len());
                for slot in buf.iter_mut().take(take) {
                    *slot = state.buf.pop_front().expect("buffer length checked");
                }
                self.shared.writable.notify_one();
                return take;
            }
            if state.closed {
                return 0;
            }
            self.shared.readable.wait(&mut state);
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.reader_gone = true;
        self.shared.writable.notify_all();
    }
}
