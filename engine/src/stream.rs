//! Stream wrappers used while a file is being transferred.
//!
//! - [`CountingReader`] adds every byte it hands out to a [`ByteCounter`].
//! - [`RateLimitedReader`] enforces a byte/second cap shared through a
//!   [`ThroughputControl`]. A limit of `0` starves the stream, which is how a
//!   job is paused; closing the control wakes any blocked read so a stopped
//!   job never hangs.

use std::io::{self, Read};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::counter::ByteCounter;

/// Throughput limit meaning "no limit".
pub const UNLIMITED: i64 = -1;

/// Length of a throttling window.
const WINDOW: Duration = Duration::from_secs(1);

/// Returned by a read on a stream whose control was closed.
#[derive(Debug, thiserror::Error)]
#[error("stream closed")]
pub struct StreamClosed;

/// Returns true if `err` was produced by reading a closed rate-limited stream.
pub fn is_stream_closed(err: &io::Error) -> bool {
    err.get_ref()
        .map(|inner| inner.is::<StreamClosed>())
        .unwrap_or(false)
}

#[derive(Debug)]
struct ControlState {
    limit: i64,
    closed: bool,
}

/// Shared handle through which a controller thread adjusts or closes a
/// [`RateLimitedReader`] owned by the worker thread.
#[derive(Debug)]
pub struct ThroughputControl {
    state: Mutex<ControlState>,
    changed: Condvar,
}

impl ThroughputControl {
    pub fn new(limit: i64) -> Arc<Self> {
        Arc::new(ThroughputControl {
            state: Mutex::new(ControlState {
                limit: normalize_limit(limit),
                closed: false,
            }),
            changed: Condvar::new(),
        })
    }

    /// Changes the limit. Wakes any read blocked on the previous limit.
    pub fn set_limit(&self, limit: i64) {
        let mut state = self.lock_state();
        state.limit = normalize_limit(limit);
        self.changed.notify_all();
    }

    pub fn limit(&self) -> i64 {
        self.lock_state().limit
    }

    /// Marks the stream closed. Blocked and future reads fail with
    /// [`StreamClosed`]; the wrapped source is dropped with the reader.
    pub fn close(&self) {
        let mut state = self.lock_state();
        state.closed = true;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    fn lock_state(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Any negative value means unlimited.
fn normalize_limit(limit: i64) -> i64 {
    if limit < 0 {
        UNLIMITED
    } else {
        limit
    }
}

/// Reader that throttles the wrapped source to the control's current limit.
pub struct RateLimitedReader<R> {
    inner: R,
    control: Arc<ThroughputControl>,
    window_start: Instant,
    window_bytes: u64,
}

impl<R: Read> RateLimitedReader<R> {
    pub fn new(inner: R, control: Arc<ThroughputControl>) -> Self {
        RateLimitedReader {
            inner,
            control,
            window_start: Instant::now(),
            window_bytes: 0,
        }
    }

    pub fn control(&self) -> &Arc<ThroughputControl> {
        &self.control
    }

    /// Blocks until some bytes may be read and returns how many.
    fn acquire(&mut self, wanted: usize) -> io::Result<usize> {
        let control = Arc::clone(&self.control);
        let mut state = control.lock_state();
        loop {
            if state.closed {
                return Err(io::Error::other(StreamClosed));
            }
            match state.limit {
                limit if limit < 0 => return Ok(wanted),
                0 => {
                    state = control
                        .changed
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                    // Start a fresh window once the pause is over.
                    self.window_start = Instant::now();
                    self.window_bytes = 0;
                }
                limit => {
                    let limit = limit as u64;
                    let elapsed = self.window_start.elapsed();
                    if elapsed >= WINDOW {
                        self.window_start = Instant::now();
                        self.window_bytes = 0;
                    }
                    if self.window_bytes < limit {
                        let budget = limit - self.window_bytes;
                        return Ok(wanted.min(usize::try_from(budget).unwrap_or(usize::MAX)));
                    }
                    let remaining = WINDOW.saturating_sub(elapsed);
                    let (guard, _) = control
                        .changed
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                }
            }
        }
    }
}

impl<R: Read> Read for RateLimitedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let allowed = self.acquire(buf.len())?;
        let n = self.inner.read(&mut buf[..allowed])?;
        self.window_bytes += n as u64;
        Ok(n)
    }
}

/// Reader that adds every successfully read byte to a counter.
pub struct CountingReader<R> {
    inner: R,
    counter: Arc<ByteCounter>,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R, counter: Arc<ByteCounter>) -> Self {
        CountingReader { inner, counter }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.add(n as u64);
        Ok(n)
    }
}
