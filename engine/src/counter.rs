//! Composable byte counters.
//!
//! A `ByteCounter` holds its own running count and may be linked to a child
//! counter whose total is added on every read. A job uses this to keep a
//! "total" counter that always reflects the completed files plus the file
//! currently in flight, without re-summing anything.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A running count of bytes, optionally summed with a child counter.
///
/// The child link is a shared accounting handle, not ownership: resetting
/// this counter never touches the child, and the child's value is read
/// dynamically each time [`ByteCounter::count`] is called.
///
/// All operations are atomic, so a controller thread may read the count
/// while the worker thread adds to it.
pub struct ByteCounter {
    count: AtomicU64,
    child: Option<Arc<ByteCounter>>,
}

impl ByteCounter {
    /// Creates a counter starting at zero with no child.
    pub fn new() -> Self {
        ByteCounter {
            count: AtomicU64::new(0),
            child: None,
        }
    }

    /// Creates a counter whose reported total includes `child`'s count.
    pub fn with_child(child: Arc<ByteCounter>) -> Self {
        ByteCounter {
            count: AtomicU64::new(0),
            child: Some(child),
        }
    }

    /// Adds `n` bytes to this counter's own count.
    pub fn add(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    /// Zeroes this counter's own count. The child, if any, is left untouched.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }

    /// Zeroes this counter's own count and returns the value it held.
    pub fn take(&self) -> u64 {
        self.count.swap(0, Ordering::Relaxed)
    }

    /// Own count plus the child's current total.
    pub fn count(&self) -> u64 {
        let own = self.count.load(Ordering::Relaxed);
        match &self.child {
            Some(child) => own.saturating_add(child.count()),
            None => own,
        }
    }

    /// This counter's own contribution, excluding the child.
    pub fn own_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn child(&self) -> Option<&Arc<ByteCounter>> {
        self.child.as_ref()
    }
}

impl Default for ByteCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ByteCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteCounter")
            .field("own", &self.own_count())
            .field("total", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_sums_all_increments() {
        let counter = ByteCounter::new();
        for n in [0, 1, 512, 4096, 7] {
            counter.add(n);
        }
        assert_eq!(counter.count(), 4616);
    }

    #[test]
    fn test_reset_leaves_child_untouched() {
        let child = Arc::new(ByteCounter::new());
        let parent = ByteCounter::with_child(Arc::clone(&child));

        parent.add(100);
        child.add(25);
        assert_eq!(parent.count(), 125);

        parent.reset();
        assert_eq!(parent.own_count(), 0);
        assert_eq!(parent.count(), 25);
        assert_eq!(child.count(), 25);
    }

    #[test]
    fn test_child_is_read_dynamically() {
        let child = Arc::new(ByteCounter::new());
        let parent = ByteCounter::with_child(Arc::clone(&child));
        assert_eq!(parent.count(), 0);

        child.add(10);
        assert_eq!(parent.count(), 10);
        child.reset();
        assert_eq!(parent.count(), 0);
    }

    #[test]
    fn test_take_moves_count_out() {
        let counter = ByteCounter::new();
        counter.add(40);
        assert_eq!(counter.take(), 40);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn test_concurrent_adds() {
        let counter = ByteCounter::new();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..1000 {
                        counter.add(3);
                    }
                });
            }
        });
        assert_eq!(counter.count(), 24_000);
    }
}
