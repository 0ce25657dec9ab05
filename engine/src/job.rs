//! Job lifecycle and per-file accounting.
//!
//! This module provides the pieces every long-running file job shares:
//! - `Lifecycle`: the `NotStarted -> Running <-> Paused -> Finished | Interrupted`
//!   state machine, with waits for the worker (paused) and the controller
//!   (terminated)
//! - `FileProgress`: the file set position and the byte counters, advanced by
//!   `next_file` and read by the controller to compute percentages

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::backend::StorageFile;
use crate::counter::ByteCounter;
use crate::model::JobState;

/// The job state machine.
///
/// Transitions return `true` when they happened; requests that are not valid
/// in the current state are no-ops returning `false`.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<JobState>,
    changed: Condvar,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Lifecycle {
            state: Mutex::new(JobState::NotStarted),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> JobState {
        *self.lock()
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.state() == JobState::Interrupted
    }

    pub(crate) fn start(&self) -> bool {
        self.transition(|s| (s == JobState::NotStarted).then_some(JobState::Running))
    }

    pub(crate) fn pause(&self) -> bool {
        self.transition(|s| (s == JobState::Running).then_some(JobState::Paused))
    }

    pub(crate) fn resume(&self) -> bool {
        self.transition(|s| (s == JobState::Paused).then_some(JobState::Running))
    }

    pub(crate) fn stop(&self) -> bool {
        self.transition(|s| (!s.is_terminal()).then_some(JobState::Interrupted))
    }

    /// Marks the file set exhausted. A job that was stopped stays Interrupted.
    pub(crate) fn finish(&self) -> JobState {
        self.transition(|s| {
            matches!(s, JobState::Running | JobState::Paused).then_some(JobState::Finished)
        });
        self.state()
    }

    /// Blocks the worker while the job is paused. Returns the state that
    /// ended the wait.
    pub(crate) fn wait_while_paused(&self) -> JobState {
        let guard = self.lock();
        let guard = self
            .changed
            .wait_while(guard, |s| *s == JobState::Paused)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// Blocks until the job reaches a terminal state or `timeout` elapses.
    pub(crate) fn wait_terminal(&self, timeout: Option<Duration>) -> JobState {
        let mut guard = self.lock();
        let deadline = timeout.map(|t| Instant::now() + t);
        while !guard.is_terminal() {
            match deadline {
                None => {
                    guard = self
                        .changed
                        .wait(guard)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let (g, _) = self
                        .changed
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    guard = g;
                }
            }
        }
        *guard
    }

    fn transition<F>(&self, next: F) -> bool
    where
        F: FnOnce(JobState) -> Option<JobState>,
    {
        let mut state = self.lock();
        match next(*state) {
            Some(new_state) => {
                *state = new_state;
                self.changed.notify_all();
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The file currently being processed.
#[derive(Debug, Clone)]
pub(crate) struct CurrentFile {
    pub(crate) name: String,
    pub(crate) size: i64,
    pub(crate) is_dir: bool,
    /// Member of the job's original file set
    pub(crate) top_level: bool,
    /// Cleared once the file's processing concluded
    pub(crate) in_progress: bool,
}

/// Position in the file set plus the byte counters.
///
/// `total_bytes` has `current_file_bytes` as its child, so it always reports
/// the bytes of completed files plus those of the file in flight.
#[derive(Debug)]
pub(crate) struct FileProgress {
    total_files: usize,
    files_done: AtomicUsize,
    current_file_bytes: Arc<ByteCounter>,
    total_bytes: ByteCounter,
    current: Mutex<Option<CurrentFile>>,
}

impl FileProgress {
    pub(crate) fn new(total_files: usize) -> Self {
        let current_file_bytes = Arc::new(ByteCounter::new());
        FileProgress {
            total_files,
            files_done: AtomicUsize::new(0),
            total_bytes: ByteCounter::with_child(Arc::clone(&current_file_bytes)),
            current_file_bytes,
            current: Mutex::new(None),
        }
    }

    pub(crate) fn current_file_bytes(&self) -> &Arc<ByteCounter> {
        &self.current_file_bytes
    }

    pub(crate) fn total_bytes(&self) -> &ByteCounter {
        &self.total_bytes
    }

    pub(crate) fn total_files(&self) -> usize {
        self.total_files
    }

    pub(crate) fn files_done(&self) -> usize {
        self.files_done.load(Ordering::Relaxed)
    }

    /// Folds the current file's bytes into the total, resets the current file
    /// counter and makes `file` the current file. Returns the file's size.
    ///
    /// The fold happens under the `current` lock, so readers going through
    /// [`FileProgress::total_bytes_processed`] never see the total drop.
    pub(crate) fn next_file(&self, file: &dyn StorageFile, top_level: bool) -> i64 {
        let size = file.size();
        let next = CurrentFile {
            name: file.name(),
            size,
            is_dir: file.is_dir(),
            top_level,
            in_progress: true,
        };

        let mut current = self.lock_current();
        let carried = self.current_file_bytes.take();
        self.total_bytes.add(carried);
        *current = Some(next);
        size
    }

    /// Marks the current file concluded; a top-level file also counts as a
    /// completed member of the set.
    pub(crate) fn file_concluded(&self, top_level: bool) {
        let mut current = self.lock_current();
        if top_level {
            self.files_done.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(current) = current.as_mut() {
            current.in_progress = false;
        }
    }

    /// Bytes of completed files plus those of the file in flight.
    pub(crate) fn total_bytes_processed(&self) -> u64 {
        let _current = self.lock_current();
        self.total_bytes.count()
    }

    pub(crate) fn current(&self) -> Option<CurrentFile> {
        self.lock_current().clone()
    }

    /// Fraction of the current file processed, 0 when its size is unknown.
    pub(crate) fn file_percent_done(&self) -> f64 {
        let size = self.lock_current().as_ref().map(|c| c.size).unwrap_or(-1);
        if size <= 0 {
            return 0.0;
        }
        (self.current_file_bytes.count() as f64 / size as f64).min(1.0)
    }

    /// Fraction of the whole set processed.
    pub(crate) fn total_percent_done(&self, state: JobState) -> f64 {
        if self.total_files == 0 {
            return if state == JobState::Finished { 1.0 } else { 0.0 };
        }
        let current = self.lock_current();
        let mut processed = self.files_done() as f64;
        if let Some(current) = current.as_ref() {
            if current.top_level && !current.is_dir && current.in_progress && current.size > 0 {
                let fraction = self.current_file_bytes.count() as f64 / current.size as f64;
                processed += fraction.min(1.0);
            }
        }
        (processed / self.total_files as f64).min(1.0)
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<CurrentFile>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
