//! Transfer jobs: copy or move a file set to a destination folder.
//!
//! A `TransferJob` runs on its own worker thread. The controlling thread only
//! signals (`pause`, `resume`, `stop`, `set_throughput_limit`) and polls
//! progress; it never touches the worker's iteration.
//!
//! Each file is copied by `copy_file`, one attempt at a time. A failed attempt
//! is classified (`FailureKind`) and handed to the job's `ErrorHandler`, which
//! decides whether to cancel the job, skip the file, retry it, or append to
//! what already reached the destination.
//!
//! Pausing does not suspend the worker directly: the active stream's
//! throughput limit is set to zero, so the worker blocks inside its next read.
//! Stopping closes that stream, which wakes the read with an error that is then
//! recognised as a cancellation rather than a failure.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{StorageFile, TransferHint};
use crate::config::JobConfig;
use crate::counter::ByteCounter;
use crate::decision::{choices_for, ErrorHandler, FixedPolicy, TransferFailure};
use crate::error::{EngineError, TransferError};
use crate::job::{FileProgress, Lifecycle};
use crate::model::{
    FailureRecord, FileReport, FileState, JobState, JobSummary, Mode, OverwritePolicy,
    RetryDecision,
};
use crate::progress::{JobObserver, NoopObserver};
use crate::stream::{CountingReader, RateLimitedReader, ThroughputControl};

/// Builds a [`TransferJob`].
pub struct TransferJobBuilder {
    files: Vec<Arc<dyn StorageFile>>,
    destination: Arc<dyn StorageFile>,
    config: JobConfig,
    handler: Arc<dyn ErrorHandler>,
    observer: Arc<dyn JobObserver>,
}

impl TransferJobBuilder {
    pub fn config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    /// Decision-maker consulted after failed attempts. Defaults to always
    /// skipping the failed file.
    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Validates the configuration and creates the job in `NotStarted` state.
    pub fn build(self) -> Result<TransferJob, EngineError> {
        self.config.validate()?;
        if self.destination.exists() && !self.destination.is_dir() {
            return Err(EngineError::DestinationNotADirectory {
                path: self.destination.path(),
            });
        }

        let id = Uuid::new_v4();
        let total_files = self.files.len();
        let throughput_limit = self.config.throughput_limit;
        Ok(TransferJob {
            shared: Arc::new(Shared {
                id,
                config: self.config,
                files: self.files,
                destination: self.destination,
                lifecycle: Lifecycle::new(),
                progress: FileProgress::new(total_files),
                throughput_limit: AtomicI64::new(throughput_limit),
                active_stream: Mutex::new(None),
                handler: self.handler,
                observer: self.observer,
                reports: Mutex::new(Vec::new()),
                started_at: Mutex::new(None),
                finished_at: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        })
    }
}

/// A copy or move of a fixed file set into a destination folder.
///
/// Dropping the handle does not stop a running job; call [`TransferJob::stop`]
/// first if that is wanted.
pub struct TransferJob {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TransferJob {
    /// Starts building a job copying `files` into the folder `destination`.
    pub fn builder(
        files: Vec<Arc<dyn StorageFile>>,
        destination: Arc<dyn StorageFile>,
    ) -> TransferJobBuilder {
        TransferJobBuilder {
            files,
            destination,
            config: JobConfig::default(),
            handler: Arc::new(FixedPolicy(RetryDecision::Skip)),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn mode(&self) -> Mode {
        self.shared.config.mode
    }

    pub fn state(&self) -> JobState {
        self.shared.lifecycle.state()
    }

    /// Spawns the worker thread.
    ///
    /// # Errors
    /// `AlreadyStarted` if the job left `NotStarted`, `WorkerSpawn` if the
    /// thread could not be created (the job is then Interrupted).
    pub fn start(&self) -> Result<(), EngineError> {
        let shared = &self.shared;
        if !shared.lifecycle.start() {
            return Err(EngineError::AlreadyStarted { id: shared.id });
        }
        info!(job = %shared.id, files = shared.files.len(), mode = %shared.config.mode, "starting job");
        shared.observer.state_changed(shared.id, JobState::Running);

        let worker_shared = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name(format!("transfer-{}", shared.id.simple()))
            .spawn(move || worker_shared.run())
            .map_err(|source| {
                shared.lifecycle.stop();
                shared.observer.state_changed(shared.id, JobState::Interrupted);
                EngineError::WorkerSpawn { source }
            })?;
        *lock(&self.worker) = Some(handle);
        Ok(())
    }

    /// Pauses a running job. Returns false (and does nothing) unless Running.
    pub fn pause(&self) -> bool {
        self.shared.pause()
    }

    /// Resumes a paused job. Returns false (and does nothing) unless Paused.
    pub fn resume(&self) -> bool {
        self.shared.resume()
    }

    /// Interrupts the job, unblocking any paused or throttled read. Returns
    /// false if the job had already terminated.
    pub fn stop(&self) -> bool {
        self.shared.stop()
    }

    /// Waits for the worker to terminate and returns the final state.
    ///
    /// A job that was never started is returned as is.
    pub fn join(&self) -> Result<JobState, EngineError> {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| EngineError::WorkerPanicked)?;
        }
        Ok(self.state())
    }

    /// Waits up to `timeout` for the job to terminate; returns the state then.
    pub fn wait_timeout(&self, timeout: Duration) -> JobState {
        self.shared.lifecycle.wait_terminal(Some(timeout))
    }

    /// Sets the throughput limit in bytes/second, `-1` for unlimited. Applies
    /// to the file in flight from its next read, unless the job is paused.
    pub fn set_throughput_limit(&self, bytes_per_second: i64) {
        self.shared.set_throughput_limit(bytes_per_second);
    }

    pub fn throughput_limit(&self) -> i64 {
        self.shared.throughput_limit.load(Ordering::SeqCst)
    }

    pub fn total_files(&self) -> usize {
        self.shared.progress.total_files()
    }

    pub fn total_bytes_processed(&self) -> u64 {
        self.shared.progress.total_bytes_processed()
    }

    pub fn current_file_bytes_processed(&self) -> u64 {
        self.shared.progress.current_file_bytes().count()
    }

    /// The raw total counter. Unlike [`TransferJob::total_bytes_processed`]
    /// it may dip for a moment while the worker moves to the next file.
    pub fn total_byte_counter(&self) -> &ByteCounter {
        self.shared.progress.total_bytes()
    }

    pub fn current_file_byte_counter(&self) -> &ByteCounter {
        self.shared.progress.current_file_bytes()
    }

    /// Fraction in [0, 1] of the current file processed; 0 if its size is
    /// unknown.
    pub fn file_percent_done(&self) -> f64 {
        self.shared.progress.file_percent_done()
    }

    /// Fraction in [0, 1] of the file set processed.
    pub fn total_percent_done(&self) -> f64 {
        self.shared.progress.total_percent_done(self.state())
    }

    pub fn current_file_name(&self) -> Option<String> {
        self.shared.progress.current().map(|c| c.name)
    }

    /// Reports of every file processed so far, in processing order.
    pub fn reports(&self) -> Vec<FileReport> {
        lock(&self.shared.reports).clone()
    }

    pub fn summary(&self) -> JobSummary {
        self.shared.summary()
    }
}

/// State shared between the controller handle and the worker thread.
struct Shared {
    id: Uuid,
    config: JobConfig,
    files: Vec<Arc<dyn StorageFile>>,
    destination: Arc<dyn StorageFile>,
    lifecycle: Lifecycle,
    progress: FileProgress,
    throughput_limit: AtomicI64,
    // Guards registration of the stream as well as limit changes on it.
    active_stream: Mutex<Option<Arc<ThroughputControl>>>,
    handler: Arc<dyn ErrorHandler>,
    observer: Arc<dyn JobObserver>,
    reports: Mutex<Vec<FileReport>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

/// How the retry protocol concluded for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Copied,
    Skipped,
    Cancelled,
}

struct Attempted {
    resolution: Resolution,
    attempts: u32,
    failure: Option<FailureRecord>,
}

/// Unregisters the active stream when an attempt ends, on every path.
struct ActiveStreamGuard<'a> {
    shared: &'a Shared,
    control: Arc<ThroughputControl>,
}

impl Drop for ActiveStreamGuard<'_> {
    fn drop(&mut self) {
        let mut active = lock(&self.shared.active_stream);
        if active
            .as_ref()
            .map(|current| Arc::ptr_eq(current, &self.control))
            .unwrap_or(false)
        {
            *active = None;
        }
    }
}

impl Shared {
    // ---- controller side ----

    fn pause(&self) -> bool {
        if !self.lifecycle.pause() {
            return false;
        }
        if let Some(stream) = lock(&self.active_stream).as_ref() {
            stream.set_limit(0);
        }
        info!(job = %self.id, "job paused");
        self.observer.state_changed(self.id, JobState::Paused);
        true
    }

    fn resume(&self) -> bool {
        if !self.lifecycle.resume() {
            return false;
        }
        if let Some(stream) = lock(&self.active_stream).as_ref() {
            stream.set_limit(self.throughput_limit.load(Ordering::SeqCst));
        }
        info!(job = %self.id, "job resumed");
        self.observer.state_changed(self.id, JobState::Running);
        true
    }

    fn stop(&self) -> bool {
        if !self.lifecycle.stop() {
            return false;
        }
        if let Some(stream) = lock(&self.active_stream).as_ref() {
            debug!(job = %self.id, "closing current stream");
            stream.close();
        }
        info!(job = %self.id, "job stopped");
        self.observer.state_changed(self.id, JobState::Interrupted);
        true
    }

    fn set_throughput_limit(&self, bytes_per_second: i64) {
        let limit = bytes_per_second.max(-1);
        self.throughput_limit.store(limit, Ordering::SeqCst);
        let active = lock(&self.active_stream);
        if let Some(stream) = active.as_ref() {
            if self.lifecycle.state() != JobState::Paused {
                stream.set_limit(limit);
            }
        }
        debug!(job = %self.id, limit, "throughput limit changed");
    }

    fn summary(&self) -> JobSummary {
        let reports = lock(&self.reports);
        let mut summary = JobSummary::from_reports(
            self.id,
            self.config.mode,
            self.lifecycle.state(),
            self.files.len(),
            &reports,
            self.progress.total_bytes_processed(),
        );
        summary.started_at = *lock(&self.started_at);
        summary.finished_at = *lock(&self.finished_at);
        summary
    }

    // ---- worker side ----

    fn run(&self) {
        let span = tracing::info_span!("transfer_job", job = %self.id);
        let _entered = span.enter();

        *lock(&self.started_at) = Some(Utc::now());
        self.observer.job_started(self.id, self.files.len());

        if !self.destination.exists() {
            if let Err(e) = self.destination.mkdir() {
                warn!(path = %self.destination.path(), error = %e, "cannot create destination folder");
            }
        }

        for file in &self.files {
            if self.lifecycle.wait_while_paused() == JobState::Interrupted {
                break;
            }
            self.process(file.as_ref(), self.destination.as_ref(), true);
        }

        let state = self.lifecycle.finish();
        *lock(&self.finished_at) = Some(Utc::now());
        if state == JobState::Finished {
            self.observer.state_changed(self.id, state);
        }
        let summary = self.summary();
        info!(
            state = %state,
            done = summary.done,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            bytes = summary.total_bytes,
            "job terminated"
        );
        self.observer.job_finished(self.id, &summary);
    }

    /// Processes one file or directory. Returns true if it was fully transferred.
    fn process(&self, file: &dyn StorageFile, dest_folder: &dyn StorageFile, top_level: bool) -> bool {
        let size = self.progress.next_file(file, top_level);
        let name = file.name();
        debug!(file = %name, size, top_level, "processing file");
        self.observer.file_started(self.id, &name, size);

        let done = if file.is_dir() {
            self.process_directory(file, dest_folder, top_level)
        } else {
            self.process_file(file, dest_folder, top_level)
        };
        self.progress.file_concluded(top_level);
        done
    }

    fn process_file(&self, file: &dyn StorageFile, dest_folder: &dyn StorageFile, top_level: bool) -> bool {
        let name = file.name();
        let mut dest: Option<Arc<dyn StorageFile>> = None;
        let mut append = false;

        // Resolve the destination and apply the overwrite policy before any byte moves.
        let resolved = self.attempt_with_retry(file, false, |_| {
            let child = dest_folder
                .child(&name)
                .map_err(TransferError::opening_destination)?;
            if file.encloses(child.as_ref()) {
                return Err(TransferError::opening_destination(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "source and destination are the same file",
                )));
            }
            dest = Some(child);
            Ok(())
        });
        let dest = match (resolved.resolution, dest) {
            (Resolution::Copied, Some(dest)) => dest,
            (resolution, _) => {
                self.record(file, top_level, resolution.into(), resolved.attempts, resolved.failure, None);
                return false;
            }
        };

        if dest.exists() {
            match self.config.overwrite_policy {
                OverwritePolicy::Skip => {
                    debug!(file = %name, "destination exists, skipping");
                    self.record(file, top_level, FileState::Skipped, 0, None, None);
                    return false;
                }
                OverwritePolicy::Overwrite => {}
                OverwritePolicy::Resume => append = true,
                OverwritePolicy::SmartUpdate => {
                    if dest.size() == file.size() {
                        debug!(file = %name, "destination has the same size, skipping");
                        self.record(file, top_level, FileState::Skipped, 0, None, None);
                        return false;
                    }
                }
            }
        }

        let attempted = self.try_copy_file(file, dest.as_ref(), append);
        let mut warning = None;
        if attempted.resolution == Resolution::Copied && self.config.mode == Mode::Move {
            if let Err(e) = file.delete() {
                warn!(file = %name, error = %e, "cannot delete source after move");
                warning = Some(format!("source not deleted: {}", e));
            }
        }
        self.record(
            file,
            top_level,
            attempted.resolution.into(),
            attempted.attempts,
            attempted.failure,
            warning,
        );
        attempted.resolution == Resolution::Copied
    }

    fn process_directory(&self, dir: &dyn StorageFile, dest_folder: &dyn StorageFile, top_level: bool) -> bool {
        let name = dir.name();
        let mut dest: Option<Arc<dyn StorageFile>> = None;
        let created = self.attempt_with_retry(dir, false, |_| {
            let child = dest_folder
                .child(&name)
                .map_err(TransferError::opening_destination)?;
            if dir.encloses(child.as_ref()) {
                return Err(TransferError::opening_destination(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "cannot copy a folder into itself",
                )));
            }
            child.mkdir().map_err(TransferError::opening_destination)?;
            dest = Some(child);
            Ok(())
        });
        let dest = match (created.resolution, dest) {
            (Resolution::Copied, Some(dest)) => dest,
            (resolution, _) => {
                self.record_dir(dir, top_level, resolution.into(), created.failure, None);
                return false;
            }
        };

        let mut children = Vec::new();
        let listed = self.attempt_with_retry(dir, false, |_| {
            children = dir.children().map_err(TransferError::opening_source)?;
            Ok(())
        });
        if listed.resolution != Resolution::Copied {
            self.record_dir(dir, top_level, listed.resolution.into(), listed.failure, None);
            return false;
        }

        let mut all_done = true;
        for child in &children {
            if self.lifecycle.wait_while_paused() == JobState::Interrupted {
                self.record_dir(dir, top_level, FileState::Cancelled, None, None);
                return false;
            }
            all_done &= self.process(child.as_ref(), dest.as_ref(), false);
        }

        let mut warning = None;
        if all_done && self.config.mode == Mode::Move {
            if let Err(e) = dir.delete() {
                warn!(dir = %name, error = %e, "cannot delete source folder after move");
                warning = Some(format!("source not deleted: {}", e));
            }
        }
        let state = if all_done {
            FileState::Done
        } else if self.lifecycle.is_interrupted() {
            FileState::Cancelled
        } else {
            // Contents were partly skipped; the folder itself was created.
            FileState::Done
        };
        self.record_dir(dir, top_level, state, None, warning);
        all_done
    }

    /// Copies `source` to `dest`, consulting the error handler after every
    /// failed attempt until the file is copied, skipped or the job cancelled.
    fn try_copy_file(&self, source: &dyn StorageFile, dest: &dyn StorageFile, append: bool) -> Attempted {
        self.attempt_with_retry(source, append, |append| self.copy_file(source, dest, append))
    }

    /// The retry protocol around a fallible operation. `op` receives the
    /// append flag for each attempt, starting with `append`.
    fn attempt_with_retry<F>(&self, file: &dyn StorageFile, append: bool, mut op: F) -> Attempted
    where
        F: FnMut(bool) -> Result<(), TransferError>,
    {
        let file_name = file.name();
        let mut append = append;
        let mut attempts = 0;
        let mut last_failure = None;
        loop {
            attempts += 1;
            let err = match op(append) {
                Ok(()) => {
                    return Attempted {
                        resolution: Resolution::Copied,
                        attempts,
                        failure: last_failure,
                    }
                }
                Err(err) => err,
            };

            // A stop racing with the failure is a cancellation, not an error.
            if self.lifecycle.is_interrupted() {
                debug!(file = %file_name, error = %err, "attempt ended by job stop");
                return Attempted {
                    resolution: Resolution::Cancelled,
                    attempts,
                    failure: None,
                };
            }

            warn!(file = %file_name, kind = ?err.kind, error = %err.source, attempt = attempts, "copy attempt failed");
            let failure = TransferFailure {
                kind: err.kind,
                file_name: file_name.clone(),
                path: file.path(),
                message: err.source.to_string(),
                attempt: attempts,
                choices: choices_for(err.kind),
            };
            let mut decision = self.handler.decide(&failure);
            if !failure.offers(decision) {
                debug!(decision = %decision, kind = ?err.kind, "choice not offered for this failure, retrying instead");
                decision = RetryDecision::Retry;
            }
            self.observer.transfer_failed(self.id, &failure, decision);
            last_failure = Some(FailureRecord {
                kind: err.kind,
                message: failure.message,
                os_error: err.raw_os_error(),
            });

            if self.lifecycle.is_interrupted() {
                return Attempted {
                    resolution: Resolution::Cancelled,
                    attempts,
                    failure: last_failure,
                };
            }
            match decision {
                RetryDecision::Cancel => {
                    info!(file = %file_name, "job cancelled after failure");
                    self.stop();
                    return Attempted {
                        resolution: Resolution::Cancelled,
                        attempts,
                        failure: last_failure,
                    };
                }
                RetryDecision::Skip => {
                    return Attempted {
                        resolution: Resolution::Skipped,
                        attempts,
                        failure: last_failure,
                    };
                }
                RetryDecision::Retry | RetryDecision::Append => {
                    self.progress.current_file_bytes().reset();
                    append = decision == RetryDecision::Append;
                }
            }
        }
    }

    /// A single copy attempt.
    fn copy_file(&self, source: &dyn StorageFile, dest: &dyn StorageFile, append: bool) -> Result<(), TransferError> {
        let counter = self.progress.current_file_bytes();

        let direct = match source.transfer_hint(dest) {
            TransferHint::DirectCopyRequired => true,
            TransferHint::DirectCopySupported => {
                self.config.prefer_direct_copy
                    && !append
                    && self.throughput_limit.load(Ordering::SeqCst) < 0
            }
            TransferHint::StreamOnly => false,
        };
        if direct {
            debug!(source = %source.path(), dest = %dest.path(), "using native copy");
            source.copy_to(dest).map_err(TransferError::transferring)?;
            counter.reset();
            counter.add(u64::try_from(source.size()).unwrap_or(0));
            return Ok(());
        }

        let dest_size = dest.size();
        let offset = if append && dest_size >= 0 { dest_size as u64 } else { 0 };
        let raw = source
            .open_read(offset)
            .map_err(TransferError::opening_source)?;
        if offset > 0 {
            debug!(source = %source.path(), offset, "resuming transfer");
            counter.add(offset);
        }

        let control = self.register_stream();
        let _guard = ActiveStreamGuard {
            shared: self,
            control: Arc::clone(&control),
        };
        let mut reader = RateLimitedReader::new(CountingReader::new(raw, Arc::clone(counter)), control);
        let mut writer = dest
            .open_write(offset > 0)
            .map_err(TransferError::opening_destination)?;

        self.copy_stream(&mut reader, &mut writer)
            .and_then(|_| writer.flush())
            .map_err(TransferError::transferring)
    }

    fn copy_stream(&self, reader: &mut dyn Read, writer: &mut dyn Write) -> io::Result<u64> {
        let mut buf = vec![0u8; self.config.buffer_size];
        let mut copied = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => return Ok(copied),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            writer.write_all(&buf[..n])?;
            copied += n as u64;
        }
    }

    /// Creates the throughput control for a new stream and makes it the
    /// active one, honouring a pause or stop that is already in effect.
    fn register_stream(&self) -> Arc<ThroughputControl> {
        let mut active = lock(&self.active_stream);
        let state = self.lifecycle.state();
        let limit = if state == JobState::Paused {
            0
        } else {
            self.throughput_limit.load(Ordering::SeqCst)
        };
        let control = ThroughputControl::new(limit);
        if state == JobState::Interrupted {
            control.close();
        }
        *active = Some(Arc::clone(&control));
        control
    }

    fn record(
        &self,
        file: &dyn StorageFile,
        top_level: bool,
        state: FileState,
        attempts: u32,
        failure: Option<FailureRecord>,
        warning: Option<String>,
    ) {
        let report = FileReport {
            name: file.name(),
            path: file.path(),
            top_level,
            is_dir: false,
            state,
            bytes: self.progress.current_file_bytes().count(),
            attempts,
            failure,
            warning,
        };
        self.push_report(report);
    }

    fn record_dir(
        &self,
        dir: &dyn StorageFile,
        top_level: bool,
        state: FileState,
        failure: Option<FailureRecord>,
        warning: Option<String>,
    ) {
        let report = FileReport {
            name: dir.name(),
            path: dir.path(),
            top_level,
            is_dir: true,
            state,
            bytes: 0,
            attempts: 0,
            failure,
            warning,
        };
        self.push_report(report);
    }

    fn push_report(&self, report: FileReport) {
        debug!(file = %report.name, state = ?report.state, bytes = report.bytes, "file concluded");
        self.observer.file_completed(self.id, &report);
        lock(&self.reports).push(report);
    }
}

impl From<Resolution> for FileState {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Copied => FileState::Done,
            Resolution::Skipped => FileState::Skipped,
            Resolution::Cancelled => FileState::Cancelled,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
