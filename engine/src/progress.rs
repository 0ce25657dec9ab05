//! Job observation.
//!
//! This module defines the JobObserver trait, the event sink a job is given at
//! construction. It decouples the engine from any specific UI technology (CLI,
//! GUI, etc.) and replaces global debug tracing with an injectable sink.
//!
//! Byte-level progress is not pushed through the observer: controllers poll
//! the job's counters and percentages instead.

use crossbeam_channel::Sender;
use uuid::Uuid;

use crate::decision::TransferFailure;
use crate::model::{FileReport, JobState, JobSummary, RetryDecision};

/// Receives lifecycle and per-file events from a transfer job.
///
/// `state_changed` may be called from the controlling thread (pause, resume,
/// stop); every other method is called on the job's worker thread. All
/// methods have empty defaults.
pub trait JobObserver: Send + Sync {
    /// Called when the worker starts processing the file set.
    fn job_started(&self, _id: Uuid, _total_files: usize) {}

    /// Called after every lifecycle transition.
    fn state_changed(&self, _id: Uuid, _state: JobState) {}

    /// Called when a file (top-level or nested) is about to be processed.
    fn file_started(&self, _id: Uuid, _name: &str, _size: i64) {}

    /// Called when a file is done (copied, skipped, or cancelled).
    fn file_completed(&self, _id: Uuid, _report: &FileReport) {}

    /// Called after the decision-maker answered a failed attempt.
    fn transfer_failed(&self, _id: Uuid, _failure: &TransferFailure, _decision: RetryDecision) {}

    /// Called once, when the worker terminates.
    fn job_finished(&self, _id: Uuid, _summary: &JobSummary) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl JobObserver for NoopObserver {}

/// Event forwarded by [`ChannelObserver`].
#[derive(Debug, Clone)]
pub enum JobEvent {
    Started { total_files: usize },
    StateChanged { state: JobState },
    FileStarted { name: String, size: i64 },
    FileCompleted { report: FileReport },
    TransferFailed { file_name: String, message: String, decision: RetryDecision },
    Finished { summary: JobSummary },
}

/// An observer that sends events to another thread (e.g. a UI) via a channel.
pub struct ChannelObserver {
    sender: Sender<JobEvent>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<JobEvent>) -> Self {
        ChannelObserver { sender }
    }

    fn send(&self, event: JobEvent) {
        // The receiver going away must not disturb the job.
        let _ = self.sender.send(event);
    }
}

impl JobObserver for ChannelObserver {
    fn job_started(&self, _id: Uuid, total_files: usize) {
        self.send(JobEvent::Started { total_files });
    }

    fn state_changed(&self, _id: Uuid, state: JobState) {
        self.send(JobEvent::StateChanged { state });
    }

    fn file_started(&self, _id: Uuid, name: &str, size: i64) {
        self.send(JobEvent::FileStarted {
            name: name.to_string(),
            size,
        });
    }

    fn file_completed(&self, _id: Uuid, report: &FileReport) {
        self.send(JobEvent::FileCompleted {
            report: report.clone(),
        });
    }

    fn transfer_failed(&self, _id: Uuid, failure: &TransferFailure, decision: RetryDecision) {
        self.send(JobEvent::TransferFailed {
            file_name: failure.file_name.clone(),
            message: failure.message.clone(),
            decision,
        });
    }

    fn job_finished(&self, _id: Uuid, summary: &JobSummary) {
        self.send(JobEvent::Finished {
            summary: summary.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_forwards_events() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let observer = ChannelObserver::new(tx);
        observer.job_started(Uuid::nil(), 3);
        observer.state_changed(Uuid::nil(), JobState::Paused);
        observer.file_started(Uuid::nil(), "a.txt", 12);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], JobEvent::Started { total_files: 3 }));
        assert!(matches!(events[1], JobEvent::StateChanged { state: JobState::Paused }));
        assert!(matches!(&events[2], JobEvent::FileStarted { name, size: 12 } if name == "a.txt"));
    }

    #[test]
    fn test_channel_observer_survives_dropped_receiver() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let observer = ChannelObserver::new(tx);
        observer.job_started(Uuid::nil(), 1);
    }
}
