//! Core data model for transfer jobs.
//!
//! This module defines the values a job exposes to its controller:
//! - JobState: the lifecycle of a job
//! - FileState, FileReport: the outcome of each processed file
//! - Mode, OverwritePolicy: enums controlling behavior
//! - RetryDecision: what the decision-maker answers after a failure
//! - JobSummary: a serializable digest of a finished job

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FailureKind;

/// The lifecycle state of a job.
///
/// `NotStarted -> Running <-> Paused -> (Finished | Interrupted)`.
/// `Interrupted` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Created, not yet started
    NotStarted,
    /// Worker is processing files
    Running,
    /// Worker is blocked until resumed or stopped
    Paused,
    /// Stopped by the controller or by a Cancel decision
    Interrupted,
    /// Every file of the set was processed
    Finished,
}

impl JobState {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Interrupted | JobState::Finished)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::NotStarted => write!(f, "not started"),
            JobState::Running => write!(f, "running"),
            JobState::Paused => write!(f, "paused"),
            JobState::Interrupted => write!(f, "interrupted"),
            JobState::Finished => write!(f, "finished"),
        }
    }
}

/// The operation mode for a transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Copy files; source remains unchanged
    Copy,
    /// Copy files, then delete each source once it was copied
    Move,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Copy => write!(f, "Copy"),
            Mode::Move => write!(f, "Move"),
        }
    }
}

/// Policy for handling files that already exist at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverwritePolicy {
    /// Don't overwrite; skip existing files
    Skip,
    /// Always overwrite existing files
    Overwrite,
    /// Append to the existing file, resuming from its current size
    Resume,
    /// Overwrite only when source and destination sizes differ
    SmartUpdate,
}

impl std::fmt::Display for OverwritePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverwritePolicy::Skip => write!(f, "Skip"),
            OverwritePolicy::Overwrite => write!(f, "Overwrite"),
            OverwritePolicy::Resume => write!(f, "Resume"),
            OverwritePolicy::SmartUpdate => write!(f, "SmartUpdate"),
        }
    }
}

/// Answer of the decision-maker after a failed copy attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetryDecision {
    /// Stop the whole job
    Cancel,
    /// Give up on this file, continue with the next one
    Skip,
    /// Start this file over from the beginning
    Retry,
    /// Try again, resuming from what is already at the destination
    Append,
}

impl std::fmt::Display for RetryDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryDecision::Cancel => write!(f, "cancel"),
            RetryDecision::Skip => write!(f, "skip"),
            RetryDecision::Retry => write!(f, "retry"),
            RetryDecision::Append => write!(f, "append"),
        }
    }
}

/// The outcome of an individual file within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileState {
    /// Successfully copied, moved, or directory created
    Done,
    /// Not copied: skipped by overwrite policy or by a Skip decision
    Skipped,
    /// Abandoned because the job was cancelled or stopped
    Cancelled,
}

/// A failure that was reported to the decision-maker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub message: String,
    pub os_error: Option<i32>,
}

/// What happened to one processed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    /// File name, as shown to the user
    pub name: String,

    /// Full source path
    pub path: String,

    /// True if the file was a member of the job's original file set
    pub top_level: bool,

    /// True if this entry is a directory
    pub is_dir: bool,

    /// Final state
    pub state: FileState,

    /// Bytes processed for this file
    pub bytes: u64,

    /// Number of copy attempts (0 for directories and policy skips)
    pub attempts: u32,

    /// Last failure reported for this file, if any
    pub failure: Option<FailureRecord>,

    /// Non-fatal problem, e.g. a source that could not be deleted after a move
    pub warning: Option<String>,
}

/// Digest of a job, suitable for display or JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub mode: Mode,
    pub state: JobState,
    pub total_files: usize,
    pub done: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub total_bytes: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobSummary {
    /// Builds counts from the per-file reports. Transferred folders are not
    /// counted, skipped or cancelled ones are.
    pub fn from_reports(
        id: Uuid,
        mode: Mode,
        state: JobState,
        total_files: usize,
        reports: &[FileReport],
        total_bytes: u64,
    ) -> Self {
        let mut summary = JobSummary {
            id,
            mode,
            state,
            total_files,
            done: 0,
            skipped: 0,
            cancelled: 0,
            total_bytes,
            started_at: None,
            finished_at: None,
        };
        // A folder counts only when it was not transferred: its contents were
        // never reached, so nothing else reports them.
        for report in reports
            .iter()
            .filter(|r| !r.is_dir || r.state != FileState::Done)
        {
            match report.state {
                FileState::Done => summary.done += 1,
                FileState::Skipped => summary.skipped += 1,
                FileState::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    /// True if every file was transferred and the job was not interrupted.
    pub fn is_clean(&self) -> bool {
        self.state == JobState::Finished && self.skipped == 0 && self.cancelled == 0
    }
}
