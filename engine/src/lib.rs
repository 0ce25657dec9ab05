//! # Ferry Engine - Controllable File Transfer Library
//!
//! A headless engine that copies or moves a set of files into a destination
//! folder on a background worker thread, while a controlling thread pauses,
//! resumes, stops, throttles and polls it.
//!
//! ## Overview
//!
//! - Storage backends behind the [`StorageFile`] trait ([`LocalFile`] for the
//!   local filesystem)
//! - Byte counters and percentages readable at any time
//! - Pause and stop that take effect in the middle of a file
//! - A live throughput limit in bytes per second
//! - A retry protocol: each failed attempt is classified and an
//!   [`ErrorHandler`] decides to cancel, skip, retry or append
//! - Lifecycle and per-file events through a [`JobObserver`]
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{JobConfig, LocalFile, Mode, TransferJob};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let job = TransferJob::builder(
//!     vec![LocalFile::shared("/data/report.pdf")],
//!     LocalFile::shared("/backup"),
//! )
//! .config(JobConfig { mode: Mode::Copy, throughput_limit: 1_000_000, ..JobConfig::default() })
//! .build()?;
//!
//! job.start()?;
//! println!("{:.0}% done", job.total_percent_done() * 100.0);
//! let state = job.join()?;
//! println!("{}: {} bytes", state, job.total_bytes_processed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **backend**: storage abstraction and the local filesystem backend
//! - **config**: job configuration
//! - **counter**: composable byte counters
//! - **decision**: failure descriptions and error handlers
//! - **error**: engine and transfer error types
//! - **model**: states, policies, reports
//! - **progress**: job observers
//! - **stream**: throttled and counting readers
//! - **transfer**: the transfer job itself

pub mod backend;
pub mod config;
pub mod counter;
pub mod decision;
pub mod error;
mod job;
pub mod model;
pub mod progress;
pub mod stream;
pub mod transfer;

#[cfg(test)]
mod testutil;

pub use backend::{LocalFile, StorageFile, TransferHint};
pub use config::JobConfig;
pub use counter::ByteCounter;
pub use decision::{ErrorHandler, FixedPolicy, RetryLimit, ScriptedPolicy, TransferFailure};
pub use error::{EngineError, FailureKind, TransferError};
pub use model::{
    FailureRecord, FileReport, FileState, JobState, JobSummary, Mode, OverwritePolicy, RetryDecision,
};
pub use progress::{ChannelObserver, JobEvent, JobObserver, NoopObserver};
pub use stream::UNLIMITED;
pub use transfer::{TransferJob, TransferJobBuilder};
