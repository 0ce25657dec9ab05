//! Decision-maker capability for the retry protocol.
//!
//! When a copy attempt fails, the job hands a [`TransferFailure`] to an
//! [`ErrorHandler`] and acts on the returned [`RetryDecision`]. A GUI shows a
//! dialog; headless callers use [`FixedPolicy`] or [`ScriptedPolicy`].

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::FailureKind;
use crate::model::RetryDecision;

const OPEN_CHOICES: &[RetryDecision] = &[
    RetryDecision::Skip,
    RetryDecision::Retry,
    RetryDecision::Cancel,
];

const TRANSFER_CHOICES: &[RetryDecision] = &[
    RetryDecision::Skip,
    RetryDecision::Append,
    RetryDecision::Retry,
    RetryDecision::Cancel,
];

/// The choices offered for a failure of the given kind.
///
/// Append only makes sense once bytes may already sit at the destination, so
/// it is offered for mid-transfer failures only.
pub fn choices_for(kind: FailureKind) -> &'static [RetryDecision] {
    match kind {
        FailureKind::OpeningSource | FailureKind::OpeningDestination => OPEN_CHOICES,
        FailureKind::Transferring => TRANSFER_CHOICES,
    }
}

/// Everything a decision-maker needs to explain a failure to the user.
#[derive(Debug, Clone)]
pub struct TransferFailure {
    pub kind: FailureKind,
    /// Name of the source file
    pub file_name: String,
    /// Full source path
    pub path: String,
    /// Message of the underlying I/O error
    pub message: String,
    /// 1 for the first attempt, incremented on every retry
    pub attempt: u32,
    pub choices: &'static [RetryDecision],
}

impl TransferFailure {
    pub fn offers(&self, decision: RetryDecision) -> bool {
        self.choices.contains(&decision)
    }
}

/// Decides how the job proceeds after a failed copy attempt.
///
/// Called on the job's worker thread; the call may block (e.g. waiting for a
/// user to answer a prompt).
pub trait ErrorHandler: Send + Sync {
    fn decide(&self, failure: &TransferFailure) -> RetryDecision;
}

/// Always answers the same decision.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy(pub RetryDecision);

impl ErrorHandler for FixedPolicy {
    fn decide(&self, _failure: &TransferFailure) -> RetryDecision {
        self.0
    }
}

/// Answers from a queue of decisions, then falls back to a fixed one.
#[derive(Debug)]
pub struct ScriptedPolicy {
    script: Mutex<VecDeque<RetryDecision>>,
    fallback: RetryDecision,
    asked: Mutex<Vec<(FailureKind, String)>>,
}

impl ScriptedPolicy {
    pub fn new<I: IntoIterator<Item = RetryDecision>>(script: I, fallback: RetryDecision) -> Self {
        ScriptedPolicy {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Failures this policy was asked about, as (kind, file name).
    pub fn asked(&self) -> Vec<(FailureKind, String)> {
        self.asked
            .lock()
            .map(|asked| asked.clone())
            .unwrap_or_default()
    }
}

impl ErrorHandler for ScriptedPolicy {
    fn decide(&self, failure: &TransferFailure) -> RetryDecision {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push((failure.kind, failure.file_name.clone()));
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or(self.fallback)
    }
}

/// Retries up to `max_retries` times per file, then applies `then`.
#[derive(Debug, Clone, Copy)]
pub struct RetryLimit {
    pub max_retries: u32,
    pub then: RetryDecision,
}

impl ErrorHandler for RetryLimit {
    fn decide(&self, failure: &TransferFailure) -> RetryDecision {
        if failure.attempt <= self.max_retries {
            RetryDecision::Retry
        } else {
            self.then
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(kind: FailureKind, attempt: u32) -> TransferFailure {
        TransferFailure {
            kind,
            file_name: "a.bin".to_string(),
            path: "/src/a.bin".to_string(),
            message: "boom".to_string(),
            attempt,
            choices: choices_for(kind),
        }
    }

    #[test]
    fn test_append_only_offered_mid_transfer() {
        assert!(!failure(FailureKind::OpeningSource, 1).offers(RetryDecision::Append));
        assert!(!failure(FailureKind::OpeningDestination, 1).offers(RetryDecision::Append));
        assert!(failure(FailureKind::Transferring, 1).offers(RetryDecision::Append));
    }

    #[test]
    fn test_scripted_policy_then_fallback() {
        let policy = ScriptedPolicy::new([RetryDecision::Retry, RetryDecision::Append], RetryDecision::Skip);
        let f = failure(FailureKind::Transferring, 1);
        assert_eq!(policy.decide(&f), RetryDecision::Retry);
        assert_eq!(policy.decide(&f), RetryDecision::Append);
        assert_eq!(policy.decide(&f), RetryDecision::Skip);
        assert_eq!(policy.asked().len(), 3);
    }

    #[test]
    fn test_retry_limit() {
        let policy = RetryLimit {
            max_retries: 2,
            then: RetryDecision::Skip,
        };
        assert_eq!(policy.decide(&failure(FailureKind::Transferring, 1)), RetryDecision::Retry);
        assert_eq!(policy.decide(&failure(FailureKind::Transferring, 2)), RetryDecision::Retry);
        assert_eq!(policy.decide(&failure(FailureKind::Transferring, 3)), RetryDecision::Skip);
    }
}
