//! Error types for backend calls and submission

use std::fmt;
use std::time::Duration;

use crate::classify::CandidateRejection;

/// Failure of a single backend call.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// Why one candidate did not accept the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    pub candidate: String,
    pub rejection: CandidateRejection,
    pub detail: String,
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {}",
            self.candidate,
            self.rejection.label(),
            self.detail
        )
    }
}

/// Errors from `JobSubmitter::submit`. None of them consume the subject's cooldown.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("authentication failed: {0}")]
    Auth(#[from] vertex_auth::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("all {attempts} backend candidates rejected the job, last: {last}")]
    Exhausted {
        attempts: usize,
        last: CandidateFailure,
    },
}

/// A status fetch that produced no usable status. Retried by the poller and
/// never surfaced past it.
#[derive(Debug, thiserror::Error)]
pub(crate) enum PollTransientError {
    #[error("token unavailable: {0}")]
    Auth(#[from] vertex_auth::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),
}
