//! Job submission, polling and progress reporting for Veo video generation
//!
//! A request flows through three stages:
//! 1. `JobSubmitter` tries each backend candidate in order until one accepts
//!    the job and returns a `JobHandle`
//! 2. `JobPoller` polls the handle until the operation is done, the wall-clock
//!    budget runs out, or too many consecutive status fetches fail
//! 3. `ProgressReporter` runs alongside the poller and emits throttled
//!    `ProgressEvent`s to a caller-supplied sink
//!
//! The HTTP backend sits behind the `Backend` trait; bearer tokens come from
//! `vertex_auth::CredentialProvider`.

pub mod backend;
pub mod classify;
pub mod error;
pub mod poller;
pub mod progress;
pub mod request;
pub mod submitter;
pub mod wire;
pub mod worker;

#[cfg(test)]
mod testing;

pub use backend::{Backend, VertexBackend, DEFAULT_ENDPOINT_TEMPLATE};
pub use classify::{CandidateRejection, classify_error, classify_status};
pub use error::{BackendError, CandidateFailure, SubmissionError};
pub use poller::{JobPoller, PollConfig, PollOutcome};
pub use progress::{ProgressConfig, ProgressEvent, ProgressReporter, ProgressSink};
pub use request::{
    Artifact, AspectRatio, DEFAULT_CANDIDATES, DEFAULT_DURATION_SECS, JobHandle, JobRequest,
    JobStatus, Resolution,
};
pub use submitter::JobSubmitter;
pub use worker::WorkerPool;
