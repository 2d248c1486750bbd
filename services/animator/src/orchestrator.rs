//! Per-request orchestration
//!
//! One `handle` call carries a request from admission to a terminal outcome:
//!
//! 1. `touch` the subject and evaluate admission
//! 2. submit across the backend candidates
//! 3. poll on the worker pool while the progress reporter runs alongside
//! 4. stop the reporter and wait for it, so every progress event precedes
//!    the outcome
//! 5. record usage on delivery, release the subject otherwise

use std::sync::Arc;
use std::time::Duration;

use admission::{Admission, AdmissionController, SubjectProfile};
use common::Clock;
use generation::{
    Artifact, JobPoller, JobRequest, JobSubmitter, PollOutcome, ProgressReporter, ProgressSink,
    SubmissionError, WorkerPool,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::metrics;

/// Why a request that passed admission produced no artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No bearer token could be obtained
    Auth(String),
    /// Every candidate rejected the job, or the request was unusable
    Submission(String),
    /// The backend reported the job failed
    Job(String),
    TimedOut { elapsed: Duration },
    Aborted { failures: u32, last_error: String },
    Cancelled,
}

impl FailureReason {
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::Auth(_) => "auth",
            FailureReason::Submission(_) => "submission",
            FailureReason::Job(_) => "job",
            FailureReason::TimedOut { .. } => "timed_out",
            FailureReason::Aborted { .. } => "aborted",
            FailureReason::Cancelled => "cancelled",
        }
    }

    pub fn message(&self) -> String {
        match self {
            FailureReason::Auth(msg) | FailureReason::Submission(msg) | FailureReason::Job(msg) => {
                msg.clone()
            }
            FailureReason::TimedOut { elapsed } => {
                format!("no result after {}s", elapsed.as_secs())
            }
            FailureReason::Aborted {
                failures,
                last_error,
            } => format!("{failures} consecutive status checks failed, last: {last_error}"),
            FailureReason::Cancelled => "request cancelled".into(),
        }
    }
}

impl From<SubmissionError> for FailureReason {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::Auth(e) => FailureReason::Auth(e.to_string()),
            other => FailureReason::Submission(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered(Artifact),
    Denied { remaining: Duration },
    /// Another request for the subject is still running
    InFlight,
    Failed(FailureReason),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Delivered(_) => "delivered",
            Outcome::Denied { .. } => "denied",
            Outcome::InFlight => "in_flight",
            Outcome::Failed(_) => "failed",
        }
    }
}

pub struct Orchestrator {
    admission: Arc<AdmissionController>,
    submitter: Arc<JobSubmitter>,
    poller: Arc<JobPoller>,
    reporter: ProgressReporter,
    workers: WorkerPool,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    pub fn new(
        admission: Arc<AdmissionController>,
        submitter: Arc<JobSubmitter>,
        poller: Arc<JobPoller>,
        reporter: ProgressReporter,
        workers: WorkerPool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            admission,
            submitter,
            poller,
            reporter,
            workers,
            clock,
        }
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run one request to its terminal outcome.
    ///
    /// Only subject-store failures are returned as errors; every generation
    /// result, including failures, is an `Outcome`.
    pub async fn handle(
        &self,
        subject: &str,
        profile: SubjectProfile,
        request: JobRequest,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<Outcome> {
        let now_ms = self.clock.now_ms();
        self.admission.touch(subject, profile, now_ms).await?;

        match self.admission.try_admit(subject, now_ms).await? {
            Admission::Allowed => {}
            Admission::Denied { remaining } => {
                info!(subject, remaining_secs = remaining.as_secs(), "request denied by cooldown");
                metrics::record_denied();
                metrics::record_request("denied");
                return Ok(Outcome::Denied { remaining });
            }
            Admission::InFlight => {
                info!(subject, "request denied, another is in flight");
                metrics::record_denied();
                metrics::record_request("in_flight");
                return Ok(Outcome::InFlight);
            }
        }

        let submitted = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FailureReason::Cancelled),
            result = self.submitter.submit(&request) => result.map_err(FailureReason::from),
        };
        let handle = match submitted {
            Ok(handle) => handle,
            Err(reason) => return Ok(self.fail(subject, reason).await),
        };
        info!(subject, handle = %handle.name, candidate = %handle.candidate, "job submitted");

        let poll = {
            let poller = self.poller.clone();
            let handle = handle.clone();
            let cancel = cancel.clone();
            self.workers
                .spawn(async move { poller.run(&handle, &cancel).await })
        };

        let progress_cancel = cancel.child_token();
        let progress = {
            let reporter = self.reporter.clone();
            let started = handle.submitted_at;
            let stop = progress_cancel.clone();
            tokio::spawn(async move { reporter.run(started, &*sink, stop).await })
        };

        let outcome = match poll.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(subject, handle = %handle.name, error = %e, "poll task failed");
                PollOutcome::Failed(format!("poll task failed: {e}"))
            }
        };

        progress_cancel.cancel();
        if let Err(e) = progress.await {
            warn!(subject, error = %e, "progress reporter task failed");
        }

        metrics::record_job_duration(outcome.label(), handle.elapsed().as_secs_f64());

        let reason = match outcome {
            PollOutcome::Succeeded(artifact) => {
                if let Err(e) = self.admission.record(subject, self.clock.now_ms()).await {
                    error!(subject, error = %e, "failed to record delivery");
                }
                info!(
                    subject,
                    handle = %handle.name,
                    elapsed_secs = handle.elapsed().as_secs(),
                    "artifact delivered"
                );
                metrics::record_request("delivered");
                return Ok(Outcome::Delivered(artifact));
            }
            PollOutcome::Failed(message) => FailureReason::Job(message),
            PollOutcome::TimedOut { elapsed } => FailureReason::TimedOut { elapsed },
            PollOutcome::Aborted {
                failures,
                last_error,
            } => FailureReason::Aborted {
                failures,
                last_error,
            },
            PollOutcome::Cancelled => FailureReason::Cancelled,
        };
        Ok(self.fail(subject, reason).await)
    }

    async fn fail(&self, subject: &str, reason: FailureReason) -> Outcome {
        self.admission.release(subject).await;
        warn!(
            subject,
            reason = reason.label(),
            message = %reason.message(),
            "request failed"
        );
        metrics::record_request("failed");
        Outcome::Failed(reason)
    }
}
