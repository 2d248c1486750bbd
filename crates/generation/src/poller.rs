//! Operation polling
//!
//! `JobPoller::run` drives one handle to a terminal outcome:
//!
//! ```text
//! Waiting ──fetch ok, not done──▶ sleep(interval) ──▶ Waiting
//!    │ fetch failed (n < limit) ──▶ sleep(interval) ──▶ Waiting
//!    ├─ done + error ──────────▶ Failed(message)
//!    ├─ done + video ──────────▶ Succeeded(artifact)
//!    ├─ done + neither ────────▶ Failed("unknown")
//!    ├─ n == limit ────────────▶ Aborted
//!    ├─ budget spent ──────────▶ TimedOut
//!    └─ cancelled ─────────────▶ Cancelled
//! ```
//!
//! Every fetch and every sleep is clipped to the remaining budget, so `run`
//! returns no later than `budget` after it starts.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vertex_auth::CredentialProvider;

use crate::backend::Backend;
use crate::error::{BackendError, PollTransientError};
use crate::request::{Artifact, JobHandle, JobStatus};
use crate::wire::OperationStatus;

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub budget: Duration,
    /// Consecutive failed fetches tolerated before giving up
    pub max_consecutive_failures: u32,
    /// Upper bound on a single status fetch
    pub status_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            budget: Duration::from_secs(1200),
            max_consecutive_failures: 10,
            status_timeout: Duration::from_secs(40),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded(Artifact),
    Failed(String),
    TimedOut { elapsed: Duration },
    Aborted { failures: u32, last_error: String },
    Cancelled,
}

impl PollOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PollOutcome::Succeeded(_) => "succeeded",
            PollOutcome::Failed(_) => "failed",
            PollOutcome::TimedOut { .. } => "timed_out",
            PollOutcome::Aborted { .. } => "aborted",
            PollOutcome::Cancelled => "cancelled",
        }
    }
}

pub struct JobPoller {
    credentials: Arc<CredentialProvider>,
    backend: Arc<dyn Backend>,
    config: PollConfig,
}

impl JobPoller {
    pub fn new(
        credentials: Arc<CredentialProvider>,
        backend: Arc<dyn Backend>,
        config: PollConfig,
    ) -> Self {
        Self {
            credentials,
            backend,
            config,
        }
    }

    /// Poll `handle` until it reaches a terminal outcome or `cancel` fires.
    ///
    /// The budget runs from submission, so time spent waiting for a worker
    /// counts against it.
    pub async fn run(&self, handle: &JobHandle, cancel: &CancellationToken) -> PollOutcome {
        let start = handle.submitted_at;
        let deadline = start + self.config.budget;
        let mut failures: u32 = 0;
        let mut polls: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let elapsed = start.elapsed();
                warn!(
                    handle = %handle.name,
                    elapsed_secs = elapsed.as_secs(),
                    polls,
                    "polling budget exhausted"
                );
                return PollOutcome::TimedOut { elapsed };
            }

            let limit = self.config.status_timeout.min(remaining);
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(handle, start, polls),
                fetched = self.fetch(handle, limit) => fetched,
            };
            polls += 1;

            match fetched {
                Ok(status) => {
                    failures = 0;
                    match JobStatus::from(status) {
                        JobStatus::NotDone => {
                            debug!(handle = %handle.name, polls, "operation still running");
                        }
                        JobStatus::Succeeded(artifact) => {
                            info!(
                                handle = %handle.name,
                                elapsed_secs = start.elapsed().as_secs(),
                                polls,
                                bytes = artifact.bytes.len(),
                                "operation succeeded"
                            );
                            return PollOutcome::Succeeded(artifact);
                        }
                        JobStatus::Failed(message) => {
                            warn!(
                                handle = %handle.name,
                                elapsed_secs = start.elapsed().as_secs(),
                                polls,
                                error = %message,
                                "operation failed"
                            );
                            return PollOutcome::Failed(message);
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        handle = %handle.name,
                        failures,
                        limit = self.config.max_consecutive_failures,
                        error = %e,
                        "status fetch failed"
                    );
                    if failures >= self.config.max_consecutive_failures {
                        warn!(
                            handle = %handle.name,
                            elapsed_secs = start.elapsed().as_secs(),
                            polls,
                            "too many consecutive status failures"
                        );
                        return PollOutcome::Aborted {
                            failures,
                            last_error: e.to_string(),
                        };
                    }
                }
            }

            let pause = self
                .config
                .interval
                .min(deadline.saturating_duration_since(Instant::now()));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(handle, start, polls),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    fn cancelled(&self, handle: &JobHandle, start: Instant, polls: u32) -> PollOutcome {
        info!(
            handle = %handle.name,
            elapsed_secs = start.elapsed().as_secs(),
            polls,
            "polling cancelled"
        );
        PollOutcome::Cancelled
    }

    /// One status fetch, token included, bounded by `limit`.
    async fn fetch(
        &self,
        handle: &JobHandle,
        limit: Duration,
    ) -> Result<OperationStatus, PollTransientError> {
        let attempt = async {
            let token = self.credentials.token().await?;
            let status = self.backend.fetch_operation(handle, token.expose()).await;
            if let Err(BackendError::Rejected { status: 401, .. }) = &status {
                self.credentials.invalidate().await;
            }
            Ok::<_, PollTransientError>(status?)
        };
        match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(limit).into()),
        }
    }
}
