//! Candidate fallback submission
//!
//! Tries each candidate model in the order given until one accepts the job.
//! Every rejection, error or timeout on one candidate moves on to the next;
//! only a token failure or an unusable request stops the loop early.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{info, warn};
use vertex_auth::CredentialProvider;

use crate::backend::Backend;
use crate::classify::{CandidateRejection, classify_error};
use crate::error::{BackendError, CandidateFailure, SubmissionError};
use crate::request::{JobHandle, JobRequest, Resolution};
use crate::wire::{ImageInput, Instance, Parameters, PredictRequest};

pub struct JobSubmitter {
    credentials: Arc<CredentialProvider>,
    backend: Arc<dyn Backend>,
    attempt_timeout: Duration,
}

impl JobSubmitter {
    pub fn new(
        credentials: Arc<CredentialProvider>,
        backend: Arc<dyn Backend>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            backend,
            attempt_timeout,
        }
    }

    /// Submit `request`, returning the handle from the first accepting candidate.
    pub async fn submit(&self, request: &JobRequest) -> Result<JobHandle, SubmissionError> {
        if request.candidates.is_empty() {
            return Err(SubmissionError::InvalidRequest(
                "no backend candidates configured".into(),
            ));
        }

        let image = STANDARD.encode(&request.payload);
        let mut last: Option<CandidateFailure> = None;

        for (attempt, candidate) in request.candidates.iter().enumerate() {
            let token = self.credentials.token().await?;
            let body = PredictRequest {
                instances: [Instance {
                    prompt: &request.prompt,
                    image: ImageInput {
                        bytes_base64_encoded: &image,
                        mime_type: &request.mime_type,
                    },
                }],
                parameters: Parameters {
                    aspect_ratio: request.aspect_ratio,
                    duration_seconds: request.duration_secs,
                    resolution: Resolution::for_candidate(candidate),
                    enhance_prompt: true,
                    sample_count: 1,
                    generate_audio: true,
                },
            };

            let result = match tokio::time::timeout(
                self.attempt_timeout,
                self.backend.submit(candidate, &body, token.expose()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(self.attempt_timeout)),
            };

            let failure = match result {
                Ok(response) => match response.name.filter(|n| !n.is_empty()) {
                    Some(name) => {
                        record_attempt(candidate, "accepted");
                        info!(
                            candidate = %candidate,
                            handle = %name,
                            attempt = attempt + 1,
                            "job accepted"
                        );
                        return Ok(JobHandle::new(name, candidate.clone()));
                    }
                    None => CandidateFailure {
                        candidate: candidate.clone(),
                        rejection: CandidateRejection::MissingHandle,
                        detail: "accepted without an operation name".into(),
                    },
                },
                Err(e) => CandidateFailure {
                    candidate: candidate.clone(),
                    rejection: classify_error(&e),
                    detail: e.to_string(),
                },
            };

            record_attempt(candidate, failure.rejection.label());
            warn!(
                candidate = %candidate,
                rejection = failure.rejection.label(),
                detail = %failure.detail,
                "candidate rejected job"
            );
            if failure.rejection == CandidateRejection::Unauthorized {
                self.credentials.invalidate().await;
            }
            last = Some(failure);
        }

        match last {
            Some(last) => Err(SubmissionError::Exhausted {
                attempts: request.candidates.len(),
                last,
            }),
            None => Err(SubmissionError::InvalidRequest(
                "no backend candidates configured".into(),
            )),
        }
    }
}

fn record_attempt(candidate: &str, result: &'static str) {
    metrics::counter!(
        "generation_submissions_total",
        "candidate" => candidate.to_string(),
        "result" => result
    )
    .increment(1);
}
