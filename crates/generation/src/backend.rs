//! Generation backend
//!
//! `Backend` is the seam between submission/polling logic and the HTTP API so
//! both can be driven by scripted mocks in tests. `VertexBackend` is the
//! production implementation against Vertex AI publisher models.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::error::BackendError;
use crate::request::JobHandle;
use crate::wire::{FetchOperationRequest, OperationStatus, PredictRequest, SubmitResponse};

/// Base URL for a publisher model. `{location}`, `{project}` and `{model}`
/// are substituted per call.
pub const DEFAULT_ENDPOINT_TEMPLATE: &str = "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{model}";

/// Error bodies longer than this are truncated before logging or storing.
const MAX_ERROR_BODY: usize = 512;

/// Remote video-generation API.
///
/// Uses `Pin<Box<dyn Future>>` return types so callers can hold `Arc<dyn Backend>`.
pub trait Backend: Send + Sync {
    /// Start a long-running prediction on `candidate`.
    fn submit<'a>(
        &'a self,
        candidate: &'a str,
        body: &'a PredictRequest<'a>,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SubmitResponse, BackendError>> + Send + 'a>>;

    /// Fetch the current state of a submitted operation.
    fn fetch_operation<'a>(
        &'a self,
        handle: &'a JobHandle,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<OperationStatus, BackendError>> + Send + 'a>>;
}

pub struct VertexBackend {
    client: reqwest::Client,
    endpoint_template: String,
    project: String,
    location: String,
}

impl VertexBackend {
    pub fn new(
        client: reqwest::Client,
        endpoint_template: impl Into<String>,
        project: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint_template: endpoint_template.into(),
            project: project.into(),
            location: location.into(),
        }
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        let base = self
            .endpoint_template
            .replace("{location}", &self.location)
            .replace("{project}", &self.project)
            .replace("{model}", model);
        format!("{base}:{method}")
    }

    async fn post_json<B, R>(&self, url: &str, body: &B, token: &str) -> Result<R, BackendError>
    where
        B: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                body: truncate(body),
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

impl Backend for VertexBackend {
    fn submit<'a>(
        &'a self,
        candidate: &'a str,
        body: &'a PredictRequest<'a>,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SubmitResponse, BackendError>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.model_url(candidate, "predictLongRunning");
            debug!(candidate, "submitting prediction");
            self.post_json(&url, body, token).await
        })
    }

    fn fetch_operation<'a>(
        &'a self,
        handle: &'a JobHandle,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<OperationStatus, BackendError>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.model_url(handle.model(), "fetchPredictOperation");
            let body = FetchOperationRequest {
                operation_name: &handle.name,
            };
            self.post_json(&url, &body, token).await
        })
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
