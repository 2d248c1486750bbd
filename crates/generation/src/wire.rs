//! Vertex AI long-running prediction wire format

use serde::{Deserialize, Serialize};

use crate::request::{AspectRatio, Resolution};

/// Body of `:predictLongRunning`. Borrows the (large) base64 image so one
/// encoding is shared across every candidate attempt.
#[derive(Debug, Serialize)]
pub struct PredictRequest<'a> {
    pub instances: [Instance<'a>; 1],
    pub parameters: Parameters,
}

#[derive(Debug, Serialize)]
pub struct Instance<'a> {
    pub prompt: &'a str,
    pub image: ImageInput<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInput<'a> {
    pub bytes_base64_encoded: &'a str,
    pub mime_type: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameters {
    pub aspect_ratio: AspectRatio,
    pub duration_seconds: u32,
    pub resolution: Resolution,
    pub enhance_prompt: bool,
    pub sample_count: u32,
    pub generate_audio: bool,
}

/// Accepted submission. `name` is the operation handle.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub name: Option<String>,
}

/// Body of `:fetchPredictOperation`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOperationRequest<'a> {
    pub operation_name: &'a str,
}

/// Operation status as returned by `:fetchPredictOperation`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationStatus {
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<OperationError>,
    #[serde(default)]
    pub response: Option<OperationResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationResponse {
    #[serde(default)]
    pub videos: Vec<GeneratedVideo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedVideo {
    #[serde(default)]
    pub bytes_base64_encoded: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}
