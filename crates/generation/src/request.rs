//! Job request and result value types

use std::io::Cursor;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::SubmissionError;
use crate::wire::OperationStatus;

/// Model variants tried in order when the caller does not supply a list.
/// Fast variants come first.
pub const DEFAULT_CANDIDATES: &[&str] = &[
    "veo-3.0-fast-generate-001",
    "veo-3.1-fast-generate-preview",
    "veo-3.0-generate-001",
    "veo-3.1-generate-preview",
    "veo-2.0-generate-001",
];

pub const DEFAULT_DURATION_SECS: u32 = 6;

const FALLBACK_IMAGE_MIME: &str = "image/jpeg";
const FALLBACK_VIDEO_MIME: &str = "video/mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AspectRatio {
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "16:9")]
    Landscape,
}

impl AspectRatio {
    /// Portrait when taller than wide; square images render landscape.
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        if height > width {
            AspectRatio::Portrait
        } else {
            AspectRatio::Landscape
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Resolution {
    #[serde(rename = "1080p")]
    Hd1080,
    #[serde(rename = "720p")]
    Hd720,
}

impl Resolution {
    /// Veo 3 variants render 1080p; everything older is capped at 720p.
    pub fn for_candidate(candidate: &str) -> Self {
        if candidate.starts_with("veo-3") {
            Resolution::Hd1080
        } else {
            Resolution::Hd720
        }
    }
}

/// Immutable generation request.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub payload: Vec<u8>,
    pub mime_type: String,
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    pub duration_secs: u32,
    pub candidates: Vec<String>,
}

impl JobRequest {
    /// Build a request from a still image.
    ///
    /// The aspect ratio is read from the image header; when `mime_type` is
    /// not given it is taken from the detected format. An image whose
    /// dimensions cannot be read is rejected before any backend call.
    pub fn new(
        payload: Vec<u8>,
        mime_type: Option<String>,
        prompt: impl Into<String>,
        duration_secs: u32,
        candidates: Vec<String>,
    ) -> Result<Self, SubmissionError> {
        let reader = image::ImageReader::new(Cursor::new(&payload))
            .with_guessed_format()
            .map_err(|e| SubmissionError::InvalidRequest(format!("reading image: {e}")))?;
        let detected_mime = reader.format().map(|f| f.to_mime_type().to_string());
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| SubmissionError::InvalidRequest(format!("unreadable image: {e}")))?;

        let mime_type = mime_type
            .or(detected_mime)
            .unwrap_or_else(|| FALLBACK_IMAGE_MIME.to_string());

        Ok(Self {
            payload,
            mime_type,
            prompt: prompt.into(),
            aspect_ratio: AspectRatio::from_dimensions(width, height),
            duration_secs,
            candidates,
        })
    }
}

/// Backend-assigned operation handle.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub name: String,
    /// Candidate that accepted the job
    pub candidate: String,
    pub submitted_at: Instant,
}

impl JobHandle {
    pub fn new(name: impl Into<String>, candidate: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            candidate: candidate.into(),
            submitted_at: Instant::now(),
        }
    }

    /// Model the status endpoint must be addressed to.
    ///
    /// Parsed from `.../models/{model}/operations/{id}`; falls back to the
    /// accepting candidate when the handle has another shape.
    pub fn model(&self) -> &str {
        let mut parts = self.name.split('/');
        while let Some(part) = parts.next() {
            if part == "models" {
                if let Some(model) = parts.next() {
                    if !model.is_empty() {
                        return model;
                    }
                }
            }
        }
        &self.candidate
    }

    pub fn elapsed(&self) -> Duration {
        self.submitted_at.elapsed()
    }
}

/// Generated video.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Interpreted operation status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    NotDone,
    Succeeded(Artifact),
    Failed(String),
}

impl From<OperationStatus> for JobStatus {
    fn from(status: OperationStatus) -> Self {
        if !status.done {
            return JobStatus::NotDone;
        }
        if let Some(error) = status.error {
            return JobStatus::Failed(
                error
                    .message
                    .unwrap_or_else(|| String::from("unknown error")),
            );
        }
        let Some(response) = status.response else {
            return JobStatus::Failed(String::from("unknown"));
        };
        let Some(video) = response.videos.into_iter().next() else {
            return JobStatus::Failed(String::from("response carried no video"));
        };
        let Some(encoded) = video.bytes_base64_encoded else {
            return JobStatus::Failed(String::from("video has no inline bytes"));
        };
        match STANDARD.decode(encoded.as_bytes()) {
            Ok(bytes) => JobStatus::Succeeded(Artifact {
                bytes,
                mime_type: video
                    .mime_type
                    .unwrap_or_else(|| FALLBACK_VIDEO_MIME.to_string()),
            }),
            Err(e) => JobStatus::Failed(format!("undecodable video payload: {e}")),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};

    /// Encode a blank PNG of the given size.
    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn status(json: &str) -> JobStatus {
        serde_json::from_str::<OperationStatus>(json).unwrap().into()
    }

    #[test]
    fn portrait_image_gets_nine_sixteen() {
        let req = JobRequest::new(png(90, 160), None, "p", 6, vec!["veo-3.0-generate-001".into()])
            .unwrap();
        assert_eq!(req.aspect_ratio, AspectRatio::Portrait);
        assert_eq!(req.mime_type, "image/png");
    }

    #[test]
    fn landscape_and_square_get_sixteen_nine() {
        let wide = JobRequest::new(png(160, 90), None, "p", 6, vec![]).unwrap();
        let square = JobRequest::new(png(64, 64), None, "p", 6, vec![]).unwrap();
        assert_eq!(wide.aspect_ratio, AspectRatio::Landscape);
        assert_eq!(square.aspect_ratio, AspectRatio::Landscape);
    }

    #[test]
    fn explicit_mime_type_wins() {
        let req = JobRequest::new(png(10, 10), Some("image/jpeg".into()), "p", 6, vec![]).unwrap();
        assert_eq!(req.mime_type, "image/jpeg");
    }

    #[test]
    fn garbage_payload_is_invalid_request() {
        let err = JobRequest::new(b"not an image".to_vec(), None, "p", 6, vec![]).unwrap_err();
        assert!(matches!(err, SubmissionError::InvalidRequest(_)), "got: {err:?}");
    }

    #[test]
    fn resolution_follows_model_generation() {
        assert_eq!(Resolution::for_candidate("veo-3.1-fast-generate-preview"), Resolution::Hd1080);
        assert_eq!(Resolution::for_candidate("veo-2.0-generate-001"), Resolution::Hd720);
    }

    #[tokio::test]
    async fn handle_model_parsed_from_operation_name() {
        let handle = JobHandle::new(
            "projects/p/locations/us-central1/publishers/google/models/veo-3.0-generate-001/operations/abc",
            "veo-3.0-fast-generate-001",
        );
        assert_eq!(handle.model(), "veo-3.0-generate-001");

        let opaque = JobHandle::new("operations/abc", "veo-2.0-generate-001");
        assert_eq!(opaque.model(), "veo-2.0-generate-001");
    }

    #[test]
    fn not_done_status() {
        assert_eq!(status(r#"{"done":false}"#), JobStatus::NotDone);
    }

    #[test]
    fn done_with_error_is_failed_with_message() {
        assert_eq!(
            status(r#"{"done":true,"error":{"message":"blocked by safety filter"}}"#),
            JobStatus::Failed("blocked by safety filter".into())
        );
    }

    #[test]
    fn done_with_neither_is_unknown_failure() {
        assert_eq!(status(r#"{"done":true}"#), JobStatus::Failed("unknown".into()));
    }

    #[test]
    fn done_with_video_decodes_bytes() {
        let got = status(r#"{"done":true,"response":{"videos":[{"bytesBase64Encoded":"AAEC"}]}}"#);
        assert_eq!(
            got,
            JobStatus::Succeeded(Artifact {
                bytes: vec![0, 1, 2],
                mime_type: "video/mp4".into(),
            })
        );
    }

    #[test]
    fn done_with_empty_videos_is_failed() {
        assert!(matches!(
            status(r#"{"done":true,"response":{"videos":[]}}"#),
            JobStatus::Failed(_)
        ));
    }

    #[test]
    fn done_with_bad_base64_is_failed() {
        assert!(matches!(
            status(r#"{"done":true,"response":{"videos":[{"bytesBase64Encoded":"***"}]}}"#),
            JobStatus::Failed(_)
        ));
    }
}
