//! Service-specific error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors surfaced by request handlers.
///
/// Generation outcomes (denied, failed, timed out) are not errors; they are
/// streamed to the caller as terminal result lines. These variants cover the
/// cases where no generation is attempted at all.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("subject store unavailable: {0}")]
    Store(#[from] admission::Error),

    #[error("subject not found: {0}")]
    SubjectNotFound(String),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::SubjectNotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::Store(_) => "store_unavailable",
            Error::SubjectNotFound(_) => "not_found",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        });
        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_error_kind() {
        assert_eq!(
            Error::InvalidRequest("bad base64".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Store(admission::Error::Io("disk full".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::SubjectNotFound("42".into()).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn response_body_is_json_error() {
        let response = Error::InvalidRequest("image_base64 is empty".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "invalid_request");
        assert!(
            json["error"]["message"]
                .as_str()
                .unwrap()
                .contains("image_base64 is empty")
        );
    }
}
