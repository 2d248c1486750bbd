//! Classification of candidate rejections
//!
//! Every rejection advances to the next candidate regardless of class; the
//! class drives logging, metrics labels and whether the cached token is
//! dropped before the next attempt.

use crate::error::BackendError;

/// Phrases in a 429 body that mean the project quota is spent rather than
/// a short-lived per-minute limit.
const QUOTA_PATTERNS: &[&str] = &[
    "quota exceeded",
    "exceeded the quota",
    "quota_exceeded",
    "online_prediction_requests_per_base_model",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateRejection {
    /// Model unavailable to this project or region (404)
    NotFound,
    RateLimited,
    QuotaExhausted,
    /// Token rejected (401/403)
    Unauthorized,
    /// Payload refused (400)
    InvalidRequest,
    /// 5xx or 408
    Unavailable,
    Transport,
    Timeout,
    /// 2xx without an operation name
    MissingHandle,
    Other(u16),
}

impl CandidateRejection {
    pub fn label(&self) -> &'static str {
        match self {
            CandidateRejection::NotFound => "not_found",
            CandidateRejection::RateLimited => "rate_limited",
            CandidateRejection::QuotaExhausted => "quota_exhausted",
            CandidateRejection::Unauthorized => "unauthorized",
            CandidateRejection::InvalidRequest => "invalid_request",
            CandidateRejection::Unavailable => "unavailable",
            CandidateRejection::Transport => "transport",
            CandidateRejection::Timeout => "timeout",
            CandidateRejection::MissingHandle => "missing_handle",
            CandidateRejection::Other(_) => "other",
        }
    }
}

fn classify_429(body: &str) -> CandidateRejection {
    let lower = body.to_lowercase();
    if QUOTA_PATTERNS.iter().any(|p| lower.contains(p)) {
        CandidateRejection::QuotaExhausted
    } else {
        CandidateRejection::RateLimited
    }
}

/// Classify a non-success HTTP response by status and body.
pub fn classify_status(status: u16, body: &str) -> CandidateRejection {
    match status {
        404 => CandidateRejection::NotFound,
        429 => classify_429(body),
        401 | 403 => CandidateRejection::Unauthorized,
        400 => CandidateRejection::InvalidRequest,
        408 | 500..=599 => CandidateRejection::Unavailable,
        other => CandidateRejection::Other(other),
    }
}

pub fn classify_error(err: &BackendError) -> CandidateRejection {
    match err {
        BackendError::Rejected { status, body } => classify_status(*status, body),
        BackendError::Transport(_) => CandidateRejection::Transport,
        BackendError::Decode(_) => CandidateRejection::MissingHandle,
        BackendError::Timeout(_) => CandidateRejection::Timeout,
    }
}
