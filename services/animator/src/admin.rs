//! Admin API for usage inspection
//!
//! Runs on a separate listener (`[admin] listen_addr`) and is only started
//! when that section is configured.
//!
//! Endpoints:
//! - GET /admin/stats           aggregate usage across all subjects
//! - GET /admin/subjects/{id}   full record for one subject

use std::sync::Arc;

use admission::{Admission, AdmissionController};
use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::get;
use common::Clock;

use crate::error::{Error, Result};

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    admission: Arc<AdmissionController>,
    clock: Arc<dyn Clock>,
}

impl AdminState {
    pub fn new(admission: Arc<AdmissionController>, clock: Arc<dyn Clock>) -> Self {
        Self { admission, clock }
    }
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/stats", get(usage_stats))
        .route("/admin/subjects/{id}", get(subject_detail))
        .with_state(state)
}

/// GET /admin/stats
async fn usage_stats(State(state): State<AdminState>) -> Result<Json<serde_json::Value>> {
    let summary = state.admission.summary(state.clock.now_ms()).await?;
    let policy = state.admission.policy();
    Ok(Json(serde_json::json!({
        "total_subjects": summary.total_subjects,
        "total_deliveries": summary.total_deliveries,
        "active_last_24h": summary.active_last_24h,
        "cooldown_secs": policy.cooldown().as_secs(),
    })))
}

/// GET /admin/subjects/{id}
///
/// Includes the stored profile, which the public endpoint never exposes.
async fn subject_detail(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let stats = state
        .admission
        .stats(&id, state.clock.now_ms())
        .await?
        .ok_or_else(|| Error::SubjectNotFound(id.clone()))?;

    let remaining_secs = match stats.admission {
        Admission::Denied { remaining } => Some(remaining.as_secs()),
        _ => None,
    };
    let record = stats.record;
    Ok(Json(serde_json::json!({
        "subject": id,
        "username": record.username,
        "display_name": record.display_name,
        "joined_at": record.joined_at,
        "last_usage": record.last_usage,
        "usage_count": record.usage_count,
        "total_requests": record.total_requests,
        "exempt": stats.exempt,
        "admission": stats.admission.label(),
        "remaining_secs": remaining_secs,
    })))
}
