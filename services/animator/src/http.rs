//! Public HTTP API
//!
//! `POST /v1/generations` answers with `application/x-ndjson`: zero or more
//! `progress` lines followed by exactly one terminal line (`delivered`,
//! `denied` or `failed`). The request runs on its own task; dropping the
//! response stream cancels it through a `CancellationToken` drop guard.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use admission::{Admission, SubjectProfile};
use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use generation::{JobRequest, ProgressEvent, ProgressSink};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::orchestrator::{Orchestrator, Outcome};

/// Lines buffered between the request task and the response body.
const LINE_BUFFER: usize = 16;

/// Request-independent counters for `/health` and shutdown logging.
#[derive(Debug, Clone)]
pub struct ServiceCounters {
    pub requests_total: Arc<AtomicU64>,
    /// Generation requests whose task has not finished yet
    pub in_flight: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceCounters {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

impl Default for ServiceCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Values used when a request leaves a field out.
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub prompt: String,
    pub duration_secs: u32,
    pub candidates: Vec<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub defaults: Arc<RequestDefaults>,
    pub counters: ServiceCounters,
    pub prometheus: PrometheusHandle,
}

pub fn build_router(state: AppState, max_connections: usize, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/v1/generations", post(create_generation))
        .route("/v1/subjects/{id}", get(subject_status))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct GenerationBody {
    pub subject: String,
    pub image_base64: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub candidates: Option<Vec<String>>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// One NDJSON line of the generation stream.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Line<'a> {
    Progress {
        #[serde(flatten)]
        event: &'a ProgressEvent,
        bar: String,
    },
    Delivered {
        mime_type: &'a str,
        video_base64: String,
    },
    Denied {
        reason: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_secs: Option<u64>,
    },
    Failed {
        reason: &'static str,
        message: String,
    },
}

impl Line<'_> {
    fn encode(&self) -> Bytes {
        let mut buf = serde_json::to_vec(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"failed","reason":"internal","message":"{e}"}}"#).into_bytes()
        });
        buf.push(b'\n');
        Bytes::from(buf)
    }

    fn terminal(outcome: &'_ Outcome) -> Line<'_> {
        match outcome {
            Outcome::Delivered(artifact) => Line::Delivered {
                mime_type: &artifact.mime_type,
                video_base64: STANDARD.encode(&artifact.bytes),
            },
            Outcome::Denied { remaining } => Line::Denied {
                reason: "cooldown",
                remaining_secs: Some(remaining.as_secs()),
            },
            Outcome::InFlight => Line::Denied {
                reason: "in_flight",
                remaining_secs: None,
            },
            Outcome::Failed(reason) => Line::Failed {
                reason: reason.label(),
                message: reason.message(),
            },
        }
    }
}

/// Progress sink writing NDJSON lines into the response channel.
struct NdjsonSink {
    tx: mpsc::Sender<Bytes>,
}

impl ProgressSink for NdjsonSink {
    fn emit(&self, event: ProgressEvent) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let line = Line::Progress {
                event: &event,
                bar: event.bar(),
            };
            if self.tx.send(line.encode()).await.is_err() {
                debug!("client gone, progress line dropped");
            }
        })
    }
}

fn decode_request(body: GenerationBody, defaults: &RequestDefaults) -> Result<(String, SubjectProfile, JobRequest)> {
    let subject = body.subject.trim().to_string();
    if subject.is_empty() {
        return Err(Error::InvalidRequest("subject must not be empty".into()));
    }
    let payload = STANDARD
        .decode(body.image_base64.trim())
        .map_err(|e| Error::InvalidRequest(format!("image_base64 is not valid base64: {e}")))?;
    if payload.is_empty() {
        return Err(Error::InvalidRequest("image_base64 is empty".into()));
    }

    let duration = body.duration_seconds.unwrap_or(defaults.duration_secs);
    if duration == 0 {
        return Err(Error::InvalidRequest(
            "duration_seconds must be greater than 0".into(),
        ));
    }
    let candidates = match body.candidates {
        Some(c) if !c.is_empty() => c,
        _ => defaults.candidates.clone(),
    };
    let prompt = body
        .prompt
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| defaults.prompt.clone());

    let request = JobRequest::new(payload, body.mime_type, prompt, duration, candidates)
        .map_err(|e| Error::InvalidRequest(e.to_string()))?;
    let profile = SubjectProfile {
        username: body.username,
        display_name: body.display_name,
    };
    Ok((subject, profile, request))
}

/// POST /v1/generations
async fn create_generation(
    State(state): State<AppState>,
    Json(body): Json<GenerationBody>,
) -> Result<Response> {
    state.counters.requests_total.fetch_add(1, Ordering::Relaxed);
    let (subject, profile, request) = decode_request(body, &state.defaults)?;

    let request_id = format!("gen_{}", uuid::Uuid::new_v4().as_simple());
    info!(
        request_id = %request_id,
        subject = %subject,
        aspect_ratio = ?request.aspect_ratio,
        candidates = request.candidates.len(),
        "generation request received"
    );

    let request_header = HeaderValue::from_str(&request_id).ok();
    let (tx, rx) = mpsc::channel::<Bytes>(LINE_BUFFER);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let in_flight = state.counters.in_flight.clone();
    in_flight.fetch_add(1, Ordering::Relaxed);
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let sink = Arc::new(NdjsonSink { tx: tx.clone() });
        let terminal = match orchestrator
            .handle(&subject, profile, request, sink, cancel)
            .await
        {
            Ok(outcome) => {
                info!(
                    request_id = %request_id,
                    subject = %subject,
                    outcome = outcome.label(),
                    "generation request finished"
                );
                Line::terminal(&outcome).encode()
            }
            Err(e) => {
                error!(request_id = %request_id, subject = %subject, error = %e, "generation request errored");
                Line::Failed {
                    reason: "store",
                    message: e.to_string(),
                }
                .encode()
            }
        };
        if tx.send(terminal).await.is_err() {
            debug!(request_id = %request_id, "client gone before terminal line");
        }
        in_flight.fetch_sub(1, Ordering::Relaxed);
    });

    let stream = futures_util::stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv()
            .await
            .map(|line| (Ok::<_, Infallible>(line), (rx, guard)))
    });

    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson"),
    );
    if let Some(value) = request_header {
        response.headers_mut().insert("x-request-id", value);
    }
    Ok(response)
}

#[derive(Debug, Serialize)]
struct SubjectStatus {
    subject: String,
    admission: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining_secs: Option<u64>,
    exempt: bool,
    usage_count: u64,
}

/// GET /v1/subjects/{id}
async fn subject_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SubjectStatus>> {
    let admission = state.orchestrator.admission();
    let now_ms = state.orchestrator.clock().now_ms();
    let stats = admission
        .stats(&id, now_ms)
        .await?
        .ok_or_else(|| Error::SubjectNotFound(id.clone()))?;

    let remaining_secs = match stats.admission {
        Admission::Denied { remaining } => Some(remaining.as_secs()),
        _ => None,
    };
    Ok(Json(SubjectStatus {
        subject: id,
        admission: stats.admission.label(),
        remaining_secs,
        exempt: stats.exempt,
        usage_count: stats.record.usage_count,
    }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let workers = state.orchestrator.workers();
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.counters.started_at.elapsed().as_secs(),
        "requests_served": state.counters.requests_total.load(Ordering::Relaxed),
        "in_flight": state.counters.in_flight.load(Ordering::Relaxed),
        "workers_busy": workers.busy(),
        "workers_max": workers.size(),
    });
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tests::{FakeBackend, Step, orchestrator, png};
    use axum::http::Request;
    use common::ManualClock;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_prometheus_handle() -> PrometheusHandle {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle()
    }

    fn app(backend: Arc<FakeBackend>) -> (Router, AppState) {
        let state = AppState {
            orchestrator: Arc::new(orchestrator(backend, Arc::new(ManualClock::new(0)), false)),
            defaults: Arc::new(RequestDefaults {
                prompt: "default prompt".into(),
                duration_secs: 6,
                candidates: vec!["veo-3.0-fast-generate-001".into()],
            }),
            counters: ServiceCounters::new(),
            prometheus: test_prometheus_handle(),
        };
        (build_router(state.clone(), 16, 1024 * 1024), state)
    }

    fn generation_request(subject: &str, image: &[u8]) -> Request<Body> {
        let body = serde_json::json!({
            "subject": subject,
            "image_base64": STANDARD.encode(image),
            "username": "dilnoza",
        });
        Request::builder()
            .method("POST")
            .uri("/v1/generations")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn ndjson(response: Response) -> Vec<serde_json::Value> {
        let body = axum::body::to_bytes(response.into_body(), 16 * 1024 * 1024)
            .await
            .unwrap();
        String::from_utf8(body.to_vec())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn generation_streams_progress_then_delivery() {
        let steps = std::iter::repeat_n(Step::Pending, 4).chain([Step::Done]);
        let (app, state) = app(Arc::new(FakeBackend::new(true, steps, Step::Broken)));

        let response = app
            .oneshot(generation_request("42", &png(16, 9)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/x-ndjson"
        );
        assert!(
            response.headers()["x-request-id"]
                .to_str()
                .unwrap()
                .starts_with("gen_")
        );

        let lines = ndjson(response).await;
        let (last, progress) = lines.split_last().unwrap();
        assert_eq!(last["type"], "delivered");
        assert_eq!(last["video_base64"], "AAEC");
        assert_eq!(last["mime_type"], "video/mp4");
        // Done at t=60s: ticks at 30 and 60 at most
        assert!(!progress.is_empty());
        assert!(progress.iter().all(|l| l["type"] == "progress"));
        assert_eq!(progress[0]["elapsed_secs"], 30);
        assert_eq!(progress[0]["percent"], 90);
        assert_eq!(progress[0]["bar"], "▰▰▰▰▰▰▰▰▰▱");
        assert_eq!(state.counters.in_flight.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn second_generation_is_denied_with_remaining() {
        let (app, _) = app(Arc::new(FakeBackend::new(true, [], Step::Done)));

        let first = app
            .clone()
            .oneshot(generation_request("42", &png(16, 9)))
            .await
            .unwrap();
        assert_eq!(ndjson(first).await.last().unwrap()["type"], "delivered");

        let second = app
            .oneshot(generation_request("42", &png(16, 9)))
            .await
            .unwrap();
        let lines = ndjson(second).await;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["type"], "denied");
        assert_eq!(lines[0]["reason"], "cooldown");
        assert_eq!(lines[0]["remaining_secs"], 6 * 3600);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_streams_failed_line() {
        let (app, _) = app(Arc::new(FakeBackend::new(
            true,
            [Step::Error("audio generation failed")],
            Step::Broken,
        )));
        let response = app
            .oneshot(generation_request("42", &png(16, 9)))
            .await
            .unwrap();
        let lines = ndjson(response).await;
        let last = lines.last().unwrap();
        assert_eq!(last["type"], "failed");
        assert_eq!(last["reason"], "job");
        assert_eq!(last["message"], "audio generation failed");
    }

    #[tokio::test]
    async fn invalid_image_is_bad_request() {
        let (app, _) = app(Arc::new(FakeBackend::new(true, [], Step::Done)));
        let response = app
            .oneshot(generation_request("42", b"definitely not a picture"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_subject_is_bad_request() {
        let (app, _) = app(Arc::new(FakeBackend::new(true, [], Step::Done)));
        let response = app
            .oneshot(generation_request("  ", &png(4, 4)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_subject_is_not_found() {
        let (app, _) = app(Arc::new(FakeBackend::new(true, [], Step::Done)));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/subjects/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn subject_status_reports_cooldown() {
        let (app, _) = app(Arc::new(FakeBackend::new(true, [], Step::Done)));
        let delivered = app
            .clone()
            .oneshot(generation_request("42", &png(16, 9)))
            .await
            .unwrap();
        ndjson(delivered).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/subjects/42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["admission"], "denied");
        assert_eq!(json["usage_count"], 1);
        assert_eq!(json["exempt"], false);
    }

    #[tokio::test]
    async fn health_reports_counters() {
        let (app, _) = app(Arc::new(FakeBackend::new(true, [], Step::Done)));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["in_flight"], 0);
        assert_eq!(json["workers_max"], 4);
    }

    #[tokio::test]
    async fn metrics_endpoint_is_prometheus_text() {
        let (app, _) = app(Arc::new(FakeBackend::new(true, [], Step::Done)));
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_stream_cancels_the_request() {
        let backend = Arc::new(FakeBackend::new(true, [], Step::Pending));
        let (app, state) = app(backend);

        let response = app
            .oneshot(generation_request("42", &png(16, 9)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(state.counters.in_flight.load(Ordering::Relaxed), 1);
        drop(response);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(state.counters.in_flight.load(Ordering::Relaxed), 0);
        // Cancelled requests never charge the cooldown
        let admission = state.orchestrator.admission();
        assert!(admission.check("42", 0).await.unwrap().is_allowed());
    }
}
