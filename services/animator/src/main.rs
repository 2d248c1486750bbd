//! Veo Animator
//!
//! Single-binary service that turns a still photo into a short video:
//! 1. Admits the request against the subject's cooldown
//! 2. Submits the job to Vertex AI, falling back across candidate models
//! 3. Polls the long-running operation while streaming progress
//! 4. Delivers the video and charges the cooldown only on success

mod admin;
mod config;
mod error;
mod http;
mod metrics;
mod orchestrator;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use admission::{AdmissionController, CooldownPolicy, JsonFileStore, MemoryStore, SubjectStore};
use anyhow::{Context, Result};
use common::{Clock, SystemClock};
use generation::{JobPoller, JobSubmitter, ProgressReporter, VertexBackend, WorkerPool};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vertex_auth::{CredentialProvider, ServiceAccountSource};

use crate::admin::{AdminState, build_admin_router};
use crate::config::Config;
use crate::http::{AppState, RequestDefaults, ServiceCounters, build_router};
use crate::orchestrator::Orchestrator;

/// Upper bound on graceful shutdown once the signal arrives. Open
/// generation streams still running at the deadline are cut off.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the subject store the config asks for.
async fn open_store(config: &Config) -> Result<Arc<dyn SubjectStore>> {
    let path = &config.admission.store_path;
    if path.as_os_str().is_empty() {
        warn!("admission.store_path is empty, subject records are kept in memory only");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = JsonFileStore::load(path.clone())
        .await
        .with_context(|| format!("failed to open subject store {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Wire every component from configuration.
async fn build_orchestrator(
    config: &Config,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
) -> Result<Orchestrator> {
    let source = Arc::new(ServiceAccountSource::new(
        config.auth.service_account_file.clone(),
        client.clone(),
        clock.clone(),
    ));
    let credentials = Arc::new(CredentialProvider::new(
        source,
        clock.clone(),
        Duration::from_secs(config.auth.refresh_margin_secs),
    ));

    let backend = Arc::new(VertexBackend::new(
        client,
        config.backend.endpoint_template.clone(),
        config.backend.project_id.clone(),
        config.backend.location.clone(),
    ));
    let submitter = Arc::new(JobSubmitter::new(
        credentials.clone(),
        backend.clone(),
        Duration::from_secs(config.backend.attempt_timeout_secs),
    ));
    let poller = Arc::new(JobPoller::new(
        credentials,
        backend,
        config.poll.to_poll_config(),
    ));
    let reporter = ProgressReporter::new(config.progress.to_progress_config());

    let policy = CooldownPolicy::new(
        Duration::from_secs(config.admission.cooldown_secs),
        config.admission.exempt_subjects.iter().cloned(),
    );
    let admission = Arc::new(AdmissionController::new(
        policy,
        open_store(config).await?,
        config.admission.reserve_on_submit,
    ));

    Ok(Orchestrator::new(
        admission,
        submitter,
        poller,
        reporter,
        WorkerPool::new(config.workers.max_concurrent_jobs),
        clock,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting veo-animator");

    // Install before any metric is emitted
    let prometheus_handle = metrics::install_recorder();

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        project_id = %config.backend.project_id,
        location = %config.backend.location,
        candidates = ?config.backend.candidates,
        cooldown_secs = config.admission.cooldown_secs,
        workers = config.workers.max_concurrent_jobs,
        "configuration loaded"
    );

    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let orchestrator = Arc::new(build_orchestrator(&config, client, clock.clone()).await?);

    let counters = ServiceCounters::new();
    let app_state = AppState {
        orchestrator: orchestrator.clone(),
        defaults: Arc::new(RequestDefaults {
            prompt: config.backend.default_prompt.clone(),
            duration_secs: config.backend.default_duration_secs,
            candidates: config.backend.candidates.clone(),
        }),
        counters: counters.clone(),
        prometheus: prometheus_handle,
    };
    let app = build_router(
        app_state,
        config.server.max_connections,
        config.server.max_body_bytes,
    );

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    if let Some(admin) = &config.admin {
        let admin_listener = TcpListener::bind(admin.listen_addr)
            .await
            .with_context(|| format!("failed to bind admin listener to {}", admin.listen_addr))?;
        let admin_app = build_admin_router(AdminState::new(
            orchestrator.admission().clone(),
            clock.clone(),
        ));
        info!(addr = %admin.listen_addr, "admin API listening");
        // Dies with the process; nothing to drain
        tokio::spawn(async move {
            if let Err(e) = axum::serve(admin_listener, admin_app).await {
                error!(error = %e, "admin server failed");
            }
        });
    }

    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = counters.in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn config_with_store(store_path: &str) -> Config {
        let _lock = crate::config::tests::ENV_MUTEX
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Config::from_toml(&format!(
            r#"
[backend]
project_id = "demo-project"

[admission]
store_path = "{store_path}"
exempt_subjects = ["1"]

[workers]
max_concurrent_jobs = 3
"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn builds_with_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subjects.json");
        let config = config_with_store(path.to_str().unwrap());

        let orchestrator = build_orchestrator(&config, reqwest::Client::new(), Arc::new(SystemClock))
            .await
            .unwrap();

        // Missing store file is created empty
        assert!(path.exists());
        assert_eq!(orchestrator.workers().size(), 3);
        assert!(orchestrator.admission().policy().is_exempt("1"));
    }

    #[tokio::test]
    async fn empty_store_path_keeps_records_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_store("");

        let orchestrator = build_orchestrator(&config, reqwest::Client::new(), Arc::new(SystemClock))
            .await
            .unwrap();
        orchestrator
            .admission()
            .touch("42", Default::default(), 0)
            .await
            .unwrap();
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn corrupt_store_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subjects.json");
        std::fs::write(&path, "{ not json").unwrap();
        let config = config_with_store(path.to_str().unwrap());

        let err = build_orchestrator(&config, reqwest::Client::new(), Arc::new(SystemClock))
            .await
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("failed to open subject store"));
    }

    #[tokio::test]
    async fn wired_router_serves_health() {
        let config = config_with_store("");
        let orchestrator = build_orchestrator(&config, reqwest::Client::new(), Arc::new(SystemClock))
            .await
            .unwrap();
        let state = AppState {
            orchestrator: Arc::new(orchestrator),
            defaults: Arc::new(RequestDefaults {
                prompt: config.backend.default_prompt.clone(),
                duration_secs: config.backend.default_duration_secs,
                candidates: config.backend.candidates.clone(),
            }),
            counters: ServiceCounters::new(),
            prometheus: metrics_exporter_prometheus::PrometheusBuilder::new()
                .build_recorder()
                .handle(),
        };
        let app = build_router(state, 8, config.server.max_body_bytes);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["workers_max"], 3);
        assert_eq!(json["requests_served"], 0);
    }
}
