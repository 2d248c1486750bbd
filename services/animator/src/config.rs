//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. The project id,
//! location and service-account key path may come from the `GOOGLE_*`
//! variables used by existing deployments. The key itself is never read
//! here; `vertex-auth` loads it at token-exchange time.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use generation::{DEFAULT_CANDIDATES, DEFAULT_DURATION_SECS, DEFAULT_ENDPOINT_TEMPLATE};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub admin: Option<AdminConfig>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub poll: PollSection,
    #[serde(default)]
    pub progress: ProgressSection,
    #[serde(default)]
    pub admission: AdmissionSection,
    #[serde(default)]
    pub workers: WorkersConfig,
}

/// Public HTTP listener
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Largest accepted request body, base64 image included
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Admin listener. Absent means no admin API.
#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    pub listen_addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_service_account_file")]
    pub service_account_file: PathBuf,
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            service_account_file: default_service_account_file(),
            refresh_margin_secs: default_refresh_margin(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_endpoint_template")]
    pub endpoint_template: String,
    /// Candidate models in fallback order
    #[serde(default = "default_candidates")]
    pub candidates: Vec<String>,
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_duration")]
    pub default_duration_secs: u32,
    #[serde(default = "default_prompt")]
    pub default_prompt: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            location: default_location(),
            endpoint_template: default_endpoint_template(),
            candidates: default_candidates(),
            attempt_timeout_secs: default_attempt_timeout(),
            default_duration_secs: default_duration(),
            default_prompt: default_prompt(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PollSection {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_poll_budget")]
    pub budget_secs: u64,
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_status_timeout")]
    pub status_timeout_secs: u64,
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            budget_secs: default_poll_budget(),
            max_consecutive_failures: default_max_failures(),
            status_timeout_secs: default_status_timeout(),
        }
    }
}

impl PollSection {
    pub fn to_poll_config(&self) -> generation::PollConfig {
        generation::PollConfig {
            interval: Duration::from_secs(self.interval_secs),
            budget: Duration::from_secs(self.budget_secs),
            max_consecutive_failures: self.max_consecutive_failures,
            status_timeout: Duration::from_secs(self.status_timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProgressSection {
    #[serde(default = "default_progress_period")]
    pub period_secs: u64,
}

impl Default for ProgressSection {
    fn default() -> Self {
        Self {
            period_secs: default_progress_period(),
        }
    }
}

impl ProgressSection {
    pub fn to_progress_config(&self) -> generation::ProgressConfig {
        generation::ProgressConfig {
            period: Duration::from_secs(self.period_secs),
            ..generation::ProgressConfig::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AdmissionSection {
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Subjects never subject to the cooldown
    #[serde(default)]
    pub exempt_subjects: Vec<String>,
    /// JSON subject store. An empty path keeps records in memory only.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default)]
    pub reserve_on_submit: bool,
}

impl Default for AdmissionSection {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
            exempt_subjects: Vec::new(),
            store_path: default_store_path(),
            reserve_on_submit: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_max_jobs")]
    pub max_concurrent_jobs: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_jobs(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_max_connections() -> usize {
    256
}

fn default_max_body_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_service_account_file() -> PathBuf {
    PathBuf::from("service-account.json")
}

fn default_refresh_margin() -> u64 {
    vertex_auth::DEFAULT_REFRESH_MARGIN_SECS
}

fn default_location() -> String {
    "us-central1".into()
}

fn default_endpoint_template() -> String {
    DEFAULT_ENDPOINT_TEMPLATE.into()
}

fn default_candidates() -> Vec<String> {
    DEFAULT_CANDIDATES.iter().map(|c| c.to_string()).collect()
}

fn default_attempt_timeout() -> u64 {
    60
}

fn default_duration() -> u32 {
    DEFAULT_DURATION_SECS
}

fn default_prompt() -> String {
    "Bring the person in the photo to life. Natural blinking, gentle breathing and a warm, \
     genuine smile; subtle head movement and soft portrait lighting. Photorealistic, \
     cinematic depth of field."
        .into()
}

fn default_poll_interval() -> u64 {
    15
}

fn default_poll_budget() -> u64 {
    1200
}

fn default_max_failures() -> u32 {
    10
}

fn default_status_timeout() -> u64 {
    40
}

fn default_progress_period() -> u64 {
    30
}

fn default_cooldown() -> u64 {
    6 * 3600
}

fn default_store_path() -> PathBuf {
    PathBuf::from("subjects.json")
}

fn default_max_jobs() -> usize {
    32
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text, with env overrides.
    pub fn from_toml(contents: &str) -> common::Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(project) = std::env::var("GOOGLE_PROJECT_ID") {
            self.backend.project_id = project;
        }
        if let Ok(location) = std::env::var("GOOGLE_LOCATION") {
            self.backend.location = location;
        }
        if let Ok(file) = std::env::var("GOOGLE_SERVICE_ACCOUNT_FILE") {
            self.auth.service_account_file = PathBuf::from(file);
        }
    }

    fn validate(&self) -> common::Result<()> {
        let invalid = |msg: &str| Err(common::Error::Config(msg.to_string()));

        if self.backend.project_id.trim().is_empty() {
            return invalid("backend.project_id is required (or set GOOGLE_PROJECT_ID)");
        }
        if self.backend.location.trim().is_empty() {
            return invalid("backend.location must not be empty");
        }
        if !self.backend.endpoint_template.starts_with("http://")
            && !self.backend.endpoint_template.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "backend.endpoint_template must start with http:// or https://, got: {}",
                self.backend.endpoint_template
            )));
        }
        if !self.backend.endpoint_template.contains("{model}") {
            return invalid("backend.endpoint_template must contain {model}");
        }
        if self.backend.candidates.is_empty() {
            return invalid("backend.candidates must list at least one model");
        }
        if self.backend.attempt_timeout_secs == 0 {
            return invalid("backend.attempt_timeout_secs must be greater than 0");
        }
        if self.backend.default_duration_secs == 0 {
            return invalid("backend.default_duration_secs must be greater than 0");
        }
        if self.poll.interval_secs == 0 {
            return invalid("poll.interval_secs must be greater than 0");
        }
        if self.poll.budget_secs == 0 {
            return invalid("poll.budget_secs must be greater than 0");
        }
        if self.poll.max_consecutive_failures == 0 {
            return invalid("poll.max_consecutive_failures must be greater than 0");
        }
        if self.poll.status_timeout_secs == 0 {
            return invalid("poll.status_timeout_secs must be greater than 0");
        }
        if self.progress.period_secs < self.poll.interval_secs {
            return invalid("progress.period_secs must be at least poll.interval_secs");
        }
        if self.server.max_connections == 0 {
            return invalid("server.max_connections must be greater than 0");
        }
        if self.workers.max_concurrent_jobs == 0 {
            return invalid("workers.max_concurrent_jobs must be greater than 0");
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("veo-animator.toml")
    }
}
