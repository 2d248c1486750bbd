//! Cached bearer tokens with single-flight refresh
//!
//! `CredentialProvider` owns the only copy of the current token. The cache
//! sits behind a tokio `Mutex` that is held across the exchange, so when the
//! token goes stale exactly one caller performs the refresh and everyone
//! queued behind it wakes up to the fresh token.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use common::{Clock, Secret};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::constants::{CLOUD_PLATFORM_SCOPE, EXCHANGE_TIMEOUT_SECS};
use crate::error::{Error, Result};
use crate::service_account::ServiceAccountKey;
use crate::token::exchange_assertion;

/// A freshly issued token and its lifetime.
#[derive(Debug)]
pub struct IssuedToken {
    pub access_token: Secret<String>,
    pub expires_in: Duration,
}

/// Performs one credential exchange.
///
/// Uses `Pin<Box<dyn Future>>` so the provider can hold an `Arc<dyn TokenSource>`.
pub trait TokenSource: Send + Sync {
    fn issue(&self) -> Pin<Box<dyn Future<Output = Result<IssuedToken>> + Send + '_>>;
}

/// Token source backed by a service-account key file.
///
/// The key is re-read on every exchange so a rotated key file is picked up
/// at the next refresh without a restart.
pub struct ServiceAccountSource {
    key_path: PathBuf,
    scope: String,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl ServiceAccountSource {
    pub fn new(key_path: PathBuf, client: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        Self {
            key_path,
            scope: CLOUD_PLATFORM_SCOPE.to_string(),
            client,
            clock,
        }
    }
}

impl TokenSource for ServiceAccountSource {
    fn issue(&self) -> Pin<Box<dyn Future<Output = Result<IssuedToken>> + Send + '_>> {
        Box::pin(async move {
            let key = ServiceAccountKey::load(&self.key_path).await?;
            let assertion = key.assertion(&self.scope, self.clock.now_ms() / 1000)?;
            let response = exchange_assertion(&self.client, &key.token_uri, &assertion).await?;
            Ok(IssuedToken {
                access_token: Secret::new(response.access_token),
                expires_in: Duration::from_secs(response.expires_in),
            })
        })
    }
}

struct CachedToken {
    token: Secret<String>,
    expires_at_ms: u64,
}

/// Bearer token cache shared by every request in the process.
pub struct CredentialProvider {
    source: Arc<dyn TokenSource>,
    clock: Arc<dyn Clock>,
    margin: Duration,
    exchange_timeout: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl CredentialProvider {
    pub fn new(source: Arc<dyn TokenSource>, clock: Arc<dyn Clock>, margin: Duration) -> Self {
        Self {
            source,
            clock,
            margin,
            exchange_timeout: Duration::from_secs(EXCHANGE_TIMEOUT_SECS),
            cached: Mutex::new(None),
        }
    }

    /// Bound each exchange to `timeout`. Callers queued on the cache lock
    /// wait at most this long for a refresh in progress.
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    /// Return a token valid for at least `margin`, refreshing if needed.
    ///
    /// A failed exchange leaves the cache empty and is returned to the
    /// caller as-is; the next caller attempts a new exchange.
    pub async fn token(&self) -> Result<Secret<String>> {
        let mut cached = self.cached.lock().await;
        let now_ms = self.clock.now_ms();
        let margin_ms = self.margin.as_millis() as u64;

        if let Some(current) = cached.as_ref() {
            if now_ms + margin_ms < current.expires_at_ms {
                return Ok(current.token.clone());
            }
            debug!(
                expires_in_ms = current.expires_at_ms.saturating_sub(now_ms),
                "cached token inside refresh margin"
            );
        }

        let exchange = tokio::time::timeout(self.exchange_timeout, self.source.issue());
        let result = exchange.await.unwrap_or_else(|_| {
            Err(Error::TokenExchange(format!(
                "token exchange timed out after {}s",
                self.exchange_timeout.as_secs()
            )))
        });
        let issued = match result {
            Ok(issued) => issued,
            Err(e) => {
                *cached = None;
                warn!(error = %e, "token exchange failed");
                return Err(e);
            }
        };

        let expires_at_ms = now_ms + issued.expires_in.as_millis() as u64;
        let token = issued.access_token.clone();
        *cached = Some(CachedToken {
            token: issued.access_token,
            expires_at_ms,
        });
        info!(
            expires_in_secs = issued.expires_in.as_secs(),
            "access token refreshed"
        );
        Ok(token)
    }

    /// Drop the cached token so the next `token()` call exchanges again.
    ///
    /// Called when the backend rejects a token the cache still considered valid.
    pub async fn invalidate(&self) {
        let mut cached = self.cached.lock().await;
        if cached.take().is_some() {
            debug!("cached token invalidated");
        }
    }
}
