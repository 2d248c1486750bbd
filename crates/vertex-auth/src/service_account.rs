//! Service-account key file loading and assertion signing
//!
//! The key file is the JSON document Google issues for a service account.
//! Only the fields needed for the JWT-bearer grant are read; the private key
//! is held in a `Secret` from the moment it is parsed.

use std::path::Path;

use common::Secret;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{ASSERTION_LIFETIME_SECS, TOKEN_ENDPOINT};
use crate::error::{Error, Result};

#[derive(Deserialize)]
struct RawKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
}

/// Parsed service-account key.
#[derive(Debug, Clone)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key_id: Option<String>,
    pub token_uri: String,
    pub project_id: Option<String>,
    private_key: Secret<String>,
}

/// Claims of the signed assertion posted to the token endpoint.
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

impl ServiceAccountKey {
    /// Read and parse a key file.
    ///
    /// A missing file is `MissingCredentials`; a malformed one is
    /// `CredentialParse`. Neither is retried.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::MissingCredentials(format!(
                    "service account file not found: {}",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(Error::MissingCredentials(format!(
                    "reading {}: {e}",
                    path.display()
                )));
            }
        };
        let key = Self::from_json(&contents)?;
        debug!(path = %path.display(), client_email = %key.client_email, "loaded service account key");
        Ok(key)
    }

    /// Parse a key from its JSON text.
    pub fn from_json(contents: &str) -> Result<Self> {
        let raw: RawKey = serde_json::from_str(contents)
            .map_err(|e| Error::CredentialParse(format!("parsing service account key: {e}")))?;
        if raw.client_email.is_empty() || raw.private_key.is_empty() {
            return Err(Error::CredentialParse(
                "service account key has empty client_email or private_key".into(),
            ));
        }
        Ok(Self {
            client_email: raw.client_email,
            private_key_id: raw.private_key_id,
            token_uri: raw.token_uri.unwrap_or_else(|| TOKEN_ENDPOINT.to_string()),
            project_id: raw.project_id,
            private_key: Secret::new(raw.private_key),
        })
    }

    /// Sign an RS256 assertion for `scope`, issued at `now_secs`.
    pub fn assertion(&self, scope: &str, now_secs: u64) -> Result<String> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope,
            aud: &self.token_uri,
            iat: now_secs,
            exp: now_secs + ASSERTION_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.expose().as_bytes())
            .map_err(|e| Error::Signing(format!("invalid private key: {e}")))?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();
        jsonwebtoken::encode(&header, &claims, &key).map_err(|e| Error::Signing(e.to_string()))
    }
}
