//! JWT-bearer token exchange
//!
//! POSTs a signed assertion to the token endpoint as a form and parses the
//! access token response. There is no refresh token in this grant: a new
//! assertion is signed for every exchange.

use serde::{Deserialize, Serialize};

use crate::constants::{EXCHANGE_TIMEOUT_SECS, JWT_BEARER_GRANT};
use crate::error::{Error, Result};

/// Response from the token endpoint.
///
/// `expires_in` is a delta in seconds from the response time; the caller
/// turns it into an absolute expiry.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Exchange a signed assertion for an access token.
pub async fn exchange_assertion(
    client: &reqwest::Client,
    token_uri: &str,
    assertion: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)])
        .timeout(std::time::Duration::from_secs(EXCHANGE_TIMEOUT_SECS))
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        // invalid_grant (400) and 401/403 mean the key itself is rejected
        if matches!(status.as_u16(), 400 | 401 | 403) {
            return Err(Error::InvalidCredentials(format!(
                "assertion rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}
