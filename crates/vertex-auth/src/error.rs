//! Error types for service-account authentication

/// Errors from credential loading and token exchange.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential material missing: {0}")]
    MissingCredentials(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("assertion signing failed: {0}")]
    Signing(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
