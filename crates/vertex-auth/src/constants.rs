//! OAuth constants for Google service-account authentication

/// Default token endpoint, used when the key file has no `token_uri`
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Scope required for Vertex AI prediction calls
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Grant type for the JWT-bearer exchange (RFC 7523)
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each signed assertion. Google caps this at one hour.
pub const ASSERTION_LIFETIME_SECS: u64 = 3600;

/// Upper bound on one token exchange, including reading the key file
pub const EXCHANGE_TIMEOUT_SECS: u64 = 30;

/// Default margin before expiry at which a cached token is treated as stale
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 300;
