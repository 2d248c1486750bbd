//! Service-account authentication for the Vertex AI generation backend
//!
//! Loads a service-account key, signs a JWT-bearer assertion, exchanges it
//! at the token endpoint, and caches the resulting bearer token. This crate
//! has no knowledge of the generation API itself.
//!
//! Token flow:
//! 1. `ServiceAccountKey::load()` reads the key file
//! 2. `ServiceAccountKey::assertion()` signs an RS256 assertion
//! 3. `token::exchange_assertion()` trades it for an access token
//! 4. `CredentialProvider::token()` caches it until shortly before expiry

pub mod constants;
pub mod error;
pub mod provider;
pub mod service_account;
pub mod token;

pub use constants::*;
pub use error::{Error, Result};
pub use provider::{CredentialProvider, IssuedToken, ServiceAccountSource, TokenSource};
pub use service_account::ServiceAccountKey;
pub use token::{TokenResponse, exchange_assertion};
