//! Error types of the GitHub adapter.

use thiserror::Error;

/// Failures while setting up the GitHub transport.
///
/// Request-time failures are reported as [`tap::TransportError`] instead, so
/// the engine can judge them.
#[derive(Debug, Error)]
pub enum GithubError {
    /// A configured value cannot be sent as the named HTTP header.
    #[error("invalid value for the {0} header")]
    InvalidHeader(&'static str),

    /// The HTTP client could not be constructed.
    #[error("failed to build the HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
