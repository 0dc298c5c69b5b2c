//! Error taxonomy for REST operations

use thiserror::Error;

/// Failures surfaced by the REST surface.
///
/// `AuthExpired` is the only variant that propagates to session teardown;
/// everything else is recovered locally (empty defaults) by the caller.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication expired -- run 'feedchat-cli login'")]
    AuthExpired,

    #[error("network failure: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },
}

impl ApiError {
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ApiError::AuthExpired)
    }
}
