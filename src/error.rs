//! Error types for the SSO gateway

use std::io;

use thiserror::Error;

/// Result type alias for the SSO gateway
pub type Result<T> = std::result::Result<T, Error>;

/// SSO gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authorization code exchange (or refresh) rejected or unreachable
    #[error("Authorization exchange failed: {0}")]
    AuthExchange(String),

    /// Identity verification failed after a token was issued
    #[error("Identity verification failed: {0}")]
    IdentityVerification(String),

    /// Callback `state` did not match the one issued with the redirect
    #[error("Authorization state mismatch")]
    StateMismatch,

    /// Session payload could not be written
    #[error("Session error: {0}")]
    Session(String),

    /// Outbound resource request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Resource response body was not the expected JSON
    #[error("Decode error: {0}")]
    Decode(String),

    /// The inbound request was cancelled while an outbound call was pending
    #[error("Request cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error means the user is not (or no longer) authenticated
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthExchange(_) | Self::IdentityVerification(_) | Self::StateMismatch
        )
    }
}
