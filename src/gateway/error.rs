//! HTTP mapping of gateway errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, info, warn};

use crate::Error;

/// Error returned by handlers and the session gate.
///
/// Clients only ever see a generic status line; the cause goes to the log.
#[derive(Debug)]
pub struct AppError(pub Error);

impl AppError {
    /// Status code the error maps to
    #[must_use]
    pub fn status(&self) -> StatusCode {
        if self.0.is_auth_failure() {
            StatusCode::UNAUTHORIZED
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self.0 {
            Error::Cancelled => info!("Client went away before the response was ready"),
            e if e.is_auth_failure() => warn!(error = %e, "Authorization failed"),
            e => error!(error = %e, "Request failed"),
        }

        let body = match status {
            StatusCode::UNAUTHORIZED => "Unauthorized",
            _ => "Internal Server Error",
        };
        (status, body).into_response()
    }
}
