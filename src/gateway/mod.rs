//! Gateway server implementation

mod error;
pub mod gate;
mod router;
mod server;

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

pub use error::AppError;
pub use gate::{GateConfig, SessionScope, session_gate};
pub use router::{AppState, create_router};
pub use server::Gateway;

/// Plain `302 Found` redirect
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}
