//! SSO Gateway Library
//!
//! Session-gated OAuth2 gateway in front of a remote REST API.
//!
//! # Features
//!
//! - **Session gate**: every route except the authorization callback and
//!   public paths requires a verified identity, otherwise the browser is
//!   redirected to the identity provider
//! - **Authorization code flow**: code exchange, identity verification,
//!   anti-forgery state and transparent credential refresh
//! - **Encrypted sessions**: credential and identity live in a private cookie
//! - **Caching transport**: outbound GETs are cached and revalidated per
//!   HTTP caching rules, shared by every session
//! - **Typed resource API**: listing and detail lookups decoded into records

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod cache;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod oauth;
pub mod session;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`.
///
/// # Errors
///
/// Returns [`Error::Internal`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
