//! OAuth 2.0 client for the identity provider
//!
//! Implements the authorization-code flow used by the browser login:
//! - Authorization URL with anti-forgery `state`
//! - Code exchange at the token endpoint
//! - Identity verification with the issued credential
//! - Credential refresh

mod client;
mod credential;

pub use client::{OAuthClient, generate_state};
pub use credential::{Credential, Identity};
