//! Session gate middleware
//!
//! Runs in front of every route. Requests for the authorization callback or a
//! public path pass straight through. Everything else needs a session holding
//! both a credential and an identity; the pair is attached to the request as a
//! [`SessionScope`]. Without one, the browser is sent to the identity provider
//! with a fresh anti-forgery state.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, header::SET_COOKIE, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::PrivateCookieJar;
use tracing::{debug, info, warn};

use super::error::AppError;
use super::found;
use super::router::AppState;
use crate::cancel::RequestScope;
use crate::config::Config;
use crate::oauth::{Credential, Identity, generate_state};
use crate::session::cookies;
use crate::{Error, Result};

const RESERVED_PATHS: &[&str] = &["/", "/logout", "/health"];

/// Routes that bypass the gate
#[derive(Debug, Clone)]
pub struct GateConfig {
    callback_path: String,
    public_paths: Vec<String>,
}

impl GateConfig {
    /// Create a gate configuration
    #[must_use]
    pub fn new(callback_path: impl Into<String>, public_paths: Vec<String>) -> Self {
        Self {
            callback_path: callback_path.into(),
            public_paths,
        }
    }

    /// Derive the callback route from the registered redirect URL
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the redirect URL does not parse.
    pub fn from_config(config: &Config) -> Result<Self> {
        let callback_path = config.oauth.callback_path()?;
        if RESERVED_PATHS.contains(&callback_path.as_str()) {
            return Err(Error::Config(format!(
                "oauth.redirect_url path {callback_path} collides with a built-in route"
            )));
        }
        Ok(Self::new(callback_path, config.server.public_paths.clone()))
    }

    /// Authorization callback path
    #[must_use]
    pub fn callback_path(&self) -> &str {
        &self.callback_path
    }

    /// Whether `path` is served without a session
    #[must_use]
    pub fn is_exempt(&self, path: &str) -> bool {
        path == self.callback_path
            || self
                .public_paths
                .iter()
                .any(|public| is_path_prefix(public, path))
    }
}

/// `prefix` equals `path` or names one of its ancestor segments
fn is_path_prefix(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Authenticated session attached to a request by [`session_gate`]
#[derive(Debug, Clone)]
pub struct SessionScope {
    /// Verified identity
    pub identity: Identity,
    /// Credential to act with, refreshed if it had expired
    pub credential: Credential,
}

impl<S: Send + Sync> FromRequestParts<S> for SessionScope {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| AppError(Error::Internal("Route is not behind the session gate".to_string())))
    }
}

/// Session gate middleware
pub async fn session_gate(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();

    if state.gate.is_exempt(path) {
        debug!(path = %path, "Exempt path, skipping session gate");
        return next.run(request).await;
    }

    let session = state.tokens.load(&jar).unwrap_or_default();
    let Some((credential, identity)) = session.authenticated() else {
        let pending = cookies::get_state(&jar).is_some();
        debug!(path = %path, state = ?session.state(pending), "No authenticated session");
        return redirect_to_provider(&state, jar);
    };
    let (mut credential, identity) = (credential.clone(), identity.clone());
    let mut jar = jar;

    if credential.is_expired() {
        if !credential.can_refresh() {
            info!(identity_id = identity.id, "Credential expired, re-authorizing");
            return redirect_to_provider(&state, jar);
        }

        let scope = RequestScope::new();
        match state.oauth.refresh(&credential, scope.token()).await {
            Ok(refreshed) => match state.tokens.replace_credential(jar, refreshed.clone()) {
                Ok(updated) => {
                    jar = updated;
                    credential = refreshed;
                }
                Err(e) => return AppError(e).into_response(),
            },
            Err(e) => {
                warn!(identity_id = identity.id, error = %e, "Credential refresh failed, re-authorizing");
                return redirect_to_provider(&state, jar);
            }
        }
    }

    request.extensions_mut().insert(SessionScope {
        identity,
        credential,
    });

    let response = next.run(request).await;

    // A handler that rewrote the session already saw the refreshed credential
    if sets_cookie(&response, state.tokens.cookie_name()) {
        return response;
    }
    (jar, response).into_response()
}

fn sets_cookie(response: &Response, name: &str) -> bool {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split_once('='))
        .any(|(cookie_name, _)| cookie_name.trim() == name)
}

/// `302` to the provider with a new state, remembered in the state cookie
fn redirect_to_provider(state: &AppState, jar: PrivateCookieJar) -> Response {
    let csrf = generate_state();
    match state.oauth.authorize_url(&csrf) {
        Ok(url) => {
            let jar = jar.add(cookies::state_cookie(&csrf, state.tokens.secure()));
            (jar, found(&url)).into_response()
        }
        Err(e) => AppError(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_and_public_paths_are_exempt() {
        let gate = GateConfig::new("/authorize", vec!["/health".to_string()]);

        assert!(gate.is_exempt("/authorize"));
        assert!(gate.is_exempt("/health"));
        assert!(gate.is_exempt("/health/"));
        assert!(gate.is_exempt("/health/live"));
        assert!(!gate.is_exempt("/healthz"));
        assert!(!gate.is_exempt("/health-admin"));
        assert!(!gate.is_exempt("/"));
        assert!(!gate.is_exempt("/logout"));
        assert!(!gate.is_exempt("/authorize/extra"));
    }

    #[test]
    fn callback_path_follows_redirect_url() {
        let mut config = Config::default();
        config.oauth.redirect_url = "https://app.example/sso/callback?x=1".to_string();

        let gate = GateConfig::from_config(&config).unwrap();
        assert_eq!(gate.callback_path(), "/sso/callback");
    }

    #[test]
    fn callback_path_cannot_shadow_routes() {
        let mut config = Config::default();
        config.oauth.redirect_url = "http://localhost:8080/logout".to_string();
        assert!(matches!(GateConfig::from_config(&config), Err(Error::Config(_))));
    }

    #[test]
    fn public_path_with_trailing_slash_matches_segments() {
        let gate = GateConfig::new("/authorize", vec!["/static/".to_string()]);
        assert!(gate.is_exempt("/static"));
        assert!(gate.is_exempt("/static/app.js"));
        assert!(!gate.is_exempt("/statically"));
    }

    #[test]
    fn detects_session_cookie_in_response() {
        let mut response = found("/");
        assert!(!sets_cookie(&response, "session"));

        response
            .headers_mut()
            .append(SET_COOKIE, "__sso_state=; Path=/".parse().unwrap());
        assert!(!sets_cookie(&response, "session"));

        response
            .headers_mut()
            .append(SET_COOKIE, "session=abc; HttpOnly; Path=/".parse().unwrap());
        assert!(sets_cookie(&response, "session"));
    }

    #[tokio::test]
    async fn extractor_rejects_ungated_request() {
        let (mut parts, ()) = Request::new(()).into_parts();
        let result = SessionScope::from_request_parts(&mut parts, &()).await;
        assert!(result.is_err());
    }
}
