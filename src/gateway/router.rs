//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRef, Query, State},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::{PrivateCookieJar, cookie::Key};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use super::error::AppError;
use super::found;
use super::gate::{GateConfig, SessionScope, session_gate};
use crate::api::{ResourceApi, ResourceDetail, ResourceSummary};
use crate::cache::CachingTransport;
use crate::cancel::RequestScope;
use crate::config::{ApiConfig, Config};
use crate::oauth::{Credential, Identity, OAuthClient};
use crate::session::{TokenStore, cookies};
use crate::{Error, Result};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Identity provider client
    pub oauth: Arc<OAuthClient>,
    /// Session cookie store
    pub tokens: Arc<TokenStore>,
    /// Outbound transport shared by every resource call
    pub transport: Arc<CachingTransport>,
    /// Resource API endpoints
    pub api_config: Arc<ApiConfig>,
    /// Routes exempt from the session gate
    pub gate: Arc<GateConfig>,
    /// Session cookie encryption key
    pub key: Key,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.key.clone()
    }
}

impl AppState {
    /// Build state from validated configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the session key or redirect URL is invalid,
    /// or the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.api.timeout)
            .user_agent(config.api.user_agent.as_str())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            oauth: Arc::new(OAuthClient::new(http_client.clone(), config.oauth.clone())),
            tokens: Arc::new(TokenStore::new(&config.session)),
            transport: Arc::new(CachingTransport::new(http_client, &config.cache)),
            api_config: Arc::new(config.api.clone()),
            gate: Arc::new(GateConfig::from_config(config)?),
            key: config.session.resolve_key()?,
        })
    }
}

/// Create the router
pub fn create_router(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route(state.gate.callback_path(), get(authorize_handler))
        .route("/logout", get(logout_handler))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn_with_state(state.clone(), session_gate))
        .layer(TimeoutLayer::new(config.server.request_timeout))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// One listed resource with its detail record
#[derive(Debug, Serialize)]
struct ResourceView {
    #[serde(flatten)]
    summary: ResourceSummary,
    detail: ResourceDetail,
}

#[derive(Debug, Serialize)]
struct IndexView {
    identity: Identity,
    resources: Vec<ResourceView>,
}

/// GET / - the identity's resources with their details
async fn index_handler(
    State(state): State<AppState>,
    scope: SessionScope,
) -> std::result::Result<Json<IndexView>, AppError> {
    let request = RequestScope::new();
    let SessionScope {
        identity,
        credential,
    } = scope;

    let api = ResourceApi::new(
        Arc::clone(&state.transport),
        Arc::clone(&state.api_config),
        credential,
        request.token().clone(),
    );

    let refs = api.list_owned_resources(&identity).await?;
    let details = api.resolve_details(&refs).await?;

    let resources = refs
        .into_iter()
        .zip(details)
        .map(|(r, detail)| ResourceView {
            summary: r.into_summary(),
            detail,
        })
        .collect();

    Ok(Json(IndexView {
        identity,
        resources,
    }))
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Authorization callback - exchange the code, verify, store the session
async fn authorize_handler(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let expected = cookies::get_state(&jar);
    let jar = jar.remove(cookies::clear_state_cookie());
    let request = RequestScope::new();

    match complete_authorization(&state.oauth, expected.as_deref(), params, request.token()).await
    {
        Ok((credential, identity)) => {
            info!(identity_id = identity.id, name = %identity.name, "Authorization complete");
            match state.tokens.save(jar, credential, identity) {
                Ok(jar) => (jar, found("/")).into_response(),
                Err(e) => AppError(e).into_response(),
            }
        }
        Err(e) => (jar, AppError(e)).into_response(),
    }
}

async fn complete_authorization(
    oauth: &OAuthClient,
    expected_state: Option<&str>,
    params: CallbackParams,
    cancel: &CancellationToken,
) -> Result<(Credential, Identity)> {
    if let Some(error) = params.error {
        let description = params.error_description.unwrap_or_default();
        return Err(Error::AuthExchange(format!(
            "Provider returned {error}: {description}"
        )));
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::AuthExchange("Missing authorization code".to_string()))?;

    let state_matches = match (expected_state, params.state.as_deref()) {
        (Some(expected), Some(received)) => bool::from(expected.as_bytes().ct_eq(received.as_bytes())),
        _ => false,
    };
    if !state_matches {
        warn!(has_cookie = expected_state.is_some(), "Authorization state mismatch");
        return Err(Error::StateMismatch);
    }

    oauth.establish(&code, cancel).await
}

/// GET /logout - forget the identity, keep the credential
///
/// The scope's credential is the one the gate may just have refreshed; it
/// replaces whatever the request cookie carried.
async fn logout_handler(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    scope: SessionScope,
) -> std::result::Result<Response, AppError> {
    let jar = state.tokens.clear_identity(jar)?;
    let jar = state.tokens.replace_credential(jar, scope.credential)?;
    info!(identity_id = scope.identity.id, "Logged out");
    Ok((jar, found("/")).into_response())
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "cache": state.transport.stats(),
    }))
}
