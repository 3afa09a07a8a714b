//! OAuth Client
//!
//! Authorization-code exchange and identity verification against the
//! configured identity provider.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use super::credential::{Credential, Identity};
use crate::cancel::cancellable;
use crate::config::OAuthConfig;
use crate::{Error, Result};

/// OAuth client for the identity provider
pub struct OAuthClient {
    /// HTTP client for token and verification requests
    http_client: Client,

    /// Provider endpoints and client registration
    config: OAuthConfig,
}

/// OAuth token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

impl OAuthClient {
    /// Create a new OAuth client
    #[must_use]
    pub fn new(http_client: Client, config: OAuthConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    /// Provider configuration this client was built with
    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the authorization URL the browser is redirected to
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the authorize endpoint is not a valid URL.
    pub fn authorize_url(&self, state: &str) -> Result<String> {
        let mut auth_url = Url::parse(&self.config.authorize_url)
            .map_err(|e| Error::Config(format!("Invalid auth endpoint: {e}")))?;

        {
            let mut params = auth_url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", &self.config.redirect_url);
            if !self.config.scopes.is_empty() {
                params.append_pair("scope", &self.config.scopes.join(" "));
            }
            params.append_pair("state", state);
        }

        Ok(auth_url.to_string())
    }

    /// Exchange an authorization code for a credential.
    ///
    /// Codes are single-use, so failures are never retried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthExchange`] on network failure, provider rejection or
    /// an undecodable token response.
    pub async fn exchange(&self, code: &str, cancel: &CancellationToken) -> Result<Credential> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_url.as_str()),
        ];

        let token = cancellable(cancel, self.token_request(&params)).await?;
        info!(expires_in = ?token.time_until_expiry(), "Authorization code exchanged");
        Ok(token)
    }

    /// Verify a credential and fetch the identity it belongs to
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityVerification`] on network, status or decode failure.
    pub async fn verify_identity(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Identity> {
        let request = async {
            let response = self
                .http_client
                .get(&self.config.verify_url)
                .bearer_auth(&credential.access_token)
                .send()
                .await
                .map_err(|e| Error::IdentityVerification(format!("Request failed: {e}")))?;

            if !response.status().is_success() {
                return Err(Error::IdentityVerification(format!(
                    "HTTP {}",
                    response.status()
                )));
            }

            response
                .json::<Identity>()
                .await
                .map_err(|e| Error::IdentityVerification(format!("Failed to parse identity: {e}")))
        };

        let identity = cancellable(cancel, request).await?;
        debug!(identity_id = identity.id, "Identity verified");
        Ok(identity)
    }

    /// Exchange a code and verify the resulting credential, strictly in that order.
    ///
    /// Nothing is returned unless both steps succeed.
    ///
    /// # Errors
    ///
    /// Propagates the first failing step's error.
    pub async fn establish(
        &self,
        code: &str,
        cancel: &CancellationToken,
    ) -> Result<(Credential, Identity)> {
        let credential = self.exchange(code, cancel).await?;
        let identity = self.verify_identity(&credential, cancel).await?;
        Ok((credential, identity))
    }

    /// Obtain a replacement for an expired credential using its refresh token
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthExchange`] if there is no refresh token or the provider
    /// rejects it.
    pub async fn refresh(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Credential> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::AuthExchange("No refresh token".to_string()))?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let mut token = cancellable(cancel, self.token_request(&params)).await?;
        // Providers may omit the refresh token when it is unchanged
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }

        info!("Credential refreshed successfully");
        Ok(token)
    }

    /// POST a grant to the token endpoint with HTTP Basic client authentication
    async fn token_request(&self, params: &[(&str, &str)]) -> Result<Credential> {
        let response = self
            .http_client
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(params)
            .send()
            .await
            .map_err(|e| Error::AuthExchange(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AuthExchange(format!("HTTP {status} - {body}")));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::AuthExchange(format!("Failed to parse token response: {e}")))?;

        Ok(Credential::from_response(
            token_response.access_token,
            token_response.token_type,
            token_response.refresh_token,
            token_response.expires_in,
            token_response.scope,
        ))
    }
}

/// Generate a random anti-forgery state parameter
#[must_use]
pub fn generate_state() -> String {
    let state_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OAuthClient {
        let config = OAuthConfig {
            client_id: "my-client".to_string(),
            client_secret: "my-secret".to_string(),
            authorize_url: "https://provider.example/oauth/authorize".to_string(),
            redirect_url: "http://localhost:8080/authorize".to_string(),
            scopes: vec!["read".to_string(), "write".to_string()],
            ..Default::default()
        };
        OAuthClient::new(Client::new(), config)
    }

    #[test]
    fn authorize_url_carries_client_and_state() {
        let url = Url::parse(&client().authorize_url("xyz").unwrap()).unwrap();
        assert_eq!(url.host_str(), Some("provider.example"));
        assert_eq!(url.path(), "/oauth/authorize");

        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "my-client");
        assert_eq!(params["redirect_uri"], "http://localhost:8080/authorize");
        assert_eq!(params["scope"], "read write");
        assert_eq!(params["state"], "xyz");
        assert!(!params.contains_key("client_secret"));
    }

    #[test]
    fn state_is_base64url_safe() {
        for _ in 0..10 {
            let state = generate_state();
            assert!(!state.contains('+'));
            assert!(!state.contains('/'));
            assert!(!state.contains('='));
            assert!(!state.is_empty());
        }
    }

    #[test]
    fn state_generates_unique_values() {
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn state_has_sufficient_length() {
        // 16 random bytes -> 22 base64url chars
        assert_eq!(generate_state().len(), 22);
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_fails() {
        let credential = Credential::from_response("t".to_string(), None, None, Some(0), None);
        let err = client()
            .refresh(&credential, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthExchange(_)));
    }
}
