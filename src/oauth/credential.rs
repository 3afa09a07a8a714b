//! Credential and identity types
//!
//! Both are stored inside the encrypted session cookie and never anywhere else.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Seconds before the real expiry at which a credential is treated as expired
const EXPIRY_SKEW_SECS: u64 = 60;

/// OAuth credential issued by the identity provider
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer access token
    pub access_token: String,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Refresh token (optional)
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Expiration time (Unix timestamp)
    #[serde(default)]
    pub expires_at: Option<u64>,

    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl Credential {
    /// Create a credential from a token endpoint response
    pub fn from_response(
        access_token: String,
        token_type: Option<String>,
        refresh_token: Option<String>,
        expires_in: Option<u64>,
        scope: Option<String>,
    ) -> Self {
        Self {
            access_token,
            token_type: token_type.unwrap_or_else(default_token_type),
            refresh_token,
            expires_at: expires_in.map(|secs| now_secs().saturating_add(secs)),
            scope,
        }
    }

    /// Check if the credential is expired (with 60 second buffer)
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| now_secs().saturating_add(EXPIRY_SKEW_SECS) >= expires_at)
    }

    /// Whether an expired credential can be renewed without the user
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    /// Time until expiration
    pub fn time_until_expiry(&self) -> Option<Duration> {
        let now = now_secs();
        self.expires_at
            .filter(|expires_at| *expires_at > now)
            .map(|expires_at| Duration::from_secs(expires_at - now))
    }
}

// Tokens must not end up in logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token_type", &self.token_type)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Authenticated user as reported by the verification endpoint
///
/// Accepts both the generic `{id, name}` shape and the provider's
/// `{CharacterID, CharacterName}` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable numeric identifier
    #[serde(alias = "CharacterID")]
    pub id: u64,
    /// Display name
    #[serde(alias = "CharacterName")]
    pub name: String,
}
