//! Configuration management

use std::{env, path::Path, time::Duration};

use axum_extra::extract::cookie::Key;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Identity provider configuration
    pub oauth: OAuthConfig,
    /// Session cookie configuration
    pub session: SessionConfig,
    /// Remote resource API configuration
    pub api: ApiConfig,
    /// Outbound response cache configuration
    pub cache: CacheConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Inbound request timeout; outbound calls of a timed-out request are cancelled
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Paths that bypass the session gate (the callback path always does)
    pub public_paths: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
            public_paths: vec!["/health".to_string()],
        }
    }
}

/// OAuth2 identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Registered client id (supports `${VAR}`)
    pub client_id: String,
    /// Registered client secret (supports `${VAR}`)
    pub client_secret: String,
    /// Provider authorize endpoint
    pub authorize_url: String,
    /// Provider token endpoint
    pub token_url: String,
    /// Identity verification endpoint
    pub verify_url: String,
    /// Redirect URL registered with the provider; its path is the callback route
    pub redirect_url: String,
    /// Requested scopes
    pub scopes: Vec<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            authorize_url: "https://login.eveonline.com/oauth/authorize".to_string(),
            token_url: "https://login.eveonline.com/oauth/token".to_string(),
            verify_url: "https://login.eveonline.com/oauth/verify".to_string(),
            redirect_url: "http://localhost:8080/authorize".to_string(),
            scopes: vec!["esi-planets.manage_planets.v1".to_string()],
        }
    }
}

impl OAuthConfig {
    /// Path component of the redirect URL, used as the callback route
    pub fn callback_path(&self) -> Result<String> {
        let url = Url::parse(&self.redirect_url)
            .map_err(|e| Error::Config(format!("Invalid redirect_url: {e}")))?;
        Ok(url.path().to_string())
    }
}

/// Session cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie name
    pub cookie_name: String,
    /// Cookie encryption key, at least 64 bytes raw or base64 (supports `${VAR}`).
    /// When absent an ephemeral key is generated and sessions do not survive restarts.
    pub key: Option<String>,
    /// Set the `Secure` attribute
    pub secure: bool,
    /// Cookie max age; `None` makes it a browser-session cookie
    #[serde(default, with = "humantime_serde::option")]
    pub max_age: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session".to_string(),
            key: None,
            secure: false,
            max_age: None,
        }
    }
}

impl SessionConfig {
    /// Resolve the cookie encryption key
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a key is configured but shorter than 64 bytes.
    pub fn resolve_key(&self) -> Result<Key> {
        let Some(ref raw) = self.key else {
            tracing::warn!("No session key configured, generating an ephemeral one");
            return Ok(Key::generate());
        };

        let bytes = match STANDARD.decode(raw.trim()) {
            Ok(decoded) if decoded.len() >= 64 => decoded,
            _ => raw.as_bytes().to_vec(),
        };

        Key::try_from(bytes.as_slice())
            .map_err(|_| Error::Config("session.key must be at least 64 bytes".to_string()))
    }
}

/// Remote resource API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL the path templates are appended to
    pub base_url: String,
    /// Listing path template, `{owner_id}` is substituted
    pub resources_path: String,
    /// Detail path template, `{id}` is substituted
    pub detail_path: String,
    /// Outbound request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// User-Agent sent on outbound calls
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://esi.evetech.net/latest".to_string(),
            resources_path: "/{owner_id}/resources/".to_string(),
            detail_path: "/resource-detail/{id}/".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: concat!("sso-gateway/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Outbound response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching
    pub enabled: bool,
    /// Maximum number of entries; the stalest or oldest entry makes room for new ones
    pub max_entries: usize,
    /// What the cache key is derived from
    pub key_scope: CacheKeyScope,
    /// How often expired entries are swept
    #[serde(with = "humantime_serde")]
    pub maintenance_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            key_scope: CacheKeyScope::Shared,
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

/// Cache key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheKeyScope {
    /// Method and URL only; responses are shared across sessions
    #[default]
    Shared,
    /// Method, URL and a digest of the `Authorization` header
    PerCredential,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // SSO_GATEWAY_OAUTH__CLIENT_ID -> oauth.client_id
        figment = figment.merge(Env::prefixed("SSO_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files first so ${VAR} expansion can see them
        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Check everything the OAuth client and the token store need at startup
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.oauth.client_id.is_empty() || self.oauth.client_secret.is_empty() {
            return Err(Error::Config(
                "must provide both oauth.client_id and oauth.client_secret".to_string(),
            ));
        }

        for (name, value) in [
            ("oauth.authorize_url", &self.oauth.authorize_url),
            ("oauth.token_url", &self.oauth.token_url),
            ("oauth.verify_url", &self.oauth.verify_url),
            ("oauth.redirect_url", &self.oauth.redirect_url),
            ("api.base_url", &self.api.base_url),
        ] {
            Url::parse(value).map_err(|e| Error::Config(format!("Invalid {name}: {e}")))?;
        }

        if self.session.cookie_name.is_empty() {
            return Err(Error::Config("session.cookie_name must not be empty".to_string()));
        }

        if self.cache.enabled && self.cache.maintenance_interval.is_zero() {
            return Err(Error::Config(
                "cache.maintenance_interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in secret-bearing values
    fn expand_env_vars(&mut self) {
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        self.oauth.client_id = Self::expand_string(&re, &self.oauth.client_id);
        self.oauth.client_secret = Self::expand_string(&re, &self.oauth.client_secret);
        self.session.key = self
            .session
            .key
            .take()
            .map(|key| Self::expand_string(&re, &key))
            .filter(|key| !key.trim().is_empty());
    }

    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "30s", "5m", "100ms" or bare seconds
    pub(crate) fn parse(s: &str) -> Result<Duration, String> {
        // "ms" before "s": "100ms" also ends with 's'
        let (digits, unit_secs) = if let Some(ms) = s.strip_suffix("ms") {
            let ms = ms.parse::<u64>().map_err(|e| format!("{s:?}: {e}"))?;
            return Ok(Duration::from_millis(ms));
        } else if let Some(secs) = s.strip_suffix('s') {
            (secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 3600)
        } else {
            (s, 1)
        };

        let value = digits.parse::<u64>().map_err(|e| format!("{s:?}: {e}"))?;
        value
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("{s:?}: duration out of range"))
    }

    /// `Option<Duration>` variant
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize an optional duration
        ///
        /// # Errors
        ///
        /// Returns a serialization error if the serializer fails.
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional duration
        ///
        /// # Errors
        ///
        /// Returns a deserialization error if the string cannot be parsed as a duration.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
