//! Cookie-backed session token store
//!
//! The whole session lives in one encrypted, authenticated cookie
//! (`PrivateCookieJar`), so there is no server-side state to lock: every
//! request reads and writes only its own cookie.

pub(crate) mod cookies;

use std::time::Duration;

use axum_extra::extract::PrivateCookieJar;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SessionConfig;
use crate::oauth::{Credential, Identity};
use crate::{Error, Result};

/// Typed session payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Credential issued by the last successful authorization
    #[serde(default)]
    pub credential: Option<Credential>,
    /// Identity verified with that credential
    #[serde(default)]
    pub identity: Option<Identity>,
}

/// Where a session is in the login cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No usable session
    Unauthenticated,
    /// A redirect to the provider is outstanding
    PendingAuthorization,
    /// Credential and identity present
    Authenticated,
    /// Identity cleared by logout, credential retained
    LoggedOut,
}

impl Session {
    /// Credential and identity, only when both are present
    #[must_use]
    pub fn authenticated(&self) -> Option<(&Credential, &Identity)> {
        self.credential.as_ref().zip(self.identity.as_ref())
    }

    /// Derive the login state. `pending` is whether a state cookie is outstanding.
    #[must_use]
    pub fn state(&self, pending: bool) -> SessionState {
        match (&self.credential, &self.identity) {
            (Some(_), Some(_)) => SessionState::Authenticated,
            _ if pending => SessionState::PendingAuthorization,
            (Some(_), None) => SessionState::LoggedOut,
            _ => SessionState::Unauthenticated,
        }
    }
}

/// Reads and writes the session cookie
#[derive(Debug, Clone)]
pub struct TokenStore {
    cookie_name: String,
    secure: bool,
    max_age: Option<Duration>,
}

impl TokenStore {
    /// Create a store from session configuration
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            cookie_name: config.cookie_name.clone(),
            secure: config.secure,
            max_age: config.max_age,
        }
    }

    /// Cookie name the session is stored under
    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Whether cookies are marked `Secure`
    #[must_use]
    pub fn secure(&self) -> bool {
        self.secure
    }

    /// Load the session.
    ///
    /// A missing cookie, a cookie that fails decryption (the jar drops those),
    /// or an unreadable payload all mean "no session".
    #[must_use]
    pub fn load(&self, jar: &PrivateCookieJar) -> Option<Session> {
        let cookie = jar.get(&self.cookie_name)?;
        match serde_json::from_str::<Session>(cookie.value()) {
            Ok(session) => Some(session),
            Err(e) => {
                debug!(error = %e, "Discarding unreadable session payload");
                None
            }
        }
    }

    /// Replace the session with a fresh credential and identity
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if the payload cannot be serialized.
    pub fn save(
        &self,
        jar: PrivateCookieJar,
        credential: Credential,
        identity: Identity,
    ) -> Result<PrivateCookieJar> {
        let session = Session {
            credential: Some(credential),
            identity: Some(identity),
        };
        self.write(jar, &session)
    }

    /// Clear the identity, keeping the credential
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if the payload cannot be serialized.
    pub fn clear_identity(&self, jar: PrivateCookieJar) -> Result<PrivateCookieJar> {
        let Some(mut session) = self.load(&jar) else {
            return Ok(jar);
        };
        session.identity = None;
        self.write(jar, &session)
    }

    /// Store a refreshed credential without touching the identity
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if the payload cannot be serialized.
    pub fn replace_credential(
        &self,
        jar: PrivateCookieJar,
        credential: Credential,
    ) -> Result<PrivateCookieJar> {
        let mut session = self.load(&jar).unwrap_or_default();
        session.credential = Some(credential);
        self.write(jar, &session)
    }

    fn write(&self, jar: PrivateCookieJar, session: &Session) -> Result<PrivateCookieJar> {
        let payload = serde_json::to_string(session)
            .map_err(|e| Error::Session(format!("Failed to serialize session: {e}")))?;
        let cookie = cookies::session_cookie(&self.cookie_name, payload, self.max_age, self.secure);
        Ok(jar.add(cookie))
    }
}

#[cfg(test)]
mod tests {
    use axum_extra::extract::cookie::{Cookie, Key};

    use super::*;

    fn store() -> TokenStore {
        TokenStore::new(&SessionConfig::default())
    }

    fn credential() -> Credential {
        Credential::from_response("access".to_string(), None, None, Some(3600), None)
    }

    fn identity() -> Identity {
        Identity {
            id: 123,
            name: "Pilot".to_string(),
        }
    }

    #[test]
    fn empty_jar_has_no_session() {
        let jar = PrivateCookieJar::new(Key::generate());
        assert!(store().load(&jar).is_none());
    }

    #[test]
    fn save_then_load() {
        let store = store();
        let jar = store
            .save(PrivateCookieJar::new(Key::generate()), credential(), identity())
            .unwrap();

        let session = store.load(&jar).unwrap();
        assert_eq!(session.identity, Some(identity()));
        assert_eq!(session.state(false), SessionState::Authenticated);
        assert!(session.authenticated().is_some());
    }

    #[test]
    fn clear_identity_keeps_credential() {
        let store = store();
        let jar = store
            .save(PrivateCookieJar::new(Key::generate()), credential(), identity())
            .unwrap();
        let jar = store.clear_identity(jar).unwrap();

        let session = store.load(&jar).unwrap();
        assert!(session.identity.is_none());
        assert!(session.credential.is_some());
        assert!(session.authenticated().is_none());
        assert_eq!(session.state(false), SessionState::LoggedOut);
    }

    #[test]
    fn clear_identity_without_session_is_noop() {
        let store = store();
        let jar = store
            .clear_identity(PrivateCookieJar::new(Key::generate()))
            .unwrap();
        assert!(store.load(&jar).is_none());
    }

    #[test]
    fn replace_credential_keeps_identity() {
        let store = store();
        let jar = store
            .save(PrivateCookieJar::new(Key::generate()), credential(), identity())
            .unwrap();
        let refreshed = Credential::from_response("new-access".to_string(), None, None, None, None);
        let jar = store.replace_credential(jar, refreshed).unwrap();

        let session = store.load(&jar).unwrap();
        assert_eq!(session.identity, Some(identity()));
        assert_eq!(session.credential.unwrap().access_token, "new-access");
    }

    #[test]
    fn garbage_payload_is_no_session() {
        let store = store();
        let jar = PrivateCookieJar::new(Key::generate()).add(Cookie::new("session", "{not json"));
        assert!(store.load(&jar).is_none());
    }

    #[test]
    fn state_derivation() {
        let empty = Session::default();
        assert_eq!(empty.state(false), SessionState::Unauthenticated);
        assert_eq!(empty.state(true), SessionState::PendingAuthorization);

        let logged_out = Session {
            credential: Some(credential()),
            identity: None,
        };
        assert_eq!(logged_out.state(true), SessionState::PendingAuthorization);
        assert_eq!(logged_out.state(false), SessionState::LoggedOut);

        // identity without credential is not a usable session
        let orphan = Session {
            credential: None,
            identity: Some(identity()),
        };
        assert_eq!(orphan.state(false), SessionState::Unauthenticated);
    }
}
