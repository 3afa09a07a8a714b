use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

/// Anti-forgery state cookie issued with every authorization redirect
pub(crate) const STATE_COOKIE_NAME: &str = "__sso_state";

/// Create the state cookie for an authorization redirect.
pub(crate) fn state_cookie(state: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((STATE_COOKIE_NAME, state.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::minutes(5))
        .build()
}

/// Create the removal cookie for the state cookie.
pub(crate) fn clear_state_cookie() -> Cookie<'static> {
    Cookie::build((STATE_COOKIE_NAME, "")).path("/").build()
}

/// Get the state from cookies.
pub(crate) fn get_state(jar: &PrivateCookieJar) -> Option<String> {
    jar.get(STATE_COOKIE_NAME).map(|c| c.value().to_string())
}

/// Create the session cookie carrying the serialized payload.
pub(super) fn session_cookie(
    name: &str,
    payload: String,
    max_age: Option<std::time::Duration>,
    secure: bool,
) -> Cookie<'static> {
    let mut builder = Cookie::build((name.to_string(), payload))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/");

    if let Some(max_age) = max_age {
        let secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        builder = builder.max_age(Duration::seconds(secs));
    }

    builder.build()
}
