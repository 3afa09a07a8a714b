//! HTTP caching rules for a private cache
//!
//! Parses `Cache-Control`, `Expires`, `Date`, `Age` and `Vary` and decides
//! whether a response may be stored and for how long it stays fresh.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{
    AGE, CACHE_CONTROL, DATE, ETAG, EXPIRES, HeaderMap, HeaderName, HeaderValue, LAST_MODIFIED,
    PRAGMA, VARY,
};

/// Parsed `Cache-Control` directives relevant to a private cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// `max-age=N`
    pub max_age: Option<u64>,
    /// `no-cache`
    pub no_cache: bool,
    /// `no-store`
    pub no_store: bool,
    /// `must-revalidate`
    pub must_revalidate: bool,
}

impl CacheControl {
    /// Parse all `Cache-Control` headers (plus `Pragma: no-cache`)
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut cc = Self::default();

        for value in headers.get_all(CACHE_CONTROL) {
            let Ok(value) = value.to_str() else { continue };
            for directive in value.split(',') {
                let directive = directive.trim();
                let (name, arg) = match directive.split_once('=') {
                    Some((name, arg)) => (name.trim(), Some(arg.trim().trim_matches('"'))),
                    None => (directive, None),
                };
                match name.to_ascii_lowercase().as_str() {
                    "max-age" => cc.max_age = arg.and_then(|a| a.parse().ok()),
                    "no-cache" => cc.no_cache = true,
                    "no-store" => cc.no_store = true,
                    "must-revalidate" => cc.must_revalidate = true,
                    _ => {}
                }
            }
        }

        if headers
            .get(PRAGMA)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("no-cache"))
        {
            cc.no_cache = true;
        }

        cc
    }
}

/// Statuses a cache may store by default (RFC 9110 section 15.1)
#[must_use]
pub fn is_cacheable_status(status: StatusCode) -> bool {
    matches!(
        status.as_u16(),
        200 | 203 | 204 | 300 | 301 | 404 | 405 | 410 | 414 | 501
    )
}

/// Whether the response carries `ETag` or `Last-Modified`
#[must_use]
pub fn has_validators(headers: &HeaderMap) -> bool {
    headers.contains_key(ETAG) || headers.contains_key(LAST_MODIFIED)
}

fn http_date(headers: &HeaderMap, name: HeaderName) -> Option<DateTime<Utc>> {
    let value = headers.get(name)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// How long a response is fresh for, measured from when it was generated.
///
/// `max-age` wins over `Expires`; `no-cache` forces revalidation on every use.
#[must_use]
pub fn freshness_lifetime(headers: &HeaderMap) -> Duration {
    let cc = CacheControl::from_headers(headers);
    if cc.no_cache {
        return Duration::ZERO;
    }
    if let Some(max_age) = cc.max_age {
        return Duration::from_secs(max_age);
    }

    // An unparseable Expires (e.g. "0") means already expired
    let Some(expires) = headers.get(EXPIRES) else {
        return Duration::ZERO;
    };
    let Some(expires) = expires
        .to_str()
        .ok()
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|d| d.with_timezone(&Utc))
    else {
        return Duration::ZERO;
    };
    let date = http_date(headers, DATE).unwrap_or_else(Utc::now);

    (expires - date).to_std().unwrap_or(Duration::ZERO)
}

/// Largest delta-seconds value we keep (RFC 9111 §1.2.2)
const MAX_DELTA_SECONDS: u64 = 1 << 31;

/// Age the response already had when it reached us (`Age` header),
/// capped at 2^31 seconds.
#[must_use]
pub fn initial_age(headers: &HeaderMap) -> Duration {
    headers
        .get(AGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(Duration::ZERO, |secs| {
            Duration::from_secs(secs.min(MAX_DELTA_SECONDS))
        })
}

/// Request header values named by the response's `Vary`.
///
/// Returns `None` for `Vary: *`, which can never be matched.
#[must_use]
pub fn vary_values(
    request_headers: &HeaderMap,
    response_headers: &HeaderMap,
) -> Option<Vec<(HeaderName, Option<HeaderValue>)>> {
    let mut values = Vec::new();
    for vary in response_headers.get_all(VARY) {
        let Ok(vary) = vary.to_str() else { continue };
        for name in vary.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if name == "*" {
                return None;
            }
            if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
                let value = request_headers.get(&name).cloned();
                values.push((name, value));
            }
        }
    }
    Some(values)
}

/// Whether a GET response may be stored
#[must_use]
pub fn is_storable(
    request_headers: &HeaderMap,
    status: StatusCode,
    response_headers: &HeaderMap,
) -> bool {
    if !is_cacheable_status(status) {
        return false;
    }
    if CacheControl::from_headers(request_headers).no_store {
        return false;
    }

    let cc = CacheControl::from_headers(response_headers);
    if cc.no_store {
        return false;
    }
    if vary_values(request_headers, response_headers).is_none() {
        return false;
    }

    // Something has to make the entry reusable: a lifetime or a validator
    cc.max_age.is_some() || response_headers.contains_key(EXPIRES) || has_validators(response_headers)
}
