//! Request-scoped cancellation for outbound calls

use std::future::Future;

use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{Error, Result};

/// Cancellation scope of one inbound request.
///
/// The token is cancelled when the scope is dropped, which happens when axum
/// drops the handler future (client gone, inbound timeout).
pub struct RequestScope {
    token: CancellationToken,
    _guard: DropGuard,
}

impl RequestScope {
    /// Open a new scope
    #[must_use]
    pub fn new() -> Self {
        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();
        Self {
            token,
            _guard: guard,
        }
    }

    /// Token handed to outbound clients
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `fut` unless `token` is cancelled first
pub async fn cancellable<F, T>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}
