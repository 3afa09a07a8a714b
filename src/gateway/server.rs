//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::router::{AppState, create_router};
use crate::cache::CachingTransport;
use crate::config::Config;
use crate::{Error, Result};

/// SSO gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared request state
    state: AppState,
}

impl Gateway {
    /// Create a new gateway
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is incomplete or invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let state = AppState::new(&config)?;

        info!(
            callback = %state.gate.callback_path(),
            scopes = ?config.oauth.scopes,
            "Identity provider configured"
        );

        Ok(Self { config, state })
    }

    /// Shared state, for embedding the router elsewhere
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the gateway until Ctrl-C or SIGTERM
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or the server fails.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        if self.config.cache.enabled {
            spawn_cache_maintenance(
                Arc::clone(&self.state.transport),
                self.config.cache.maintenance_interval,
                shutdown_tx.subscribe(),
            );
        } else {
            warn!("Response cache disabled - every resource call goes upstream");
        }

        let app = create_router(self.state, &self.config);
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("SSO GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            cache = self.config.cache.enabled,
            key_scope = ?self.config.cache.key_scope,
            max_entries = self.config.cache.max_entries,
            "Outbound cache"
        );
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Gateway stopped");
        Ok(())
    }
}

/// Periodically drop expired entries that cannot be revalidated
fn spawn_cache_maintenance(
    transport: Arc<CachingTransport>,
    interval: std::time::Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = transport.evict_expired();
                    debug!(evicted, size = transport.stats().size, "Cache maintenance");
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    });
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
