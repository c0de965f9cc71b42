//! `TetherServer` builder and server loop.
//!
//! This is the entry point for running a Tether server. It ties together
//! all the layers: user store → credentials and tokens → registry → HTTP.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tether_session::{
    ConnectionRegistry, SessionAuthenticator, SessionConfig, StoreError, UserStore, unix_now,
};
use tether_transport::{CloseReason, Connection, WebSocketConnection};
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;

use crate::handler::router;
use crate::{Handoff, ServerConfig, TetherError};

/// Builder for configuring and starting a Tether server.
///
/// # Example
///
/// ```rust,ignore
/// use tether::prelude::*;
///
/// let server = TetherServerBuilder::new()
///     .bind("0.0.0.0:3333")
///     .build(Arc::new(MemoryUserStore::new()))
///     .await?;
/// server.run().await
/// ```
pub struct TetherServerBuilder {
    bind_addr: String,
    session_config: SessionConfig,
}

impl TetherServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:3333".to_string(),
            session_config: SessionConfig::default(),
        }
    }

    /// Takes the bind address and session settings from `config`.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new()
            .bind(&config.bind_addr)
            .session_config(config.session.clone())
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Binds the listener and wires the handoff around `store`.
    pub async fn build<S: UserStore>(self, store: Arc<S>) -> Result<TetherServer<S>, TetherError> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        let handoff = Handoff::with_store(Arc::clone(&store), &self.session_config).await?;

        Ok(TetherServer {
            listener,
            handoff: Arc::new(handoff),
            store,
            config: self.session_config,
        })
    }
}

impl Default for TetherServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Tether server.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// serving.
pub struct TetherServer<S: UserStore> {
    listener: TcpListener,
    handoff: Arc<Handoff<S, SessionAuthenticator<S>, WebSocketConnection>>,
    store: Arc<S>,
    config: SessionConfig,
}

impl<S: UserStore> TetherServer<S> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The live connection registry, shared with every connection task.
    pub fn registry(&self) -> Arc<ConnectionRegistry<WebSocketConnection>> {
        Arc::clone(self.handoff.registry())
    }

    /// Serves until the process is terminated.
    pub async fn run(self) -> Result<(), TetherError> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves.
    ///
    /// On shutdown the listener stops accepting, every live connection
    /// is closed with [`CloseReason::ServerShutdown`], and the token
    /// sweeper stops. Connections that finish their upgrade while the
    /// listener winds down are closed once serving has returned.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), TetherError> {
        let addr = self.local_addr()?;
        let registry = self.registry();
        tracing::info!(%addr, policy = %registry.policy(), "Tether server running");

        let sweeper = tokio::spawn(sweep_expired_tokens(
            Arc::clone(&self.store),
            self.config.token_ttl(),
            self.config.sweep_interval(),
        ));

        let app = router(self.handoff);
        let signal = {
            let registry = Arc::clone(&registry);
            async move {
                shutdown.await;
                let closed = registry.close_all(CloseReason::ServerShutdown).await;
                tracing::info!(closed, "shutting down");
            }
        };

        let serving = axum::serve(self.listener, app)
            .with_graceful_shutdown(signal)
            .into_future();
        let served = serve_then_close(serving, &registry).await;
        sweeper.abort();
        served?;

        tracing::info!("Tether server stopped");
        Ok(())
    }
}

/// Awaits `serving`, then closes every connection still registered.
///
/// Already-closed handles ignore the second close.
async fn serve_then_close<T, C: Connection>(
    serving: impl Future<Output = T>,
    registry: &ConnectionRegistry<C>,
) -> T {
    let output = serving.await;
    let remaining = registry.close_all(CloseReason::ServerShutdown).await;
    tracing::debug!(remaining, "final close pass");
    output
}

/// Periodically clears tokens that outlived `ttl` without being redeemed.
async fn sweep_expired_tokens<S: UserStore>(store: Arc<S>, ttl: Duration, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match purge_expired(store.as_ref(), ttl).await {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "expired session tokens cleared"),
            Err(e) => tracing::error!(error = %e, "token sweep failed"),
        }
    }
}

async fn purge_expired<S: UserStore>(store: &S, ttl: Duration) -> Result<usize, StoreError> {
    let cutoff = unix_now().saturating_sub(ttl.as_secs());
    store.purge_tokens_issued_before(cutoff).await
}
