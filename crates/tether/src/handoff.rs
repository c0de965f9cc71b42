//! The handoff controller: from credentials to a registered connection.
//!
//! ```text
//! login(credentials) ──→ token ──→ redeem(token) ──→ identity ──→ attach(identity, conn)
//!   verify + issue                 consume once                   registry entry + guard
//! ```
//!
//! The HTTP layer in `handler` only parses requests and
//! renders responses; every decision is made here.

use std::sync::Arc;

use tether_protocol::{Credentials, UserId};
use tether_session::{
    Authenticator, ConnectionRegistry, CredentialStore, Identity, RegistryGuard,
    SessionAuthenticator, SessionConfig, SessionError, SessionToken, TokenIssuer,
    UserStore,
};
use tether_transport::{CloseReason, Connection};

/// Ties the credential store, token issuer, authenticator and registry
/// together.
///
/// # Type parameters
///
/// - `S`: the user store behind credentials and tokens
/// - `A`: how presented tokens are checked; [`SessionAuthenticator`] in
///   production
/// - `C`: the connection handle type kept in the registry
pub struct Handoff<S: UserStore, A: Authenticator, C: Connection> {
    credentials: CredentialStore<S>,
    issuer: TokenIssuer<S>,
    authenticator: A,
    registry: Arc<ConnectionRegistry<C>>,
}

impl<S: UserStore, C: Connection> Handoff<S, SessionAuthenticator<S>, C> {
    /// Wires the standard components around one shared store.
    ///
    /// Computes a bcrypt hash up front (see [`CredentialStore::new`]).
    pub async fn with_store(store: Arc<S>, config: &SessionConfig) -> Result<Self, SessionError> {
        Ok(Self::new(
            CredentialStore::new(Arc::clone(&store), config.bcrypt_cost).await?,
            TokenIssuer::new(Arc::clone(&store)),
            SessionAuthenticator::new(store, config.token_ttl()),
            Arc::new(ConnectionRegistry::new(config.duplicate_policy)),
        ))
    }
}

impl<S: UserStore, A: Authenticator, C: Connection> Handoff<S, A, C> {
    pub fn new(
        credentials: CredentialStore<S>,
        issuer: TokenIssuer<S>,
        authenticator: A,
        registry: Arc<ConnectionRegistry<C>>,
    ) -> Self {
        Self {
            credentials,
            issuer,
            authenticator,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<C>> {
        &self.registry
    }

    /// Creates an account.
    pub async fn register(&self, credentials: &Credentials) -> Result<UserId, SessionError> {
        self.credentials
            .create(&credentials.username, &credentials.password)
            .await
    }

    /// Verifies the password and issues a fresh session token.
    ///
    /// Any token the user still held is invalidated. The token is only
    /// returned once it has been stored.
    pub async fn login(&self, credentials: &Credentials) -> Result<SessionToken, SessionError> {
        let identity = self
            .credentials
            .verify_password(&credentials.username, &credentials.password)
            .await?;
        let token = self.issuer.issue(&identity.username).await?;
        tracing::info!(
            user_id = %identity.user_id,
            username = %identity.username,
            "user logged in"
        );
        Ok(token)
    }

    /// Consumes a presented token. A second redeem of the same token
    /// fails.
    pub async fn redeem(&self, token: &str) -> Result<Identity, SessionError> {
        self.authenticator.authenticate(token).await
    }

    /// Registers an upgraded connection for `identity`.
    ///
    /// If the registry refuses it, the connection is closed with
    /// [`CloseReason::AlreadyConnected`] before the error is returned.
    pub async fn attach(
        &self,
        identity: &Identity,
        conn: Arc<C>,
    ) -> Result<RegistryGuard<C>, SessionError> {
        match self.registry.register(identity, Arc::clone(&conn)).await {
            Ok(guard) => {
                tracing::info!(
                    user_id = %identity.user_id,
                    conn_id = %conn.id(),
                    "user connected"
                );
                Ok(guard)
            }
            Err(err) => {
                if let Err(e) = conn.close(CloseReason::AlreadyConnected).await {
                    tracing::debug!(
                        conn_id = %conn.id(),
                        error = %e,
                        "failed to close refused connection"
                    );
                }
                Err(err)
            }
        }
    }
}
