//! Exchanging a presented session token for an identity.
//!
//! The upgrade path doesn't care where identities come from; it only
//! needs something implementing [`Authenticator`]. In production that is
//! [`SessionAuthenticator`], which consumes single-use tokens from the
//! user store. Tests plug in stubs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tether_protocol::UserId;

use crate::store::{UserStore, unix_now};
use crate::{SessionError, SessionToken};

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

/// Validates a client's bearer token and returns their identity.
///
/// # Trait bounds
///
/// - `Send + Sync + 'static` → one authenticator is shared by every
///   request task for the lifetime of the server.
/// - the returned future is `Send` so callers can be spawned.
///
/// # Example
///
/// ```rust
/// use tether_protocol::UserId;
/// use tether_session::{Authenticator, Identity, SessionError};
///
/// /// Accepts a single hard-coded token. Development only.
/// struct FixedToken;
///
/// impl Authenticator for FixedToken {
///     async fn authenticate(&self, token: &str) -> Result<Identity, SessionError> {
///         if token == "letmein" {
///             Ok(Identity { user_id: UserId(1), username: "dev".into() })
///         } else {
///             Err(SessionError::InvalidToken)
///         }
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates `token` and returns who it belongs to.
    ///
    /// # Returns
    /// - `Ok(Identity)`: the token was accepted
    /// - `Err(SessionError::InvalidToken)`: rejected, for any reason
    fn authenticate(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Identity, SessionError>> + Send;
}

/// Redeems single-use tokens issued by [`TokenIssuer`](crate::TokenIssuer).
///
/// Lookup and invalidation are one atomic step
/// ([`UserStore::take_token`]). However many requests race with the same
/// token, exactly one gets the identity; the rest, including retries,
/// get [`SessionError::InvalidToken`].
pub struct SessionAuthenticator<S: UserStore> {
    store: Arc<S>,
    ttl: Duration,
}

impl<S: UserStore> SessionAuthenticator<S> {
    pub fn new(store: Arc<S>, ttl: Duration) -> Self {
        Self { store, ttl }
    }
}

impl<S: UserStore> Authenticator for SessionAuthenticator<S> {
    async fn authenticate(&self, token: &str) -> Result<Identity, SessionError> {
        // Malformed input never reaches the store.
        let token = SessionToken::parse(token)?;

        let owner = self
            .store
            .take_token(&token)
            .await?
            .ok_or(SessionError::InvalidToken)?;

        // Expired tokens are cleared by the take above all the same.
        let age = unix_now().saturating_sub(owner.issued_at);
        if age > self.ttl.as_secs() {
            tracing::warn!(
                user_id = %owner.user_id,
                age_secs = age,
                "expired session token presented"
            );
            return Err(SessionError::InvalidToken);
        }

        tracing::debug!(user_id = %owner.user_id, "session token redeemed");
        Ok(Identity {
            user_id: owner.user_id,
            username: owner.username,
        })
    }
}
