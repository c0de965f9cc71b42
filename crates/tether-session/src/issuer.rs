//! Minting session tokens after a successful login.

use std::sync::Arc;

use crate::store::{UserStore, unix_now};
use crate::{SessionError, SessionToken};

/// Generates and stores single-use session tokens.
///
/// Only ever called right after the credential store has verified the
/// username in the same request. Issuing for a user overwrites any token
/// they haven't redeemed yet, so only the latest login can open a
/// connection.
pub struct TokenIssuer<S: UserStore> {
    store: Arc<S>,
}

impl<S: UserStore> TokenIssuer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Mints a token for `username` and persists it.
    ///
    /// # Errors
    /// [`SessionError::Storage`] if the write fails or the user no longer
    /// exists. The token must not be handed out in that case.
    pub async fn issue(&self, username: &str) -> Result<SessionToken, SessionError> {
        let token = SessionToken::generate();
        let stored = self.store.store_token(username, &token, unix_now()).await?;
        if !stored {
            return Err(SessionError::Storage(format!(
                "user {username:?} disappeared before token issue"
            )));
        }
        tracing::debug!(username, "session token issued");
        Ok(token)
    }
}
