//! The credential store: registration and password verification.
//!
//! Passwords are hashed with bcrypt (salted, slow, constant-time
//! verification). Hashing runs on tokio's blocking pool so a login never
//! stalls the runtime's worker threads.

use std::sync::Arc;

use tether_protocol::UserId;

use crate::store::UserStore;
use crate::{Identity, SessionError, StoreError};

/// Longest accepted username, in bytes.
pub const MAX_USERNAME_LEN: usize = 64;

/// bcrypt only looks at the first 72 bytes of a password; anything longer
/// is refused rather than silently truncated.
pub const MAX_PASSWORD_LEN: usize = 72;

// ---------------------------------------------------------------------------
// PasswordHasher
// ---------------------------------------------------------------------------

/// bcrypt hashing with a fixed work factor.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Hashes `password` with a fresh salt.
    pub async fn hash(&self, password: &str) -> Result<String, SessionError> {
        let password = password.to_string();
        let cost = self.cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| SessionError::Storage(format!("hash worker failed: {e}")))?
            .map_err(|e| SessionError::Storage(format!("password hashing failed: {e}")))
    }

    /// Checks `password` against a stored bcrypt hash in constant time.
    pub async fn verify(
        &self,
        password: &str,
        hash: &str,
    ) -> Result<bool, SessionError> {
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| SessionError::Storage(format!("hash worker failed: {e}")))?
            .map_err(|e| SessionError::Storage(format!("stored hash unreadable: {e}")))
    }
}

// ---------------------------------------------------------------------------
// CredentialStore
// ---------------------------------------------------------------------------

/// Creates users and verifies their passwords.
///
/// ```text
/// create(username, password)          → UserId   | DuplicateUsername | Validation
/// verify_password(username, password) → Identity | InvalidCredentials
/// ```
pub struct CredentialStore<S: UserStore> {
    store: Arc<S>,
    hasher: PasswordHasher,
    /// Verified against when the username is unknown, so that a miss
    /// costs as much as a wrong password.
    dummy_hash: String,
}

impl<S: UserStore> CredentialStore<S> {
    /// Builds the store. Computes one bcrypt hash up front on the
    /// blocking pool, so this is as slow as a single registration.
    pub async fn new(store: Arc<S>, bcrypt_cost: u32) -> Result<Self, SessionError> {
        let hasher = PasswordHasher::new(bcrypt_cost);
        let dummy_hash = hasher
            .hash(crate::SessionToken::generate().as_str())
            .await?;
        Ok(Self {
            store,
            hasher,
            dummy_hash,
        })
    }

    /// Registers a new user.
    ///
    /// # Errors
    /// - [`SessionError::Validation`]: empty or oversized fields
    /// - [`SessionError::DuplicateUsername`]: name taken
    /// - [`SessionError::Storage`]: backend or hashing failure
    pub async fn create(
        &self,
        username: &str,
        password: &str,
    ) -> Result<UserId, SessionError> {
        validate_registration(username, password)?;

        let hash = self.hasher.hash(password).await?;
        let user_id = self
            .store
            .create_user(username, &hash)
            .await
            .map_err(|e| match e {
                StoreError::DuplicateUsername => {
                    SessionError::DuplicateUsername(username.to_string())
                }
                other => other.into(),
            })?;

        tracing::info!(%user_id, username, "user registered");
        Ok(user_id)
    }

    /// Checks a username/password pair.
    ///
    /// Unknown users, wrong passwords and passwords longer than
    /// [`MAX_PASSWORD_LEN`] all return [`SessionError::InvalidCredentials`]
    /// after a full bcrypt verification.
    pub async fn verify_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Identity, SessionError> {
        if username.is_empty() || password.is_empty() {
            return Err(SessionError::InvalidCredentials);
        }
        // bcrypt ignores everything past byte 72, so a longer password
        // could match a stored one it merely starts with.
        if password.len() > MAX_PASSWORD_LEN {
            let _ = self.hasher.verify(password, &self.dummy_hash).await;
            tracing::warn!(username, "login rejected");
            return Err(SessionError::InvalidCredentials);
        }

        match self.store.find_credential(username).await? {
            Some(cred) => {
                if self.hasher.verify(password, &cred.password_hash).await? {
                    Ok(Identity {
                        user_id: cred.user_id,
                        username: cred.username,
                    })
                } else {
                    tracing::warn!(username, "login rejected");
                    Err(SessionError::InvalidCredentials)
                }
            }
            None => {
                let _ = self.hasher.verify(password, &self.dummy_hash).await;
                tracing::warn!(username, "login rejected");
                Err(SessionError::InvalidCredentials)
            }
        }
    }
}

fn validate_registration(username: &str, password: &str) -> Result<(), SessionError> {
    if username.is_empty() || password.is_empty() {
        return Err(SessionError::Validation(
            "username and password are required".into(),
        ));
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(SessionError::Validation(format!(
            "username longer than {MAX_USERNAME_LEN} bytes"
        )));
    }
    if username.chars().any(char::is_control) {
        return Err(SessionError::Validation(
            "username contains control characters".into(),
        ));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(SessionError::Validation(format!(
            "password longer than {MAX_PASSWORD_LEN} bytes"
        )));
    }
    Ok(())
}
