//! User record storage: the persistence seam behind credentials and
//! session tokens.
//!
//! One record per user:
//!
//! ```text
//! { id, username (unique), password_hash, token (nullable, unique), token_issued_at }
//! ```
//!
//! The [`UserStore`] trait is what the credential store, the token
//! issuer and the session authenticator are written against. Two
//! backends ship with the crate: [`MemoryUserStore`] here, and
//! `SqliteUserStore` behind the `sqlite` feature.

use std::collections::HashMap;
use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tether_protocol::UserId;

use crate::{SessionToken, StoreError};

/// Password hash and identity of a user, as needed to verify a login.
#[derive(Clone)]
pub struct StoredCredential {
    pub user_id: UserId,
    pub username: String,
    pub password_hash: String,
}

/// Who a consumed token belonged to, and when it was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenOwner {
    pub user_id: UserId,
    pub username: String,
    /// Unix seconds.
    pub issued_at: u64,
}

/// Persistent user records, including each user's outstanding token.
///
/// # Atomicity contract
///
/// - [`create_user`](Self::create_user) fails exactly one of two
///   concurrent registrations of the same name.
/// - [`store_token`](Self::store_token) overwrites: the last issue wins.
/// - [`take_token`](Self::take_token) is a single compare-and-clear. Of
///   any number of concurrent calls with the same token, at most one sees
///   `Some`. Implementations must never split it into a read followed by
///   a separate write.
pub trait UserStore: Send + Sync + 'static {
    /// Inserts a new user and returns its id.
    fn create_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> impl Future<Output = Result<UserId, StoreError>> + Send;

    /// Looks a user up by name.
    fn find_credential(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<StoredCredential>, StoreError>> + Send;

    /// Sets `token` as the user's outstanding token, replacing any
    /// previous one. Returns `false` if no such user exists.
    fn store_token(
        &self,
        username: &str,
        token: &SessionToken,
        issued_at: u64,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Atomically finds the user holding `token` and clears it.
    fn take_token(
        &self,
        token: &SessionToken,
    ) -> impl Future<Output = Result<Option<TokenOwner>, StoreError>> + Send;

    /// Clears every outstanding token issued before `cutoff` (unix
    /// seconds). Returns how many were cleared.
    fn purge_tokens_issued_before(
        &self,
        cutoff: u64,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;
}

/// Current wall-clock time in unix seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// MemoryUserStore
// ---------------------------------------------------------------------------

struct UserRecord {
    id: UserId,
    password_hash: String,
    token: Option<(SessionToken, u64)>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, UserRecord>,
    /// Index from outstanding token to username, kept in sync with
    /// `UserRecord::token`.
    tokens: HashMap<SessionToken, String>,
    next_id: u64,
}

/// An in-process [`UserStore`]. Everything is lost on restart.
///
/// A single mutex guards both the user table and the token index, so
/// every operation, including the compare-and-clear in
/// [`take_token`](UserStore::take_token), is one critical section. The
/// lock is never held across an `.await`.
#[derive(Default)]
pub struct MemoryUserStore {
    state: Mutex<MemoryState>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered users.
    pub fn user_count(&self) -> usize {
        self.state.lock().users.len()
    }
}

impl UserStore for MemoryUserStore {
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<UserId, StoreError> {
        let mut state = self.state.lock();
        if state.users.contains_key(username) {
            return Err(StoreError::DuplicateUsername);
        }
        state.next_id += 1;
        let id = UserId(state.next_id);
        state.users.insert(
            username.to_string(),
            UserRecord {
                id,
                password_hash: password_hash.to_string(),
                token: None,
            },
        );
        Ok(id)
    }

    async fn find_credential(
        &self,
        username: &str,
    ) -> Result<Option<StoredCredential>, StoreError> {
        let state = self.state.lock();
        Ok(state.users.get(username).map(|record| StoredCredential {
            user_id: record.id,
            username: username.to_string(),
            password_hash: record.password_hash.clone(),
        }))
    }

    async fn store_token(
        &self,
        username: &str,
        token: &SessionToken,
        issued_at: u64,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let MemoryState { users, tokens, .. } = &mut *state;
        let Some(record) = users.get_mut(username) else {
            return Ok(false);
        };
        if let Some((previous, _)) = record.token.take() {
            tokens.remove(&previous);
        }
        record.token = Some((token.clone(), issued_at));
        tokens.insert(token.clone(), username.to_string());
        Ok(true)
    }

    async fn take_token(
        &self,
        token: &SessionToken,
    ) -> Result<Option<TokenOwner>, StoreError> {
        let mut state = self.state.lock();
        let MemoryState { users, tokens, .. } = &mut *state;
        let Some(username) = tokens.remove(token) else {
            return Ok(None);
        };
        let Some(record) = users.get_mut(&username) else {
            return Ok(None);
        };
        Ok(record.token.take().map(|(_, issued_at)| TokenOwner {
            user_id: record.id,
            username,
            issued_at,
        }))
    }

    async fn purge_tokens_issued_before(
        &self,
        cutoff: u64,
    ) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        let MemoryState { users, tokens, .. } = &mut *state;
        let mut purged = 0;
        for record in users.values_mut() {
            if matches!(&record.token, Some((_, issued_at)) if *issued_at < cutoff)
            {
                if let Some((token, _)) = record.token.take() {
                    tokens.remove(&token);
                    purged += 1;
                }
            }
        }
        Ok(purged)
    }
}
