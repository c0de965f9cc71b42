//! Error types for the session layer.

use tether_protocol::UserId;

/// Errors raised by a [`UserStore`](crate::UserStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The username is already taken. Backends must report this
    /// atomically: of two concurrent registrations of the same name,
    /// exactly one gets this error.
    #[error("username already exists")]
    DuplicateUsername,

    /// The backend itself failed (I/O, SQL, a poisoned worker).
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Errors that can occur while registering, logging in, exchanging a
/// token, or registering a connection.
///
/// `InvalidCredentials` and `InvalidToken` are deliberately vague; the
/// HTTP layer renders both as the same 401.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Malformed or empty input, caught before touching the store.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Unknown username or wrong password. Which one is never said.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The presented session token is malformed, unknown, already
    /// consumed, or expired.
    #[error("invalid session token")]
    InvalidToken,

    /// Registration with a username that already exists.
    #[error("username {0:?} is already taken")]
    DuplicateUsername(String),

    /// The user already has a live connection and the registry is
    /// configured to refuse a second one.
    #[error("user {0} already has a live connection")]
    AlreadyConnected(UserId),

    /// The backing store failed. Never retried inside a request.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<StoreError> for SessionError {
    /// Registration maps [`StoreError::DuplicateUsername`] itself, with
    /// the username attached. Anywhere else it is a backend bug.
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateUsername => SessionError::Storage(
                "unexpected duplicate username".into(),
            ),
            StoreError::Backend(msg) => SessionError::Storage(msg),
        }
    }
}
