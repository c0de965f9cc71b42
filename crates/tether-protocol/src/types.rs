//! Core protocol types for Tether's wire format.
//!
//! Two families of types live here:
//!
//! - HTTP bodies for `/register`, `/login` and error responses.
//! - [`ServerFrame`], the messages the server pushes over a live
//!   connection once the handoff has completed.

use serde::{Deserialize, Serialize};

use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a registered user.
///
/// Assigned by the user store on registration and never reused while the
/// account exists. `#[serde(transparent)]` keeps it a plain number on the
/// wire: `UserId(42)` is `42`, not `{"0":42}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// HTTP bodies
// ---------------------------------------------------------------------------

/// Username and password, as posted to `/register` and `/login`.
///
/// Missing fields deserialize as empty strings so that `{}` and
/// `{"username":""}` are rejected by the same emptiness check instead of
/// failing at the JSON layer.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    /// Convenience constructor, mostly for clients and tests.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Passwords never reach logs, even at `debug` level.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body of a successful `/login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The single-use session token, 64 lowercase hex characters.
    pub token: String,
}

/// Body of every error response.
///
/// Authentication failures always carry the same `error` text so a client
/// can't tell an unknown username from a wrong password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Body of `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Number of live connections in the registry.
    pub connections: usize,
}

// ---------------------------------------------------------------------------
// ServerFrame: pushed over a live connection
// ---------------------------------------------------------------------------

/// Frames the server sends on an established connection.
///
/// Internally tagged: `Welcome` becomes
/// `{"type":"welcome","user_id":1,"username":"alice"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Sent once, right after the connection has been registered.
    Welcome { user_id: UserId, username: String },
}
