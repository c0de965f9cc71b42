//! Identity and session handling for Tether.
//!
//! This crate owns everything between "a user typed a password" and "a
//! WebSocket is bound to that user":
//!
//! 1. **Credentials**: registration and bcrypt verification
//!    ([`CredentialStore`])
//! 2. **Session tokens**: minted at login ([`TokenIssuer`]), redeemed
//!    exactly once at upgrade time ([`SessionAuthenticator`])
//! 3. **Connection registry**: at most one live connection per user
//!    ([`ConnectionRegistry`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Server Layer (above)   ← HTTP routes and the WebSocket upgrade
//!     ↕
//! Session Layer (this crate)  ← who the user is, which socket is theirs
//!     ↕
//! Transport / Protocol (below)  ← Connection trait, UserId, wire types
//! ```
//!
//! Persistence sits behind the [`UserStore`] trait. [`MemoryUserStore`]
//! is always available; [`SqliteUserStore`] comes with the default
//! `sqlite` feature.

mod auth;
mod config;
mod credentials;
mod error;
mod issuer;
mod registry;
mod store;
mod token;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use auth::{Authenticator, Identity, SessionAuthenticator};
pub use config::{DuplicatePolicy, ParsePolicyError, SessionConfig};
pub use credentials::{CredentialStore, MAX_PASSWORD_LEN, MAX_USERNAME_LEN, PasswordHasher};
pub use error::{SessionError, StoreError};
pub use issuer::TokenIssuer;
pub use registry::{ConnectionRegistry, RegistryGuard};
pub use store::{MemoryUserStore, StoredCredential, TokenOwner, UserStore, unix_now};
pub use token::{SessionToken, TOKEN_HEX_LEN};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteUserStore;
