//! # Tether
//!
//! Password login over HTTP, handed off to a persistent WebSocket.
//!
//! A client registers, logs in, and receives a single-use session token.
//! Presenting that token as `Authorization: Bearer <token>` on a
//! WebSocket upgrade to `/ws` binds the new connection to the user's
//! identity in a [`ConnectionRegistry`](tether_session::ConnectionRegistry).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tether::prelude::*;
//!
//! # async fn run() -> Result<(), TetherError> {
//! let store = Arc::new(MemoryUserStore::new());
//! let server = TetherServerBuilder::new()
//!     .bind("127.0.0.1:3333")
//!     .build(store)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod handoff;
mod server;

pub use config::{ConfigError, ServerConfig};
pub use error::{ApiError, TetherError};
pub use handler::router;
pub use handoff::Handoff;
pub use server::{TetherServer, TetherServerBuilder};

/// Everything needed to embed a Tether server.
pub mod prelude {
    pub use crate::{
        ApiError, ConfigError, Handoff, ServerConfig, TetherError,
        TetherServer, TetherServerBuilder,
    };
    pub use tether_protocol::{Credentials, ServerFrame, UserId};
    pub use tether_session::{
        Authenticator, ConnectionRegistry, DuplicatePolicy, Identity,
        MemoryUserStore, SessionConfig, SessionError, UserStore,
    };
    #[cfg(feature = "sqlite")]
    pub use tether_session::SqliteUserStore;
    pub use tether_transport::{CloseReason, Connection, WebSocketConnection};
}
