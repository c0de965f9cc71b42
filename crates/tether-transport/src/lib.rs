//! Connection handle abstraction for Tether.
//!
//! Provides the [`Connection`] trait: a live, bidirectional channel that
//! the connection registry owns once a client has completed the handoff.
//! The registry and the handoff controller are written against this
//! trait, so tests can drive them with in-memory handles.
//!
//! # Feature Flags
//!
//! - `websocket` (default): [`WebSocketConnection`], a handle over an
//!   upgraded `axum` WebSocket.

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;

use std::fmt;
use std::future::Future;

/// Opaque identifier for a connection.
///
/// Two connections of the same user always have different ids, which is
/// what lets the registry tell a displaced connection from its
/// replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why the server is closing a connection.
///
/// Each reason maps to a WebSocket close code so clients can react
/// (a `Replaced` client should not blindly reconnect, for example).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Ordinary close.
    Normal,
    /// The server is shutting down.
    ServerShutdown,
    /// A newer connection for the same user took this one's place.
    Replaced,
    /// The user already had a live connection and new ones are refused.
    AlreadyConnected,
}

impl CloseReason {
    /// The WebSocket close code sent with this reason.
    pub fn code(self) -> u16 {
        match self {
            CloseReason::Normal => 1000,
            CloseReason::ServerShutdown => 1001,
            CloseReason::Replaced => 4000,
            CloseReason::AlreadyConnected => 4001,
        }
    }

    /// Short human-readable text sent alongside the code.
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Normal => "closed",
            CloseReason::ServerShutdown => "server shutting down",
            CloseReason::Replaced => "replaced by a newer connection",
            CloseReason::AlreadyConnected => "already connected",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single live connection that can send and receive bytes.
///
/// Every method returns a `Send` future: handles are used from spawned
/// tasks and from generic code (the registry) that must stay spawnable.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends data to the remote peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is closed, either cleanly
    /// by the peer or locally through [`close`](Self::close).
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    /// Closes the connection with the given reason.
    ///
    /// A pending or future [`recv`](Self::recv) on the same handle
    /// returns `Ok(None)` once this has been called.
    fn close(
        &self,
        reason: CloseReason,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
