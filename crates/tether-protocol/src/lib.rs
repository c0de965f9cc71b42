//! Wire types for Tether.
//!
//! This crate defines everything that crosses the network boundary:
//!
//! - **Types** ([`UserId`], [`Credentials`], [`TokenResponse`],
//!   [`ServerFrame`], etc.): the HTTP request/response bodies and the
//!   frames the server pushes over a live connection.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how frames are
//!   converted to/from bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong during
//!   encoding/decoding.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (frames, payloads) → Session (identity)
//! ```
//!
//! The protocol layer knows nothing about tokens being valid or
//! connections being registered. It only knows the shapes.

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    Credentials, ErrorResponse, HealthResponse, ServerFrame, TokenResponse,
    UserId,
};
