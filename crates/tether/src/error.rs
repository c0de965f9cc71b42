//! Unified error type for Tether, and its HTTP rendering.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tether_protocol::{ErrorResponse, ProtocolError};
use tether_session::{SessionError, StoreError};
use tether_transport::TransportError;

use crate::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `tether` crate, you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant auto-generates `From` impls, so the `?`
/// operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    /// A transport-level error (send, recv, close).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (credentials, tokens, registry).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The user store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Binding or serving the listener failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Body text of every 401. Identical for unknown users, wrong passwords
/// and bad tokens.
pub(crate) const UNAUTHORIZED: &str = "unauthorized";

/// An error on its way out as an HTTP response.
///
/// | Cause | Status |
/// |---|---|
/// | malformed body, [`SessionError::Validation`] | 400 |
/// | missing bearer, bad credentials, bad token | 401 |
/// | [`SessionError::DuplicateUsername`], [`SessionError::AlreadyConnected`] | 409 |
/// | [`SessionError::Storage`] | 500 |
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body could not be read as credentials.
    #[error("malformed request body: {0}")]
    BadRequest(String),

    /// No usable `Authorization: Bearer` header.
    #[error("missing bearer token")]
    MissingToken,

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MissingToken => StatusCode::UNAUTHORIZED,
            ApiError::Session(err) => match err {
                SessionError::Validation(_) => StatusCode::BAD_REQUEST,
                SessionError::InvalidCredentials | SessionError::InvalidToken => {
                    StatusCode::UNAUTHORIZED
                }
                SessionError::DuplicateUsername(_)
                | SessionError::AlreadyConnected(_) => StatusCode::CONFLICT,
                SessionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::UNAUTHORIZED {
            UNAUTHORIZED.to_string()
        } else if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(ErrorResponse::new(message))).into_response()
    }
}
