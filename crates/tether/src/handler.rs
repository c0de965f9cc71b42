//! HTTP routes and the per-connection task.
//!
//! Each upgraded WebSocket gets its own Tokio task running
//! [`run_connection`]. The flow is:
//!   1. Register the handle under the redeemed identity
//!   2. Send a `Welcome` frame
//!   3. Loop: read (and discard) client frames until the socket closes
//!   4. The registry guard drops and releases the entry

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tether_protocol::{
    Codec, Credentials, HealthResponse, JsonCodec, ProtocolError, ServerFrame, TokenResponse,
};
use tether_session::{Authenticator, Identity, UserStore};
use tether_transport::{Connection, WebSocketConnection};

use crate::{ApiError, Handoff, TetherError};

type SharedHandoff<S, A> = Arc<Handoff<S, A, WebSocketConnection>>;

/// Builds the HTTP surface around a handoff.
///
/// ```text
/// POST /register  {username, password}  → 201 | 400 | 409 | 500
/// POST /login     {username, password}  → 200 {token} | 400 | 401 | 500
/// GET  /ws        Bearer <token>        → 101 | 401
/// GET  /health                          → 200 {status, connections}
/// ```
pub fn router<S, A>(handoff: SharedHandoff<S, A>) -> Router
where
    S: UserStore,
    A: Authenticator,
{
    Router::new()
        .route("/register", post(register::<S, A>))
        .route("/login", post(login::<S, A>))
        .route("/ws", get(upgrade::<S, A>))
        .route("/health", get(health::<S, A>))
        .with_state(handoff)
}

async fn register<S: UserStore, A: Authenticator>(
    State(handoff): State<SharedHandoff<S, A>>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(credentials) = body?;
    handoff.register(&credentials).await?;
    Ok(StatusCode::CREATED)
}

async fn login<S: UserStore, A: Authenticator>(
    State(handoff): State<SharedHandoff<S, A>>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(credentials) = body?;
    let token = handoff.login(&credentials).await?;
    Ok(Json(TokenResponse {
        token: token.into_string(),
    }))
}

async fn health<S: UserStore, A: Authenticator>(
    State(handoff): State<SharedHandoff<S, A>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        connections: handoff.registry().len(),
    })
}

/// Redeems the bearer token and upgrades.
///
/// A request that isn't a valid upgrade is turned away before the token
/// is touched, so it can't burn a token. Once redeemed, the token is
/// gone even if the client then drops the upgrade.
async fn upgrade<S: UserStore, A: Authenticator>(
    State(handoff): State<SharedHandoff<S, A>>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        tracing::warn!("upgrade without bearer token");
        return ApiError::MissingToken.into_response();
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    let identity = match handoff.redeem(token).await {
        Ok(identity) => identity,
        Err(err) => {
            tracing::warn!(error = %err, "upgrade rejected");
            return ApiError::from(err).into_response();
        }
    };

    ws.on_upgrade(move |socket| run_connection(handoff, identity, socket))
}

/// Extracts `<token>` from `Authorization: Bearer <token>`. The scheme is
/// case-insensitive.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Owns one upgraded connection from registration to close.
async fn run_connection<S: UserStore, A: Authenticator>(
    handoff: SharedHandoff<S, A>,
    identity: Identity,
    socket: WebSocket,
) {
    let conn = Arc::new(WebSocketConnection::new(socket));
    let conn_id = conn.id();
    let user_id = identity.user_id;

    // Dropping the guard releases the registration on every exit below.
    let _guard = match handoff.attach(&identity, Arc::clone(&conn)).await {
        Ok(guard) => guard,
        Err(err) => {
            tracing::info!(%user_id, %conn_id, error = %err, "connection refused");
            return;
        }
    };

    let welcome = ServerFrame::Welcome {
        user_id,
        username: identity.username,
    };
    if let Err(e) = send_frame(&conn, &welcome).await {
        tracing::debug!(%user_id, %conn_id, error = %e, "failed to send welcome");
        return;
    }

    loop {
        match conn.recv().await {
            Ok(Some(frame)) => {
                tracing::debug!(
                    %user_id,
                    %conn_id,
                    bytes = frame.len(),
                    "client frame discarded"
                );
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(%user_id, %conn_id, error = %e, "recv error");
                break;
            }
        }
    }

    tracing::info!(%user_id, %conn_id, "user disconnected");
}

/// Sends `frame` as a JSON text frame.
async fn send_frame(conn: &WebSocketConnection, frame: &ServerFrame) -> Result<(), TetherError> {
    let bytes = JsonCodec.encode(frame)?;
    let text = String::from_utf8(bytes)
        .map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;
    conn.send_text(&text).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers_with(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(auth).expect("valid header"),
        );
        headers
    }

    #[test]
    fn test_bearer_token_extracts_token() {
        let headers = headers_with("Bearer abc123");
        assert_eq!(bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn test_bearer_token_scheme_is_case_insensitive() {
        let headers = headers_with("bearer abc123");
        assert_eq!(bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn test_bearer_token_missing_or_wrong_scheme_returns_none() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);
        assert_eq!(bearer_token(&headers_with("Basic YWxpY2U6cHcx")), None);
        assert_eq!(bearer_token(&headers_with("Bearer")), None);
        assert_eq!(bearer_token(&headers_with("Bearer   ")), None);
    }
}
