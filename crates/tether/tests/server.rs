//! Integration tests for the Tether server: HTTP login, token handoff,
//! and the live connection registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tether::prelude::*;
use tether_protocol::{ErrorResponse, HealthResponse, TokenResponse};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry<WebSocketConnection>>,
    http: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn register(&self, username: &str, password: &str) -> reqwest::StatusCode {
        self.http
            .post(self.url("/register"))
            .json(&Credentials::new(username, password))
            .send()
            .await
            .expect("register request")
            .status()
    }

    async fn login_raw(&self, username: &str, password: &str) -> reqwest::Response {
        self.http
            .post(self.url("/login"))
            .json(&Credentials::new(username, password))
            .send()
            .await
            .expect("login request")
    }

    async fn login(&self, username: &str, password: &str) -> String {
        let response = self.login_raw(username, password).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        response
            .json::<TokenResponse>()
            .await
            .expect("token body")
            .token
    }

    /// Registers and logs in `username`, returning a fresh token.
    async fn signup(&self, username: &str) -> String {
        assert_eq!(
            self.register(username, "pw1").await,
            reqwest::StatusCode::CREATED
        );
        self.login(username, "pw1").await
    }

    async fn upgrade(&self, token: &str) -> Result<ClientWs, tungstenite::Error> {
        let mut request = format!("ws://{}/ws", self.addr)
            .into_client_request()
            .expect("valid request");
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).expect("valid header"),
        );
        tokio_tungstenite::connect_async(request)
            .await
            .map(|(ws, _)| ws)
    }

    async fn connect(&self, token: &str) -> ClientWs {
        let mut ws = self.upgrade(token).await.expect("upgrade should succeed");
        expect_welcome(&mut ws).await;
        ws
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Starts a server on a random port. bcrypt runs at its minimum cost.
async fn start_server(policy: DuplicatePolicy) -> TestServer {
    let config = SessionConfig {
        bcrypt_cost: 4,
        duplicate_policy: policy,
        ..SessionConfig::default()
    };
    let server = TetherServerBuilder::new()
        .bind("127.0.0.1:0")
        .session_config(config)
        .build(Arc::new(MemoryUserStore::new()))
        .await
        .expect("server should build");

    let addr = server.local_addr().expect("should have local addr");
    let registry = server.registry();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = server
            .run_until(async {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        addr,
        registry,
        http: reqwest::Client::new(),
        shutdown: Some(tx),
    }
}

async fn next_frame(ws: &mut ClientWs) -> Message {
    tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("frame in time")
        .expect("stream open")
        .expect("valid frame")
}

async fn expect_welcome(ws: &mut ClientWs) -> ServerFrame {
    match next_frame(ws).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).expect("welcome JSON"),
        other => panic!("expected welcome text frame, got {other:?}"),
    }
}

async fn expect_close_code(ws: &mut ClientWs, code: u16) {
    match next_frame(ws).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), code),
        other => panic!("expected close frame {code}, got {other:?}"),
    }
}

fn expect_unauthorized(result: Result<ClientWs, tungstenite::Error>) {
    match result {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 401);
        }
        Err(other) => panic!("expected HTTP 401, got {other:?}"),
        Ok(_) => panic!("expected HTTP 401, got an upgraded connection"),
    }
}

/// Polls `check` until it holds or two seconds pass.
async fn eventually(check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_handoff_round_trip() {
    let server = start_server(DuplicatePolicy::ReplaceExisting).await;

    assert_eq!(
        server.register("alice", "pw1").await,
        reqwest::StatusCode::CREATED
    );
    let token = server.login("alice", "pw1").await;
    assert_eq!(token.len(), 64);

    let mut ws = server.upgrade(&token).await.expect("first upgrade");
    let welcome = expect_welcome(&mut ws).await;
    let ServerFrame::Welcome { user_id, username } = welcome;
    assert_eq!(username, "alice");
    assert!(server.registry.lookup(user_id).is_some());

    // The token was consumed by the first upgrade.
    expect_unauthorized(server.upgrade(&token).await);

    ws.close(None).await.expect("client close");
    let registry = Arc::clone(&server.registry);
    eventually(move || registry.lookup(user_id).is_none()).await;
}

#[tokio::test]
async fn test_upgrade_missing_or_garbage_token_returns_401() {
    let server = start_server(DuplicatePolicy::ReplaceExisting).await;

    let request = format!("ws://{}/ws", server.addr)
        .into_client_request()
        .unwrap();
    expect_unauthorized(tokio_tungstenite::connect_async(request).await.map(|(ws, _)| ws));

    expect_unauthorized(server.upgrade("not-a-token").await);
    expect_unauthorized(server.upgrade(&"ab".repeat(32)).await);
}

#[tokio::test]
async fn test_upgrade_plain_get_does_not_consume_token() {
    let server = start_server(DuplicatePolicy::ReplaceExisting).await;
    let token = server.signup("alice").await;

    let response = server
        .http
        .get(server.url("/ws"))
        .bearer_auth(&token)
        .send()
        .await
        .expect("plain GET");
    assert!(response.status().is_client_error());
    assert_ne!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    // The token survived the non-upgrade request.
    server.connect(&token).await;
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let server = start_server(DuplicatePolicy::ReplaceExisting).await;
    server.register("alice", "pw1").await;

    let wrong_password = server.login_raw("alice", "nope").await;
    let unknown_user = server.login_raw("mallory", "pw1").await;

    assert_eq!(wrong_password.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status(), reqwest::StatusCode::UNAUTHORIZED);
    let a: ErrorResponse = wrong_password.json().await.unwrap();
    let b: ErrorResponse = unknown_user.json().await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.error, "unauthorized");
}

#[tokio::test]
async fn test_login_password_longer_than_72_bytes_returns_401() {
    let server = start_server(DuplicatePolicy::ReplaceExisting).await;
    let password = "p".repeat(72);
    assert_eq!(
        server.register("alice", &password).await,
        reqwest::StatusCode::CREATED
    );

    let response = server
        .login_raw("alice", &format!("{password}WRONG-SUFFIX"))
        .await;

    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    let body: ErrorResponse = response.json().await.unwrap();
    assert_eq!(body.error, "unauthorized");
}

#[tokio::test]
async fn test_empty_fields_rejected() {
    let server = start_server(DuplicatePolicy::ReplaceExisting).await;
    server.register("alice", "pw1").await;

    assert_eq!(
        server.register("", "pw").await,
        reqwest::StatusCode::BAD_REQUEST
    );
    assert_eq!(
        server.login_raw("alice", "").await.status(),
        reqwest::StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_register_duplicate_returns_409() {
    let server = start_server(DuplicatePolicy::ReplaceExisting).await;

    assert_eq!(
        server.register("alice", "pw1").await,
        reqwest::StatusCode::CREATED
    );
    assert_eq!(
        server.register("alice", "pw2").await,
        reqwest::StatusCode::CONFLICT
    );
}

#[tokio::test]
async fn test_malformed_body_returns_400() {
    let server = start_server(DuplicatePolicy::ReplaceExisting).await;

    for path in ["/register", "/login"] {
        let status = server
            .http
            .post(server.url(path))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST, "{path}");
    }
}

#[tokio::test]
async fn test_second_login_invalidates_first_token() {
    let server = start_server(DuplicatePolicy::ReplaceExisting).await;
    let first = server.signup("alice").await;
    let second = server.login("alice", "pw1").await;

    expect_unauthorized(server.upgrade(&first).await);
    server.connect(&second).await;
}

#[tokio::test]
async fn test_replace_policy_closes_displaced_connection() {
    let server = start_server(DuplicatePolicy::ReplaceExisting).await;
    let token = server.signup("alice").await;
    let mut old = server.connect(&token).await;

    let token = server.login("alice", "pw1").await;
    let mut new = server.upgrade(&token).await.expect("second upgrade");
    let ServerFrame::Welcome { user_id, .. } = expect_welcome(&mut new).await;

    expect_close_code(&mut old, 4000).await;

    // The displaced connection's teardown leaves the replacement alone.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.registry.lookup(user_id).is_some());
    assert_eq!(server.registry.len(), 1);
}

#[tokio::test]
async fn test_reject_policy_closes_new_connection() {
    let server = start_server(DuplicatePolicy::RejectNew).await;
    let token = server.signup("alice").await;
    let mut first = server.connect(&token).await;

    let token = server.login("alice", "pw1").await;
    let mut second = server.upgrade(&token).await.expect("upgrade completes");
    expect_close_code(&mut second, 4001).await;

    // The first connection is still live.
    assert_eq!(server.registry.len(), 1);
    first
        .send(Message::Text("still here".into()))
        .await
        .expect("first connection open");
}

#[tokio::test]
async fn test_concurrent_upgrades_same_token_single_winner() {
    let server = start_server(DuplicatePolicy::ReplaceExisting).await;
    let token = server.signup("alice").await;

    let (a, b) = tokio::join!(server.upgrade(&token), server.upgrade(&token));

    let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_health_reports_connection_count() {
    let server = start_server(DuplicatePolicy::ReplaceExisting).await;
    let token = server.signup("alice").await;
    let _ws = server.connect(&token).await;

    let health: HealthResponse = server
        .http
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(health.status, "ok");
    assert_eq!(health.connections, 1);
}

#[tokio::test]
async fn test_shutdown_closes_live_connections() {
    let mut server = start_server(DuplicatePolicy::ReplaceExisting).await;
    let token = server.signup("alice").await;
    let mut ws = server.connect(&token).await;

    server.stop();

    expect_close_code(&mut ws, 1001).await;
}

#[tokio::test]
async fn test_client_frames_are_discarded() {
    let server = start_server(DuplicatePolicy::ReplaceExisting).await;
    let token = server.signup("alice").await;
    let mut ws = server.connect(&token).await;

    ws.send(Message::Text("hello?".into())).await.unwrap();
    ws.send(Message::Binary(b"\x00\x01".to_vec().into()))
        .await
        .unwrap();

    // Nothing comes back, and the connection stays registered.
    let reply = tokio::time::timeout(Duration::from_millis(100), ws.next()).await;
    assert!(reply.is_err(), "server should not answer client frames");
    assert_eq!(server.registry.len(), 1);
}
