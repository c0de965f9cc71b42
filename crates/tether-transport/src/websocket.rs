//! WebSocket connection handle over an upgraded `axum` socket.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, Notify};

use crate::{CloseReason, Connection, ConnectionId, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A single upgraded WebSocket connection.
///
/// The socket is split so that the owning task can sit in
/// [`recv`](Connection::recv) while another task (the registry replacing
/// this connection, or server shutdown) sends a close frame.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl WebSocketConnection {
    /// Wraps a freshly upgraded socket and assigns it a new id.
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        tracing::debug!(%id, "wrapped upgraded WebSocket");
        Self {
            id,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        }
    }

    /// Returns `true` once [`close`](Connection::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Sends `text` as a text frame. JSON frames for browser clients go
    /// through here; [`send`](Connection::send) always sends binary.
    pub async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.send_message(Message::Text(text.into())).await
    }

    async fn send_message(&self, msg: Message) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed(format!(
                "{} already closed",
                self.id
            )));
        }
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.send_message(Message::Binary(data.to_vec().into())).await
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        // Registered before the flag check so a close racing with this
        // call still wakes us.
        let closed = self.close_signal.notified();
        tokio::pin!(closed);
        if self.is_closed() {
            return Ok(None);
        }

        let mut stream = self.stream.lock().await;
        loop {
            tokio::select! {
                _ = &mut closed => return Ok(None),
                msg = stream.next() => match msg {
                    Some(Ok(Message::Binary(data))) => {
                        return Ok(Some(data.to_vec()));
                    }
                    Some(Ok(Message::Text(text))) => {
                        return Ok(Some(text.as_str().as_bytes().to_vec()));
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(None),
                    Some(Ok(_)) => continue, // ping/pong
                    Some(Err(e)) => {
                        return Err(TransportError::ReceiveFailed(
                            std::io::Error::new(
                                std::io::ErrorKind::ConnectionReset,
                                e,
                            ),
                        ));
                    }
                },
            }
        }
    }

    async fn close(&self, reason: CloseReason) -> Result<(), Self::Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.close_signal.notify_waiters();

        let frame = CloseFrame {
            code: reason.code(),
            reason: reason.as_str().into(),
        };
        tracing::debug!(id = %self.id, %reason, "closing WebSocket");
        self.sink
            .lock()
            .await
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| {
                TransportError::SendFailed(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    e,
                ))
            })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
