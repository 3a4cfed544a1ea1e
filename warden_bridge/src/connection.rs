//! Client-facing duplex channel.
//!
//! A shell session does not care what carries its frames. Inbound frames are
//! raw text appended to the shell's stdin; outbound frames are one read's
//! worth of decoded output, with no envelope. `WsConnection` (in `bridge`)
//! carries them over a WebSocket; `ChannelConnection` carries them over tokio
//! channels for embedding the bridge in another host and for tests.

use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Close status sent to the client when the server ends the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    /// RFC 6455 normal closure.
    pub const NORMAL: u16 = 1000;
    /// RFC 6455 internal error.
    pub const INTERNAL_ERROR: u16 = 1011;

    pub fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: Self::NORMAL,
            reason: reason.into(),
        }
    }

    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self {
            code: Self::INTERNAL_ERROR,
            reason: reason.into(),
        }
    }

    /// WebSocket close reasons are limited to 123 bytes.
    pub fn truncated(mut self) -> Self {
        const MAX_REASON_BYTES: usize = 123;
        if self.reason.len() > MAX_REASON_BYTES {
            let mut end = MAX_REASON_BYTES;
            while !self.reason.is_char_boundary(end) {
                end -= 1;
            }
            self.reason.truncate(end);
        }
        self
    }
}

/// One client connection as seen by a shell session.
#[async_trait]
pub trait Connection: Send {
    /// Next inbound frame. `None` once the client has disconnected.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Deliver one outbound frame.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Close from the server side. Errors are swallowed; the client may already be gone.
    async fn close(&mut self, reason: Option<CloseReason>);
}

/// What the client end of a `ChannelConnection` observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Frame(String),
    Closed(Option<CloseReason>),
}

/// Server end of an in-process connection.
pub struct ChannelConnection {
    inbound: mpsc::Receiver<String>,
    outbound: mpsc::Sender<ServerMessage>,
    closed: bool,
}

/// Client end of an in-process connection.
///
/// Dropping it (or calling `disconnect`) is a client-initiated disconnect.
pub struct ChannelClient {
    input: mpsc::Sender<String>,
    output: mpsc::Receiver<ServerMessage>,
}

impl ChannelConnection {
    /// Create a connected pair with the given per-direction buffer.
    pub fn pair(capacity: usize) -> (ChannelConnection, ChannelClient) {
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (output_tx, output_rx) = mpsc::channel(capacity);
        (
            ChannelConnection {
                inbound: input_rx,
                outbound: output_tx,
                closed: false,
            },
            ChannelClient {
                input: input_tx,
                output: output_rx,
            },
        )
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    async fn recv(&mut self) -> Option<Result<String>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.outbound
            .send(ServerMessage::Frame(text))
            .await
            .map_err(|_| BridgeError::Connection("Client end dropped".to_string()))
    }

    async fn close(&mut self, reason: Option<CloseReason>) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.outbound.send(ServerMessage::Closed(reason)).await;
        self.inbound.close();
    }
}

impl ChannelClient {
    /// Send raw input. Callers supply their own line terminators.
    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        self.input
            .send(text.into())
            .await
            .map_err(|_| BridgeError::Connection("Session no longer accepts input".to_string()))
    }

    /// Next message from the session, `None` once the server end is gone.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.output.recv().await
    }

    /// Client-initiated disconnect.
    pub fn disconnect(self) {}
}
