//! # Warden Bridge
//!
//! Interactive shell sessions over a duplex text channel.
//!
//! Each client connection gets its own freshly spawned shell process. Text
//! frames from the client are appended to the shell's stdin; whatever the
//! shell writes to stdout or stderr comes back as text frames. When either
//! side goes away the session is torn down and the process is killed and
//! reaped.
//!
//! ## Architecture
//!
//! *   **`session`**: spawns the shell, runs one reader task per output stream
//!     and pumps frames until the session terminates.
//! *   **`codec`**: stateful decoding with a configurable primary encoding and
//!     a UTF-8 fallback; never fails, never splits a character.
//! *   **`connection`**: the transport seam. WebSocket for the server, tokio
//!     channels for embedding and tests.
//! *   **`bridge`**: axum server exposing `GET /health` and the terminal
//!     WebSocket at `/api/ws/terminal`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use warden_bridge::{BridgeConfig, start_bridge};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), warden_bridge::BridgeError> {
//!     start_bridge(BridgeConfig::default()).await
//! }
//! ```

pub mod bridge;
pub mod codec;
pub mod connection;
pub mod error;
pub mod session;

pub use bridge::{BridgeConfig, TERMINAL_ROUTE, WsConnection, router, serve, start_bridge};
pub use codec::{StreamDecoder, TextCodec};
pub use connection::{ChannelClient, ChannelConnection, CloseReason, Connection, ServerMessage};
pub use error::{BridgeError, Result};
pub use session::{
    DEFAULT_READ_CHUNK_SIZE, DEFAULT_REAP_TIMEOUT, OUTPUT_DRAIN_TIMEOUT, SessionOutcome, ShellConfig, ShellSession,
    StreamKind, default_shell, run_session,
};
pub use warden_common::{SessionLifecycle, SessionPhase, TerminationReason};
