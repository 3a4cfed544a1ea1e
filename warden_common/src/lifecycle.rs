//! Shell session lifecycle shared between the bridge and its hosts.
//!
//! A session moves `Idle -> Connected -> Terminated` and never leaves
//! `Terminated`. The state lives in a `tokio::sync::watch` channel so the
//! connection loop, the reader tasks and any host can observe a transition
//! as soon as it happens instead of polling a flag.
//!
//! # Example
//!
//! ```rust
//! use warden_common::lifecycle::{SessionLifecycle, SessionPhase, TerminationReason};
//!
//! let lifecycle = SessionLifecycle::new();
//! lifecycle.connect(4242).unwrap();
//!
//! // Only the first caller wins the right to tear the session down.
//! assert!(lifecycle.terminate(TerminationReason::ClientDisconnected));
//! assert!(!lifecycle.terminate(TerminationReason::ProcessExited));
//!
//! assert!(matches!(
//!     lifecycle.current(),
//!     SessionPhase::Terminated { reason: TerminationReason::ClientDisconnected }
//! ));
//! ```

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Why a shell session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    /// The client closed the connection (or the connection dropped).
    ClientDisconnected,
    /// One of the shell's output streams reached end-of-input.
    ProcessExited,
    /// An unrecoverable read or write error on the process streams or the connection.
    StreamError,
    /// The shell process could not be started.
    SpawnFailed,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::ClientDisconnected => "client_disconnected",
            TerminationReason::ProcessExited => "process_exited",
            TerminationReason::StreamError => "stream_error",
            TerminationReason::SpawnFailed => "spawn_failed",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phases of a session. `Terminated` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, shell not yet running.
    Idle,
    /// Shell running with the given process id.
    Connected { pid: Option<u32> },
    /// Torn down; no further reads or writes may happen.
    Terminated { reason: TerminationReason },
}

impl SessionPhase {
    pub fn is_terminated(&self) -> bool {
        matches!(self, SessionPhase::Terminated { .. })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionPhase::Connected { .. })
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("session can only connect from Idle (current phase: {0:?})")]
    NotIdle(SessionPhase),
}

/// Observable session lifecycle.
///
/// Cloning is cheap; all clones observe and drive the same state.
#[derive(Clone)]
pub struct SessionLifecycle {
    sender: Arc<watch::Sender<SessionPhase>>,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(SessionPhase::Idle);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Current phase without blocking.
    pub fn current(&self) -> SessionPhase {
        self.sender.borrow().clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.sender.borrow().is_terminated()
    }

    /// Subscribe to phase changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.sender.subscribe()
    }

    /// `Idle -> Connected`.
    pub fn connect(&self, pid: u32) -> Result<(), LifecycleError> {
        self.connect_with(Some(pid))
    }

    /// `Idle -> Connected` for platforms that do not report a pid.
    pub fn connect_with(&self, pid: Option<u32>) -> Result<(), LifecycleError> {
        let mut rejected = None;
        self.sender.send_if_modified(|phase| {
            if matches!(phase, SessionPhase::Idle) {
                *phase = SessionPhase::Connected { pid };
                true
            } else {
                rejected = Some(phase.clone());
                false
            }
        });
        match rejected {
            None => Ok(()),
            Some(phase) => Err(LifecycleError::NotIdle(phase)),
        }
    }

    /// Move to `Terminated` from any other phase.
    ///
    /// Returns `true` for exactly one caller per session: the one that must run
    /// the teardown routine. Every later call is a no-op returning `false`.
    pub fn terminate(&self, reason: TerminationReason) -> bool {
        self.sender.send_if_modified(|phase| {
            if phase.is_terminated() {
                false
            } else {
                *phase = SessionPhase::Terminated { reason };
                true
            }
        })
    }

    /// Resolves once the session is terminated, with the reason recorded by
    /// the winning `terminate` call.
    pub async fn wait_terminated(&self) -> TerminationReason {
        let mut rx = self.sender.subscribe();
        loop {
            if let SessionPhase::Terminated { reason } = &*rx.borrow_and_update() {
                return *reason;
            }
            // The sender lives in `self`, so `changed` cannot observe a closed channel.
            if rx.changed().await.is_err() {
                return TerminationReason::StreamError;
            }
        }
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLifecycle")
            .field("phase", &*self.sender.borrow())
            .finish()
    }
}
