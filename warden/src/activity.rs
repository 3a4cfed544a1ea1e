//! Activity reporting for gateway operations.
//!
//! The gateway reports what it did through an injected [`ActivitySink`]
//! instead of writing into any process-wide store. Hosts pick the sink: log
//! through `tracing`, forward over a channel to whatever renders an activity
//! feed, or discard.

use crate::error::Operation;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{fmt, path::PathBuf};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Something the gateway did or refused to do.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityEvent {
    FileWritten { path: PathBuf, bytes: usize },
    FileRead { path: PathBuf, bytes: usize },
    FileDeleted { path: PathBuf },
    Blocked {
        attempted: PathBuf,
        root: PathBuf,
        operation: Operation,
    },
    AlreadyExists { path: PathBuf },
    NotFound { path: PathBuf },
    Failed { operation: Operation, error: String },
    Salvaged { files: Vec<PathBuf> },
}

impl fmt::Display for ActivityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityEvent::FileWritten { path, bytes } => {
                write!(f, "Wrote {} bytes to {}", bytes, path.display())
            }
            ActivityEvent::FileRead { path, bytes } => {
                write!(f, "Read {} bytes from {}", bytes, path.display())
            }
            ActivityEvent::FileDeleted { path } => write!(f, "Deleted {}", path.display()),
            ActivityEvent::Blocked {
                attempted,
                root,
                operation,
            } => write!(
                f,
                "Blocked {} of {} (outside {})",
                operation,
                attempted.display(),
                root.display()
            ),
            ActivityEvent::AlreadyExists { path } => {
                write!(f, "Refused to overwrite {}", path.display())
            }
            ActivityEvent::NotFound { path } => write!(f, "Not found: {}", path.display()),
            ActivityEvent::Failed { operation, error } => {
                write!(f, "{} failed: {}", operation, error)
            }
            ActivityEvent::Salvaged { files } => {
                write!(f, "Salvaged {} file(s) from agent output", files.len())
            }
        }
    }
}

/// An event together with the moment it was recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ActivityEvent,
}

impl ActivityRecord {
    pub fn now(event: ActivityEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Receiver of gateway activity.
pub trait ActivitySink: Send + Sync {
    fn record(&self, event: ActivityEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ActivitySink for TracingSink {
    fn record(&self, event: ActivityEvent) {
        let timestamp = Utc::now().to_rfc3339();
        match &event {
            ActivityEvent::Blocked { .. } => warn!(%timestamp, "{}", event),
            ActivityEvent::Failed { .. } => error!(%timestamp, "{}", event),
            _ => info!(%timestamp, "{}", event),
        }
    }
}

/// Forwards timestamped events to a channel.
///
/// A dropped receiver is not an error; events are then discarded.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ActivityRecord>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<ActivityRecord>) -> Self {
        Self { sender }
    }

    /// A sink plus the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ActivityRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ActivitySink for ChannelSink {
    fn record(&self, event: ActivityEvent) {
        let _ = self.sender.send(ActivityRecord::now(event));
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ActivitySink for NullSink {
    fn record(&self, _event: ActivityEvent) {}
}
