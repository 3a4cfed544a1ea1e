//! Rejections reported by the workspace gateway.
//!
//! Every outcome of a gateway operation is a value. The `Display` text of a
//! rejection is what the textual tool contract hands back to callers, so the
//! wording here is part of the public interface ("BLOCKED", "already exists").

use serde::Serialize;
use std::{fmt, io, path::PathBuf};
use thiserror::Error;

/// Gateway operation that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Write,
    Read,
    Delete,
    List,
}

impl Operation {
    fn failure_phrase(self) -> &'static str {
        match self {
            Operation::Write => "writing to the file",
            Operation::Read => "reading the file",
            Operation::Delete => "deleting the file",
            Operation::List => "listing the directory",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Write => "write",
            Operation::Read => "read",
            Operation::Delete => "delete",
            Operation::List => "list",
        };
        f.write_str(name)
    }
}

/// What kind of rejection occurred, for callers that branch on outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    OutsideWorkspace,
    AlreadyExists,
    NotFound,
    NotAFile,
    Io,
}

#[derive(Debug, Error)]
pub enum Rejection {
    /// The resolved path escapes the workspace root. No I/O was performed.
    #[error(
        "BLOCKED: Path '{}' is outside the workspace directory '{}'. All file operations must stay within the workspace.",
        .attempted.display(),
        .root.display()
    )]
    OutsideWorkspace { attempted: PathBuf, root: PathBuf },

    #[error(
        "File {} already exists and overwrite option was not passed.",
        .path.display()
    )]
    AlreadyExists { path: PathBuf },

    #[error("File not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("Not a file: {}", .path.display())]
    NotAFile { path: PathBuf },

    #[error("An error occurred while {}: {source}", .operation.failure_phrase())]
    Io {
        operation: Operation,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Rejection {
    pub fn kind(&self) -> RejectionKind {
        match self {
            Rejection::OutsideWorkspace { .. } => RejectionKind::OutsideWorkspace,
            Rejection::AlreadyExists { .. } => RejectionKind::AlreadyExists,
            Rejection::NotFound { .. } => RejectionKind::NotFound,
            Rejection::NotAFile { .. } => RejectionKind::NotAFile,
            Rejection::Io { .. } => RejectionKind::Io,
        }
    }

    /// The path the rejection is about.
    pub fn path(&self) -> &std::path::Path {
        match self {
            Rejection::OutsideWorkspace { attempted, .. } => attempted,
            Rejection::AlreadyExists { path }
            | Rejection::NotFound { path }
            | Rejection::NotAFile { path }
            | Rejection::Io { path, .. } => path,
        }
    }

    pub(crate) fn io(operation: Operation, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Rejection::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
