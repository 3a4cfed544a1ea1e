//! # Warden
//!
//! A sandboxed workspace gateway: every file an untrusted caller reads,
//! writes, lists or deletes resolves inside one workspace root, or the
//! operation is rejected before any I/O happens.
//!
//! ## Components
//!
//! *   **`boundary`**: the Boundary Enforcer. Strips root markers from
//!     untrusted fragments, canonicalizes, and checks containment.
//! *   **`tools`**: the textual contract agents consume (`write`, `read`,
//!     `list`, `delete`, `salvage`), reporting through an injected
//!     [`ActivitySink`].
//! *   **`args`**: explicit normalization of loosely typed tool arguments.
//! *   **`config`**, **`cli`**: layered configuration and the `warden` binary,
//!     which also hosts the shell bridge from `warden_bridge`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use warden::{BoundaryEnforcer, WorkspaceTools, WriteRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let tools = WorkspaceTools::with_tracing(BoundaryEnforcer::new("/srv/ws")?);
//!     println!("{}", tools.write(&WriteRequest::new("a.txt", "hi")).await);
//!     Ok(())
//! }
//! ```

pub mod activity;
pub mod args;
pub mod boundary;
pub mod cli;
pub mod config;
pub mod error;
pub mod salvage;
pub mod tools;
pub mod utils;

pub use activity::{
    ActivityEvent, ActivityRecord, ActivitySink, ChannelSink, NullSink, TracingSink,
};
pub use args::{OverwriteFlag, ReadRequest, WriteRequest, is_truthy};
pub use boundary::{BoundaryEnforcer, ValidatedPath};
pub use config::{ConfigOverrides, WardenConfig};
pub use error::{Operation, Rejection, RejectionKind};
pub use salvage::{CodeBlock, extract_code_blocks};
pub use tools::WorkspaceTools;
