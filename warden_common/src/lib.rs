//! Types shared by the warden workspace crates.

pub mod lifecycle;

pub use lifecycle::{LifecycleError, SessionLifecycle, SessionPhase, TerminationReason};
