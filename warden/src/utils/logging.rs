//! # Logging Initialization
//!
//! `init_logging()` installs the process-wide `tracing` subscriber exactly once
//! (guarded by `std::sync::Once`), however many times it is called.
//!
//! ## Logging Configuration
//!
//! 1.  **Environment Filter (`EnvFilter`)**: `RUST_LOG` wins when set. Otherwise
//!     the given level applies to everything, with `debug` for the `warden`
//!     and `warden_bridge` crates.
//!
//! 2.  **File Logging**: with `log_to_file = true`, logs go to a daily rolling
//!     file in the user cache directory (`directories`), written through a
//!     non-blocking `tracing_appender` writer without ANSI colors.
//!
//! 3.  **Stderr Logging**: with `log_to_file = false`, or when the cache
//!     directory cannot be determined or written, logs go to stderr with
//!     colors. Stdout stays reserved for command results.

use anyhow::Result;
use directories::ProjectDirs;
use std::{io::stderr, path::Path, sync::Once};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

const LOG_FILE_PREFIX: &str = "warden.log";

/// Initialize verbose logging for tests (stderr, `trace`).
pub fn init_test_logging() {
    let _ = init_logging("trace", false);
}

/// The filter used when `RUST_LOG` is not set.
pub fn default_filter(log_level: &str) -> String {
    format!("{log_level},warden=debug,warden_bridge=debug")
}

/// Initializes the logging system.
///
/// # Errors
///
/// Currently infallible; the `Result` leaves room for subscriber setups that
/// can fail.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

        if log_to_file && let Some(proj_dirs) = ProjectDirs::from("dev", "Warden", "warden") {
            let log_dir = proj_dirs.cache_dir();

            // tracing_appender::rolling::daily panics on permission errors.
            let file_appender_result = if can_write(log_dir) {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX)
                }))
            } else {
                Err(Box::new("Cannot write to log directory") as Box<dyn std::any::Any + Send>)
            };

            if let Ok(file_appender) = file_appender_result {
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(non_blocking).with_ansi(false))
                    .init();
                // Leaked so buffered lines are flushed at exit.
                Box::leak(Box::new(guard));
                return;
            }
        }

        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer().with_writer(stderr).with_ansi(true))
            .init();
    });

    Ok(())
}

/// Create `dir` if needed and check a file can be written into it.
fn can_write(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }

    let marker = dir.join(".warden_log_check");
    match std::fs::write(&marker, "check") {
        Ok(()) => {
            let _ = std::fs::remove_file(&marker);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_filter_targets_workspace_crates() {
        let filter = default_filter("info");
        assert_eq!(filter, "info,warden=debug,warden_bridge=debug");
        assert!(EnvFilter::try_new(filter).is_ok());
    }

    #[test]
    fn test_can_write_creates_directory() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("logs/nested");
        assert!(can_write(&dir));
        assert!(dir.is_dir());
        assert!(!dir.join(".warden_log_check").exists());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_test_logging();
        assert!(init_logging("debug", false).is_ok());
    }
}
