//! Error types for the shell bridge

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn shell '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Shell stream error: {0}")]
    StreamIo(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unknown text encoding label '{0}'")]
    UnknownEncoding(String),

    #[error("HTTP server error: {0}")]
    HttpServer(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
