//! Error types for server configuration and lifecycle.

use std::io;
use std::path::PathBuf;

use crate::server::ServerState;

/// Error raised while building, starting or stopping a server.
///
/// Handler failures never surface here; they become `500` responses.
#[derive(Debug, thiserror::Error)]
pub enum RingwayError {
    /// Invalid option value, missing TLS material or unusable PEM data.
    #[error("configuration error: {0}")]
    Config(String),

    /// A keystore or truststore file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// rustls rejected the configured key material.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// A connector could not bind its listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// `host:port` the connector tried to bind.
        addr: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The worker pool runtime could not be built.
    #[error("failed to build thread pool: {0}")]
    Pool(#[source] io::Error),

    /// A lifecycle operation was invoked in the wrong state.
    #[error("invalid server state: expected {expected}, found {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: ServerState,
        /// State the server was in.
        actual: ServerState,
    },

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for Ringway operations.
pub type RingwayResult<T> = Result<T, RingwayError>;
