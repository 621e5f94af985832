//! Error types for presence-ipc.

use thiserror::Error;

use crate::events::CloseReason;

/// Main error type for all transport operations.
#[derive(Debug, Error)]
pub enum IpcError {
    /// I/O error during pipe/socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No candidate socket accepted a connection.
    #[error("Could not connect: no IPC socket found ({attempted} candidates tried)")]
    ConnectionNotFound {
        /// Number of candidates that were actually dialed.
        attempted: usize,
    },

    /// Frame violates the wire format (header, length, opcode or payload).
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// A write was attempted while no connection is open.
    #[error("Not connected")]
    NotConnected,

    /// Connection closed while an operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connection ended with the given reason before an awaited reply.
    #[error("Connection closed: {0}")]
    Closed(CloseReason),

    /// A bounded wait elapsed.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The peer answered a command with an error event.
    #[error("RPC error: {0}")]
    Rpc(String),
}

/// Result type alias using IpcError.
pub type Result<T> = std::result::Result<T, IpcError>;
