//! Transport module - socket discovery and platform-specific streams.
//!
//! Provides abstraction over:
//! - Unix Domain Sockets (Linux/macOS)
//! - Named Pipes (Windows)

mod locator;
mod pipe;

pub use locator::{
    candidates, BoxFuture, Dialer, LocatorConfig, Platform, SocketCandidate, SocketLocator,
    SocketRule, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_RUNTIME_DIR, DEFAULT_SOCKET_NAME,
    MAX_SOCKET_INDEX, RUNTIME_DIR_VARS, SOCKET_RULES,
};
pub use pipe::{PipeDialer, PipeStream};
