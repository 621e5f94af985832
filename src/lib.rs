//! # presence-ipc
//!
//! Client-side transport for the local rich-presence IPC protocol.
//!
//! An application talks to a desktop process over a platform-specific local
//! socket (a Unix domain socket, or a named pipe on Windows) using
//! length-prefixed JSON frames.
//!
//! ## Architecture
//!
//! - **Frame Codec** ([`protocol`]): 8-byte little-endian header + JSON payload
//! - **Socket Locator** ([`transport`]): platform-filtered candidate discovery
//! - **Transport State Machine** ([`IpcClient`]): handshake, read loop, send, close
//! - **Event Channel** ([`events`]): typed notifications for higher layers
//!
//! ## Example
//!
//! ```ignore
//! use presence_ipc::PresenceClient;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> presence_ipc::Result<()> {
//!     let client = PresenceClient::new("123456789012345678");
//!     client.connect().await?;
//!     client.set_activity(json!({ "state": "In a match" })).await?;
//!     client.close().await
//! }
//! ```

pub mod error;
pub mod events;
pub mod protocol;
pub mod rpc;
pub mod transport;

mod client;
mod writer;

pub use client::{
    ClientBuilder, ConnectionState, IpcClient, TransportConfig, DEFAULT_CLOSE_TIMEOUT,
    DEFAULT_HANDSHAKE_TIMEOUT,
};
pub use error::{IpcError, Result};
pub use events::{CloseReason, EventKind, TransportEvent};
pub use protocol::{Frame, Opcode};
pub use rpc::{Inbound, PresenceClient, RpcCommand};
