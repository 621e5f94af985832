//! Command/dispatch payloads and the presence client.
//!
//! Outbound application messages are `{ cmd, args?, nonce }`; inbound ones
//! carry `{ cmd, evt, data }` and are classified into [`Inbound`] values.
//! [`PresenceClient`] layers this over [`IpcClient`] and waits for the
//! peer's READY dispatch before reporting a connection as usable.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::client::{ClientBuilder, IpcClient};
use crate::error::{IpcError, Result};
use crate::events::{CloseReason, EventKind, TransportEvent};
use crate::transport::{Dialer, PipeDialer};

/// Outbound command payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcCommand {
    /// Command name, e.g. `SET_ACTIVITY`.
    pub cmd: String,
    /// Command arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    /// Unique request identifier.
    pub nonce: String,
}

impl RpcCommand {
    /// Create a command with a fresh nonce.
    pub fn new(cmd: impl Into<String>, args: Option<Value>) -> Self {
        Self {
            cmd: cmd.into(),
            args,
            nonce: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// `SET_ACTIVITY` for process `pid`.
    pub fn set_activity(pid: u32, activity: Value) -> Self {
        Self::new("SET_ACTIVITY", Some(json!({ "pid": pid, "activity": activity })))
    }

    /// `SET_ACTIVITY` with no activity, clearing the presence of `pid`.
    pub fn clear_activity(pid: u32) -> Self {
        Self::new("SET_ACTIVITY", Some(json!({ "pid": pid })))
    }
}

/// Inbound message payload as sent by the peer.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct RpcMessage {
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub evt: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `DISPATCH` / `READY`: the peer accepted the handshake.
    Ready(Option<Value>),
    /// The peer rejected a command.
    Error {
        nonce: Option<String>,
        data: Option<Value>,
    },
    /// Any other named event.
    Event { name: String, data: Option<Value> },
    /// A reply to a command (no event name).
    Response {
        cmd: Option<String>,
        nonce: Option<String>,
        data: Option<Value>,
    },
}

impl RpcMessage {
    /// Parse a MESSAGE payload.
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Classify this message.
    pub fn classify(self) -> Inbound {
        match self.evt {
            Some(evt) if evt == "READY" && self.cmd.as_deref() == Some("DISPATCH") => {
                Inbound::Ready(self.data)
            }
            Some(evt) if evt == "ERROR" => Inbound::Error {
                nonce: self.nonce,
                data: self.data,
            },
            Some(name) => Inbound::Event {
                name,
                data: self.data,
            },
            None => Inbound::Response {
                cmd: self.cmd,
                nonce: self.nonce,
                data: self.data,
            },
        }
    }
}

impl Inbound {
    /// Error text for an [`Inbound::Error`].
    pub fn error_message(&self) -> Option<String> {
        match self {
            Inbound::Error { data, .. } => Some(
                data.as_ref()
                    .and_then(|d| d.get("message"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| "unknown error".to_string()),
            ),
            _ => None,
        }
    }

    /// Turn an [`Inbound::Error`] into [`IpcError::Rpc`].
    pub fn into_result(self) -> Result<Self> {
        match self.error_message() {
            Some(message) => Err(IpcError::Rpc(message)),
            None => Ok(self),
        }
    }
}

/// Progress of the current connection towards READY.
#[derive(Debug, Clone, PartialEq)]
enum Readiness {
    /// Connected (or connecting), READY not seen yet.
    Pending,
    /// The peer sent READY.
    Ready,
    /// The connection ended.
    Closed(CloseReason),
}

/// Presence client: transport plus READY tracking and command helpers.
pub struct PresenceClient<D = PipeDialer> {
    transport: IpcClient<D>,
    ready: Arc<watch::Sender<Readiness>>,
    pid: u32,
}

impl PresenceClient<PipeDialer> {
    /// Client for `client_id` using the real socket dialer.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::from_builder(IpcClient::builder(client_id))
    }
}

impl<D: Dialer> PresenceClient<D> {
    /// Build from a configured transport builder.
    pub fn from_builder(builder: ClientBuilder<D>) -> Self {
        let transport = builder.build();
        let (ready, _) = watch::channel(Readiness::Closed(CloseReason::local()));
        let ready = Arc::new(ready);

        let on_open = ready.clone();
        transport.on(EventKind::Open, move |_| {
            on_open.send_replace(Readiness::Pending);
        });

        let on_close = ready.clone();
        transport.on(EventKind::Close, move |event| {
            if let TransportEvent::Close(reason) = event {
                on_close.send_replace(Readiness::Closed(reason.clone()));
            }
        });

        let on_message = ready.clone();
        transport.on(EventKind::Message, move |event| {
            if let TransportEvent::Message(payload) = event {
                if let Ok(message) = RpcMessage::from_value(payload.clone()) {
                    if let Inbound::Ready(_) = message.classify() {
                        tracing::debug!("Peer is ready");
                        on_message.send_replace(Readiness::Ready);
                    }
                }
            }
        });

        Self {
            transport,
            ready,
            pid: std::process::id(),
        }
    }

    /// Override the pid reported with activity updates.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Underlying transport.
    pub fn transport(&self) -> &IpcClient<D> {
        &self.transport
    }

    /// Whether the peer has sent READY on the current connection.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow() == Readiness::Ready
    }

    /// Register a listener for classified inbound messages.
    ///
    /// Messages that are not shaped like `{ cmd, evt, data }` are skipped.
    pub fn on_inbound<F>(&self, listener: F)
    where
        F: Fn(Inbound) + Send + Sync + 'static,
    {
        self.transport.on(EventKind::Message, move |event| {
            if let TransportEvent::Message(payload) = event {
                match RpcMessage::from_value(payload.clone()) {
                    Ok(message) => listener(message.classify()),
                    Err(e) => tracing::debug!("Ignoring non-RPC message: {}", e),
                }
            }
        });
    }

    /// Connect and wait for the peer's READY dispatch.
    ///
    /// # Errors
    ///
    /// - Transport errors from [`IpcClient::connect`]
    /// - [`IpcError::Closed`] if the connection ends before READY, e.g. the
    ///   peer rejects the client id with a CLOSE frame
    /// - [`IpcError::Timeout`] if READY does not arrive within the handshake
    ///   timeout; the connection is closed in that case
    pub async fn connect(&self) -> Result<()> {
        let mut ready = self.ready.subscribe();
        self.transport.connect().await?;

        let timeout = self.transport.config().handshake_timeout;
        let waited = tokio::time::timeout(
            timeout,
            ready.wait_for(|state| *state != Readiness::Pending),
        )
        .await
        .map(|received| received.map(|state| (*state).clone()));

        match waited {
            Ok(Ok(Readiness::Ready)) => Ok(()),
            Ok(Ok(Readiness::Closed(reason))) => {
                tracing::warn!("Connection closed before READY: {}", reason);
                Err(IpcError::Closed(reason))
            }
            Ok(Ok(Readiness::Pending)) | Ok(Err(_)) => Err(IpcError::ConnectionClosed),
            Err(_) => {
                tracing::warn!("No READY from peer within {:?}", timeout);
                self.transport.close().await?;
                Err(IpcError::Timeout("handshake"))
            }
        }
    }

    /// Send a command.
    pub async fn request(&self, cmd: impl Into<String>, args: Option<Value>) -> Result<RpcCommand> {
        let command = RpcCommand::new(cmd, args);
        self.transport.send_message(&command).await?;
        Ok(command)
    }

    /// Publish an activity for this process.
    pub async fn set_activity(&self, activity: Value) -> Result<RpcCommand> {
        let command = RpcCommand::set_activity(self.pid, activity);
        self.transport.send_message(&command).await?;
        Ok(command)
    }

    /// Clear this process's activity.
    pub async fn clear_activity(&self) -> Result<RpcCommand> {
        let command = RpcCommand::clear_activity(self.pid);
        self.transport.send_message(&command).await?;
        Ok(command)
    }

    /// Close the transport.
    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }
}
