//! Typed transport notifications and the listener registry.
//!
//! Every notification the transport produces is a [`TransportEvent`].
//! Listeners subscribe per [`EventKind`] and are invoked synchronously, in
//! registration order, on the task that produced the event.
//!
//! # Example
//!
//! ```
//! use presence_ipc::events::{EventBus, EventKind, TransportEvent};
//!
//! let bus = EventBus::new();
//! bus.subscribe(EventKind::Ping, |_event| println!("peer pinged us"));
//! bus.publish(&TransportEvent::Ping);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use serde_json::Value;

/// Reason attached to a close notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CloseReason {
    /// Close code sent by the peer, if any.
    #[serde(default)]
    pub code: Option<i64>,
    /// Human-readable reason.
    #[serde(default)]
    pub message: String,
}

impl CloseReason {
    /// Reason used when the client closes the connection itself.
    pub const LOCAL_MESSAGE: &'static str = "connection closed by client";

    /// Reason used when the stream ends without a CLOSE frame.
    pub const PEER_MESSAGE: &'static str = "connection closed by peer";

    /// Create a reason with no code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Fixed reason for a local `close()`.
    pub fn local() -> Self {
        Self::new(Self::LOCAL_MESSAGE)
    }

    /// Parse the payload of a CLOSE frame.
    ///
    /// Payloads that are absent or not shaped like `{ code, message }` still
    /// produce a reason, carrying the raw JSON text as the message.
    pub fn from_payload(payload: Option<&Value>) -> Self {
        match payload {
            None => Self::new(Self::PEER_MESSAGE),
            Some(value) => serde_json::from_value(value.clone())
                .unwrap_or_else(|_| Self::new(value.to_string())),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

/// A notification published by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A connection was established (published before the handshake is sent).
    Open,
    /// An application message arrived.
    Message(Value),
    /// The connection ended.
    Close(CloseReason),
    /// The peer pinged us; a PONG has already been queued.
    Ping,
    /// Diagnostic text, e.g. a malformed frame report.
    Debug(String),
}

impl TransportEvent {
    /// Topic this event is delivered on.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Message(_) => EventKind::Message,
            Self::Close(_) => EventKind::Close,
            Self::Ping => EventKind::Ping,
            Self::Debug(_) => EventKind::Debug,
        }
    }
}

/// Subscription topics, one per [`TransportEvent`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`TransportEvent::Open`]
    Open,
    /// [`TransportEvent::Message`]
    Message,
    /// [`TransportEvent::Close`]
    Close,
    /// [`TransportEvent::Ping`]
    Ping,
    /// [`TransportEvent::Debug`]
    Debug,
}

impl EventKind {
    /// Topic name as used on the collaborator boundary.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Message => "message",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Debug => "debug",
        }
    }
}

/// Shared listener callback.
pub type Listener = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Registry of listeners keyed by topic.
///
/// There is no unsubscribe and no replay: a listener only sees events
/// published after it subscribed.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<Listener>>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one topic.
    ///
    /// Multiple listeners per topic are allowed; they run in registration
    /// order.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.entry(kind).or_default().push(Arc::new(listener));
    }

    /// Deliver an event to every listener of its topic.
    ///
    /// Listeners run after the registry lock is released, so a listener may
    /// itself subscribe.
    pub fn publish(&self, event: &TransportEvent) {
        let targets: Vec<Listener> = {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            listeners.get(&event.kind()).cloned().unwrap_or_default()
        };

        for listener in targets {
            listener(event);
        }
    }

    /// Number of listeners registered for a topic.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}
