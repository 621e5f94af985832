//! Presence demo.
//!
//! Connects to the running desktop client, publishes an activity, prints
//! inbound events for a while, then clears the activity and disconnects.
//!
//! Run with:
//! ```bash
//! RUST_LOG=presence_ipc=debug cargo run --example presence -- <client_id>
//! ```

use std::time::Duration;

use presence_ipc::{EventKind, Inbound, PresenceClient, TransportEvent};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let client_id = std::env::args()
        .nth(1)
        .ok_or("usage: presence <client_id>")?;

    let client = PresenceClient::new(client_id);

    client.transport().on(EventKind::Close, |event| {
        if let TransportEvent::Close(reason) = event {
            tracing::info!("Disconnected: {}", reason);
        }
    });
    client.on_inbound(|inbound| match inbound {
        Inbound::Ready(data) => tracing::info!("Ready: {:?}", data),
        other => match other.into_result() {
            Ok(message) => tracing::info!("Inbound: {:?}", message),
            Err(e) => tracing::warn!("{}", e),
        },
    });

    client.connect().await?;

    client
        .set_activity(json!({
            "state": "Trying out presence-ipc",
            "details": "Demo",
            "timestamps": { "start": 0 }
        }))
        .await?;

    tokio::time::sleep(Duration::from_secs(15)).await;

    client.clear_activity().await?;
    client.close().await?;
    Ok(())
}
