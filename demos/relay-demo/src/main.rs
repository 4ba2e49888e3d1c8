//! Demo wiring all three pieces together in one process.
//!
//! Run with: cargo run -p relay-demo
//!
//! A relay plays the extension background, an echoing page server plays a
//! provider hosted in tab 1, and a reconnecting transport plays the client
//! in the extension UI. The demo sends a request, streams a few
//! server-initiated events, then tears the relay down to show the
//! transport's retry-and-close sequence.

use anyhow::{Context, Result};
use mcp_bridge_core::PortSender;
use mcp_bridge_relay::Relay;
use mcp_bridge_transport::{ExtensionClientTransport, PageServer, TransportOptions};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let relay = Relay::spawn();

    let content = relay
        .connect_content(PortSender::from_tab(1))
        .context("content port was rejected")?;
    let server = PageServer::new().with_echo();
    let store = server.store();
    server.spawn(content);

    let ui = relay.connect_ui();
    let (transport, mut events) = ExtensionClientTransport::new(ui, TransportOptions::default());
    tracing::info!(client = %transport.client_id(), "transport created");

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(?event, "transport event");
        }
    });

    transport.start().await.context("handshake failed")?;
    let session = transport.session();
    tracing::info!(?session, "connected");

    transport
        .send(json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }))
        .await
        .context("send failed")?;

    for n in 1..=3 {
        store.append(json!({
            "jsonrpc": "2.0",
            "method": "notifications/progress",
            "params": { "progress": n, "total": 3 },
        }));
    }
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    tracing::info!("shutting the relay down; watch the transport retry and close");
    relay.shutdown();

    printer.await.context("event printer failed")?;
    Ok(())
}
