//! Loopback Signaling Example
//!
//! Runs a signaling manager over the in-process memory transport, plays a
//! remote peer by injecting events, and shows a handler negotiating through
//! the session it is bound to. A second handler joins mid-session.
//!
//! Run with: cargo run --example loopback
//! Set RUST_LOG=debug for the orchestrator's own logging.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rtsignal_signaling_core::prelude::*;
use rtsignal_signaling_core::{MemorySignaling, OutboundMessage};
use tracing_subscriber::EnvFilter;

/// Offers to every peer that joins and logs the answers it gets back
struct Caller {
    binding: SessionBinding,
}

#[async_trait]
impl SignalingHandler for Caller {
    fn bind(&self, session: Option<Arc<SignalingSession>>) {
        self.binding.set(session);
    }

    fn name(&self) -> &str {
        "caller"
    }

    async fn on_started(&self) -> anyhow::Result<()> {
        println!("📡 [caller] signaling started");
        Ok(())
    }

    async fn on_peer_joined(&self, connection_id: String, polite: bool) -> anyhow::Result<()> {
        println!("👋 [caller] peer {connection_id} joined (polite: {polite}), sending offer");
        self.binding.open_connection(&connection_id).await?;
        self.binding.send_offer(&connection_id, "v=0 caller-offer").await?;
        Ok(())
    }

    async fn on_answer(&self, answer: SdpMessage) -> anyhow::Result<()> {
        println!("✅ [caller] answer for {}: {}", answer.connection_id, answer.sdp);
        Ok(())
    }
}

/// Only watches events
struct Observer;

#[async_trait]
impl SignalingHandler for Observer {
    fn bind(&self, session: Option<Arc<SignalingSession>>) {
        println!("🔗 [observer] bound: {}", session.is_some());
    }

    async fn on_signaling_event(&self, event: SignalingEvent) -> anyhow::Result<()> {
        println!("👀 [observer] {}", event.kind());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("🔁 Loopback Signaling Example");
    println!("=============================\n");

    // One shared transport instance, so this demo can play the remote side
    let wire = Arc::new(MemorySignaling::new("ws://127.0.0.1:8080/loopback"));
    let registry = {
        let wire = wire.clone();
        TransportRegistry::new().register("loopback", move |_settings, _runtime| {
            Ok(wire.clone() as Arc<dyn rtsignal_signaling_core::Signaling>)
        })
    };

    let manager = SignalingManager::builder()
        .transport_registry(registry)
        .default_settings(
            SignalingSettings::new("loopback", "ws://127.0.0.1:8080/loopback").with_resend_interval(1.0),
        )
        .handler(Arc::new(Caller {
            binding: SessionBinding::new(),
        }))
        .build();

    manager.run(None, None).await?;
    println!("▶️  running: {}\n", manager.is_running());

    wire.emit(SignalingEvent::PeerJoined {
        connection_id: "peer-1".to_string(),
        polite: true,
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let observer: Arc<dyn SignalingHandler> = Arc::new(Observer);
    manager.add_handler(observer.clone()).await?;

    // Let one resend go out before answering
    tokio::time::sleep(Duration::from_millis(1500)).await;
    wire.emit(SignalingEvent::Answer(SdpMessage {
        connection_id: "peer-1".to_string(),
        sdp: "v=0 remote-answer".to_string(),
        polite: true,
    }));
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.remove_handler(&observer).await;
    wire.emit(SignalingEvent::PeerLeft {
        connection_id: "peer-1".to_string(),
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.stop().await;
    println!("\n⏹️  running: {}", manager.is_running());

    println!("\n📤 Outbound traffic:");
    for message in wire.sent() {
        match message {
            OutboundMessage::Offer(offer) => println!("   offer  → {}", offer.connection_id),
            OutboundMessage::Answer(answer) => println!("   answer → {}", answer.connection_id),
            other => println!("   {other:?}"),
        }
    }

    Ok(())
}
