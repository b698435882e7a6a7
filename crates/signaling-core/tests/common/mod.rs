//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use rtsignal_signaling_core::{
    MemorySignaling, RetryConfig, SdpMessage, SessionBinding, SignalingEvent, SignalingHandler,
    SignalingManager, SignalingSession, SignalingSettings, TransportRegistry, MEMORY_TRANSPORT,
};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Handler that forwards every event it receives to a channel
pub struct Recorder {
    pub label: &'static str,
    pub binding: SessionBinding,
    events: mpsc::UnboundedSender<SignalingEvent>,
    binds: Mutex<Vec<bool>>,
    gate: Option<Arc<Gate>>,
}

impl Recorder {
    pub fn new(label: &'static str) -> (Arc<Self>, mpsc::UnboundedReceiver<SignalingEvent>) {
        Self::build(label, None)
    }

    /// Recorder whose first delivery parks on `gate` until released
    pub fn gated(
        label: &'static str,
        gate: Arc<Gate>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SignalingEvent>) {
        Self::build(label, Some(gate))
    }

    fn build(
        label: &'static str,
        gate: Option<Arc<Gate>>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SignalingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Self {
            label,
            binding: SessionBinding::new(),
            events: tx,
            binds: Mutex::new(Vec::new()),
            gate,
        });
        (recorder, rx)
    }

    pub fn handle(self: &Arc<Self>) -> Arc<dyn SignalingHandler> {
        self.clone()
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_bound()
    }

    /// `true` for every bind, `false` for every unbind, in call order
    pub fn bind_history(&self) -> Vec<bool> {
        self.binds.lock().clone()
    }
}

#[async_trait]
impl SignalingHandler for Recorder {
    fn bind(&self, session: Option<Arc<SignalingSession>>) {
        self.binds.lock().push(session.is_some());
        self.binding.set(session);
    }

    fn name(&self) -> &str {
        self.label
    }

    async fn on_signaling_event(&self, event: SignalingEvent) -> anyhow::Result<()> {
        let _ = self.events.send(event);
        if let Some(gate) = &self.gate {
            gate.park().await;
        }
        Ok(())
    }
}

/// One-shot rendezvous between a parked handler and the test body
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    released: Notify,
    used: Mutex<bool>,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn park(&self) {
        {
            let mut used = self.used.lock();
            if *used {
                return;
            }
            *used = true;
        }
        self.entered.notify_one();
        self.released.notified().await;
    }

    pub async fn wait_entered(&self) {
        timeout(EVENT_TIMEOUT, self.entered.notified())
            .await
            .expect("handler never reached the gate");
    }

    pub fn release(&self) {
        self.released.notify_one();
    }
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<SignalingEvent>) -> SignalingEvent {
    timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a signaling event")
        .expect("event channel closed")
}

/// Receive events until one of `kind` arrives, returning everything seen
pub async fn events_until(
    rx: &mut mpsc::UnboundedReceiver<SignalingEvent>,
    kind: &str,
) -> Vec<SignalingEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = event.kind() == kind;
        seen.push(event);
        if done {
            return seen;
        }
    }
}

pub fn assert_no_more_events(rx: &mut mpsc::UnboundedReceiver<SignalingEvent>) {
    if let Ok(event) = rx.try_recv() {
        panic!("unexpected event delivered: {:?}", event);
    }
}

pub fn peer_joined(connection_id: &str) -> SignalingEvent {
    SignalingEvent::PeerJoined {
        connection_id: connection_id.to_string(),
        polite: true,
    }
}

pub fn offer(connection_id: &str) -> SignalingEvent {
    SignalingEvent::Offer(SdpMessage {
        connection_id: connection_id.to_string(),
        sdp: format!("v=0 offer-{}", connection_id),
        polite: true,
    })
}

/// Manager resolving kind `"memory"`, with defaults at `ws://defaults`
pub fn memory_manager() -> Arc<SignalingManager> {
    SignalingManager::builder()
        .transport_registry(TransportRegistry::new().with_memory_transport())
        .default_settings(SignalingSettings::new(MEMORY_TRANSPORT, "ws://defaults"))
        .connect_retry(RetryConfig::none())
        .build()
}

pub fn transport() -> Arc<MemorySignaling> {
    Arc::new(MemorySignaling::new("ws://memory"))
}
