//! In-process signaling transport
//!
//! Loops nothing over the network: outbound messages are recorded, inbound
//! events are injected with [`MemorySignaling::emit`]. Used by the test
//! suite and the loopback demo, and handy for exercising handlers without a
//! signaling server.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{EventSender, Signaling};
use crate::error::{SignalingError, SignalingResult};
use crate::events::{CandidateMessage, SdpMessage, SignalingEvent};

/// Registry key for [`MemorySignaling`]
pub const MEMORY_TRANSPORT: &str = "memory";

/// A message a session sent through the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    OpenConnection(String),
    CloseConnection(String),
    Offer(SdpMessage),
    Answer(SdpMessage),
    Candidate(CandidateMessage),
}

pub struct MemorySignaling {
    url: String,
    events: Mutex<Option<EventSender>>,
    sent: Mutex<Vec<OutboundMessage>>,
    start_attempts: AtomicU32,
    failing_starts: AtomicU32,
    fail_stop: AtomicBool,
    stopped: AtomicBool,
}

impl MemorySignaling {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            events: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            start_attempts: AtomicU32::new(0),
            failing_starts: AtomicU32::new(0),
            fail_stop: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Make the next `count` calls to `start` fail with a transport error
    pub fn fail_next_starts(&self, count: u32) {
        self.failing_starts.store(count, Ordering::SeqCst);
    }

    /// Make `stop` report a transport error (it still disconnects)
    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Inject an inbound event; `false` if not connected
    pub fn emit(&self, event: SignalingEvent) -> bool {
        match self.events.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.events.lock().is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn start_attempts(&self) -> u32 {
        self.start_attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    /// Number of offers sent for `connection_id`, resends included
    pub fn offers_sent(&self, connection_id: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|msg| matches!(msg, OutboundMessage::Offer(offer) if offer.connection_id == connection_id))
            .count()
    }

    fn record(&self, message: OutboundMessage) -> SignalingResult<()> {
        if !self.is_connected() {
            return Err(SignalingError::transport(format!("Not connected to {}", self.url)));
        }
        self.sent.lock().push(message);
        Ok(())
    }
}

#[async_trait]
impl Signaling for MemorySignaling {
    fn url(&self) -> String {
        self.url.clone()
    }

    async fn start(&self, events: EventSender) -> SignalingResult<()> {
        self.start_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_starts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_starts.store(remaining - 1, Ordering::SeqCst);
            return Err(SignalingError::transport(format!("Connection to {} refused", self.url)));
        }

        debug!(url = %self.url, "Memory transport started");
        let _ = events.send(SignalingEvent::Started);
        *self.events.lock() = Some(events);
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> SignalingResult<()> {
        self.events.lock().take();
        self.stopped.store(true, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(SignalingError::transport(format!("Failed to close {}", self.url)));
        }
        Ok(())
    }

    async fn open_connection(&self, connection_id: &str) -> SignalingResult<()> {
        self.record(OutboundMessage::OpenConnection(connection_id.to_string()))
    }

    async fn close_connection(&self, connection_id: &str) -> SignalingResult<()> {
        self.record(OutboundMessage::CloseConnection(connection_id.to_string()))
    }

    async fn send_offer(&self, offer: &SdpMessage) -> SignalingResult<()> {
        self.record(OutboundMessage::Offer(offer.clone()))
    }

    async fn send_answer(&self, answer: &SdpMessage) -> SignalingResult<()> {
        self.record(OutboundMessage::Answer(answer.clone()))
    }

    async fn send_candidate(&self, candidate: &CandidateMessage) -> SignalingResult<()> {
        self.record(OutboundMessage::Candidate(candidate.clone()))
    }
}
