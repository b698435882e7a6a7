//! Signaling transport capability and the transport factory
//!
//! The orchestrator never speaks a wire protocol itself. It consumes a
//! [`Signaling`] implementation, either supplied by the caller or built
//! from settings through a [`TransportRegistry`] that maps a transport
//! kind key (e.g. `"websocket"`, `"http"`) to a constructor.

pub mod memory;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::config::SignalingSettings;
use crate::error::{SignalingError, SignalingResult};
use crate::events::{CandidateMessage, SdpMessage, SignalingEvent};

pub use memory::{MemorySignaling, OutboundMessage, MEMORY_TRANSPORT};

/// Channel a transport pushes inbound events into
pub type EventSender = mpsc::UnboundedSender<SignalingEvent>;

/// Signaling transport (WebSocket, HTTP polling, ...)
#[async_trait]
pub trait Signaling: Send + Sync {
    /// Server URL, for logging
    fn url(&self) -> String;

    /// Connect and begin pushing inbound events into `events`
    async fn start(&self, events: EventSender) -> SignalingResult<()>;

    /// Close the connection; no events may be pushed afterwards
    async fn stop(&self) -> SignalingResult<()>;

    async fn open_connection(&self, connection_id: &str) -> SignalingResult<()>;

    async fn close_connection(&self, connection_id: &str) -> SignalingResult<()>;

    async fn send_offer(&self, offer: &SdpMessage) -> SignalingResult<()>;

    async fn send_answer(&self, answer: &SdpMessage) -> SignalingResult<()>;

    async fn send_candidate(&self, candidate: &CandidateMessage) -> SignalingResult<()>;
}

/// Builds a transport from settings and the runtime it should run on
pub type TransportConstructor =
    Arc<dyn Fn(&SignalingSettings, Handle) -> SignalingResult<Arc<dyn Signaling>> + Send + Sync>;

/// Lookup table from transport kind to constructor
#[derive(Clone, Default)]
pub struct TransportRegistry {
    constructors: HashMap<String, TransportConstructor>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `constructor` under `kind`, replacing any previous entry
    pub fn register<F>(mut self, kind: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&SignalingSettings, Handle) -> SignalingResult<Arc<dyn Signaling>> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
        self
    }

    /// Register the in-process [`MemorySignaling`] transport under `"memory"`
    pub fn with_memory_transport(self) -> Self {
        self.register(MEMORY_TRANSPORT, |settings, _context| {
            Ok(Arc::new(MemorySignaling::new(settings.url.clone())) as Arc<dyn Signaling>)
        })
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Fails with `InvalidArgument` for an unregistered kind
    pub fn resolve(&self, kind: &str) -> SignalingResult<TransportConstructor> {
        self.constructors.get(kind).cloned().ok_or_else(|| {
            SignalingError::invalid_argument(format!("Unknown signaling transport type: {}", kind))
        })
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.constructors.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
