//! Signaling events and the handler contract
//!
//! Every inbound message from the signaling transport becomes a
//! [`SignalingEvent`]. The session publishes each event once; the event
//! provider replicates it to every subscribed [`SignalingHandler`].
//!
//! # Event Types
//!
//! - **Started** - The transport is connected and accepting messages
//! - **PeerJoined / PeerLeft** - A remote peer connection was created or deleted
//! - **Offer / Answer** - SDP negotiation messages
//! - **Candidate** - Trickled ICE candidates
//! - **Error** - Transport-reported errors and lost connections
//!
//! # Usage Examples
//!
//! ## Basic Handler
//!
//! ```rust
//! use rtsignal_signaling_core::events::{SdpMessage, SessionBinding, SignalingHandler};
//! use rtsignal_signaling_core::session::SignalingSession;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Broadcaster {
//!     binding: SessionBinding,
//! }
//!
//! #[async_trait]
//! impl SignalingHandler for Broadcaster {
//!     fn bind(&self, session: Option<Arc<SignalingSession>>) {
//!         self.binding.set(session);
//!     }
//!
//!     async fn on_offer(&self, offer: SdpMessage) -> anyhow::Result<()> {
//!         // Negotiate with the local peer connection, then answer
//!         self.binding.send_answer(&offer.connection_id, "v=0 ...").await?;
//!         Ok(())
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{SignalingError, SignalingResult};
use crate::session::SignalingSession;

/// An SDP offer or answer for one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpMessage {
    pub connection_id: String,
    pub sdp: String,
    /// Whether the receiving side should yield on glare
    pub polite: bool,
}

/// A trickled ICE candidate for one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateMessage {
    pub connection_id: String,
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// Inbound signaling event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalingEvent {
    /// Transport connected
    Started,
    /// A peer connection was created for `connection_id`
    PeerJoined {
        connection_id: String,
        polite: bool,
    },
    /// The peer connection for `connection_id` was deleted
    PeerLeft { connection_id: String },
    Offer(SdpMessage),
    Answer(SdpMessage),
    Candidate(CandidateMessage),
    /// Error reported by the transport, or a lost connection
    Error { message: String },
}

impl SignalingEvent {
    /// Connection the event belongs to, if any
    pub fn connection_id(&self) -> Option<&str> {
        match self {
            SignalingEvent::PeerJoined { connection_id, .. } => Some(connection_id),
            SignalingEvent::PeerLeft { connection_id } => Some(connection_id),
            SignalingEvent::Offer(msg) | SignalingEvent::Answer(msg) => Some(&msg.connection_id),
            SignalingEvent::Candidate(msg) => Some(&msg.connection_id),
            SignalingEvent::Started | SignalingEvent::Error { .. } => None,
        }
    }

    /// Short label used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingEvent::Started => "started",
            SignalingEvent::PeerJoined { .. } => "peer_joined",
            SignalingEvent::PeerLeft { .. } => "peer_left",
            SignalingEvent::Offer(_) => "offer",
            SignalingEvent::Answer(_) => "answer",
            SignalingEvent::Candidate(_) => "candidate",
            SignalingEvent::Error { .. } => "error",
        }
    }
}

/// Consumer of signaling events that drives one peer connection
///
/// The orchestrator never owns a handler. It only calls [`bind`] with the
/// live session on subscribe and with `None` on unsubscribe, and delivers
/// events in the order the session emitted them. Errors returned from the
/// callbacks are logged and do not affect other handlers.
///
/// The next event is delivered only after every handler has finished with
/// the current one. A callback that never returns therefore stalls delivery
/// to all handlers unless the manager was built with
/// [`handler_timeout`](crate::SignalingManagerBuilder::handler_timeout).
/// Hand long-running work off to a task instead of awaiting it in place.
///
/// [`bind`]: SignalingHandler::bind
#[async_trait]
pub trait SignalingHandler: Send + Sync {
    /// Receive the session to issue outbound signaling through, or `None`
    /// once detached
    fn bind(&self, session: Option<Arc<SignalingSession>>);

    /// Name used in log output
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn on_started(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_peer_joined(&self, _connection_id: String, _polite: bool) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_peer_left(&self, _connection_id: String) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_offer(&self, _offer: SdpMessage) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_answer(&self, _answer: SdpMessage) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_candidate(&self, _candidate: CandidateMessage) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_error(&self, _message: String) -> anyhow::Result<()> {
        Ok(())
    }

    /// Entry point used by the event provider; dispatches to the typed
    /// callbacks unless overridden
    async fn on_signaling_event(&self, event: SignalingEvent) -> anyhow::Result<()> {
        match event {
            SignalingEvent::Started => self.on_started().await,
            SignalingEvent::PeerJoined { connection_id, polite } => {
                self.on_peer_joined(connection_id, polite).await
            }
            SignalingEvent::PeerLeft { connection_id } => self.on_peer_left(connection_id).await,
            SignalingEvent::Offer(offer) => self.on_offer(offer).await,
            SignalingEvent::Answer(answer) => self.on_answer(answer).await,
            SignalingEvent::Candidate(candidate) => self.on_candidate(candidate).await,
            SignalingEvent::Error { message } => self.on_error(message).await,
        }
    }
}

/// Identity of a handler instance
///
/// Two `Arc`s pointing at the same handler compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(usize);

impl HandlerId {
    pub fn of(handler: &Arc<dyn SignalingHandler>) -> Self {
        Self(Arc::as_ptr(handler) as *const () as usize)
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{:x}", self.0)
    }
}

/// Session slot for handler implementations
///
/// Stores whatever the orchestrator passes to [`SignalingHandler::bind`]
/// and forwards outbound signaling to it. Every forwarding call fails with
/// `InvalidState` while unbound.
#[derive(Default)]
pub struct SessionBinding {
    session: RwLock<Option<Arc<SignalingSession>>>,
}

impl SessionBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, session: Option<Arc<SignalingSession>>) {
        *self.session.write() = session;
    }

    pub fn get(&self) -> Option<Arc<SignalingSession>> {
        self.session.read().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.session.read().is_some()
    }

    fn require(&self) -> SignalingResult<Arc<SignalingSession>> {
        self.get()
            .ok_or_else(|| SignalingError::invalid_state("Handler is not bound to a signaling session"))
    }

    pub async fn open_connection(&self, connection_id: &str) -> SignalingResult<()> {
        self.require()?.open_connection(connection_id).await
    }

    pub async fn close_connection(&self, connection_id: &str) -> SignalingResult<()> {
        self.require()?.close_connection(connection_id).await
    }

    pub async fn send_offer(&self, connection_id: &str, sdp: &str) -> SignalingResult<()> {
        self.require()?.send_offer(connection_id, sdp).await
    }

    pub async fn send_answer(&self, connection_id: &str, sdp: &str) -> SignalingResult<()> {
        self.require()?.send_answer(connection_id, sdp).await
    }

    pub async fn send_candidate(&self, candidate: CandidateMessage) -> SignalingResult<()> {
        self.require()?.send_candidate(candidate).await
    }
}

impl fmt::Debug for SessionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBinding")
            .field("bound", &self.is_bound())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct KindRecorder {
        kinds: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl SignalingHandler for KindRecorder {
        fn bind(&self, _session: Option<Arc<SignalingSession>>) {}

        async fn on_offer(&self, _offer: SdpMessage) -> anyhow::Result<()> {
            self.kinds.lock().push("offer");
            Ok(())
        }

        async fn on_peer_left(&self, _connection_id: String) -> anyhow::Result<()> {
            self.kinds.lock().push("peer_left");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_dispatch_routes_to_typed_callbacks() {
        let handler = KindRecorder::default();
        let offer = SdpMessage {
            connection_id: "c1".to_string(),
            sdp: "v=0".to_string(),
            polite: true,
        };

        handler.on_signaling_event(SignalingEvent::Offer(offer)).await.unwrap();
        handler.on_signaling_event(SignalingEvent::Started).await.unwrap();
        handler
            .on_signaling_event(SignalingEvent::PeerLeft { connection_id: "c1".to_string() })
            .await
            .unwrap();

        assert_eq!(*handler.kinds.lock(), vec!["offer", "peer_left"]);
    }

    #[test]
    fn test_handler_identity_follows_the_allocation() {
        let a: Arc<dyn SignalingHandler> = Arc::new(KindRecorder::default());
        let b: Arc<dyn SignalingHandler> = Arc::new(KindRecorder::default());

        assert_eq!(HandlerId::of(&a), HandlerId::of(&a.clone()));
        assert_ne!(HandlerId::of(&a), HandlerId::of(&b));
    }

    #[test]
    fn test_event_connection_id() {
        let candidate = SignalingEvent::Candidate(CandidateMessage {
            connection_id: "c7".to_string(),
            candidate: "candidate:1 1 udp 2122260223 10.0.0.1 54400 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        });
        assert_eq!(candidate.connection_id(), Some("c7"));
        assert_eq!(candidate.kind(), "candidate");
        assert_eq!(SignalingEvent::Started.connection_id(), None);
    }

    #[tokio::test]
    async fn test_unbound_binding_rejects_outbound_calls() {
        let binding = SessionBinding::new();
        assert!(!binding.is_bound());

        let err = binding.send_offer("c1", "v=0").await.unwrap_err();
        assert!(matches!(err, SignalingError::InvalidState { .. }));
    }
}
