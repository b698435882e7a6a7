//! # Signaling-Core - Signaling Session Orchestration
//!
//! This crate coordinates a real-time communication signaling session: it
//! owns a pluggable signaling transport, keeps a registry of peer-connection
//! handlers and fans every inbound signaling event out to them. Handlers can
//! join and leave while the session is live.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    SignalingManager                      │
//! │   settings · use-default flag · HandlerRegistry          │
//! └──────────────┬────────────────────────────┬──────────────┘
//!                │ run                        │ add / remove
//!                ▼                            ▼
//! ┌───────────────────────────┐   ┌─────────────────────────┐
//! │ SessionConfigBuilder      │   │ SignalingEventProvider  │
//! │  settings → SessionConfig │   │  subscribe / unsubscribe│
//! │  kind → TransportRegistry │   │  concurrent fan-out     │
//! └──────────────┬────────────┘   └────────────▲────────────┘
//!                ▼                             │ publish
//! ┌──────────────────────────────────────────────────────────┐
//! │                    SignalingSession                      │
//! │   transport lifetime · pending offers · resend schedule  │
//! └──────────────────────────┬───────────────────────────────┘
//!                            ▼
//!                  dyn Signaling (transport)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rtsignal_signaling_core::prelude::*;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Greeter {
//!     binding: SessionBinding,
//! }
//!
//! #[async_trait]
//! impl SignalingHandler for Greeter {
//!     fn bind(&self, session: Option<Arc<SignalingSession>>) {
//!         self.binding.set(session);
//!     }
//!
//!     async fn on_peer_joined(&self, connection_id: String, _polite: bool) -> anyhow::Result<()> {
//!         self.binding.send_offer(&connection_id, "v=0").await?;
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), SignalingError> {
//! let manager = SignalingManager::builder()
//!     .transport_registry(TransportRegistry::new().with_memory_transport())
//!     .default_settings(SignalingSettings::new(MEMORY_TRANSPORT, "ws://127.0.0.1:8080"))
//!     .handler(Arc::new(Greeter::default()))
//!     .build();
//!
//! manager.run(None, None).await?;
//! manager.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod provider;
pub mod recovery;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use config::{
    EffectiveConfig, IceCredentialType, IceServer, RtcConfiguration, SessionConfig,
    SessionConfigBuilder, SettingsProvider, SignalingSettings, StaticSettingsProvider,
    DEFAULT_RESEND_INTERVAL_SECS, DEFAULT_SIGNALING_URL,
};
pub use error::{SignalingError, SignalingResult};
pub use events::{
    CandidateMessage, HandlerId, SdpMessage, SessionBinding, SignalingEvent, SignalingHandler,
};
pub use manager::{SignalingManager, SignalingManagerBuilder};
pub use provider::SignalingEventProvider;
pub use recovery::RetryConfig;
pub use registry::HandlerRegistry;
pub use scheduler::{PeriodicTask, ScheduledTask, Scheduler, TokioScheduler};
pub use session::{EventSink, SignalingSession};
pub use transport::{
    EventSender, MemorySignaling, OutboundMessage, Signaling, TransportConstructor,
    TransportRegistry, MEMORY_TRANSPORT,
};

/// Commonly used types for handler and host code
pub mod prelude {
    pub use super::{
        CandidateMessage, SdpMessage, SessionBinding, SignalingError, SignalingEvent,
        SignalingHandler, SignalingManager, SignalingResult, SignalingSession,
        SignalingSettings, TransportRegistry, MEMORY_TRANSPORT,
    };
}
