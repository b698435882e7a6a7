//! Signaling manager - the public entry point
//!
//! [`SignalingManager`] owns at most one live [`SignalingSession`] and the
//! registry of handlers that outlives it. A run builds the config, obtains
//! a transport, opens the session, subscribes every handler through a fresh
//! [`SignalingEventProvider`] and only then reports itself running. A failed
//! run leaves nothing behind.
//!
//! ```text
//!  run ─► SessionConfigBuilder ─► transport ─► SignalingSession::open
//!                                                    │
//!                        SignalingEventProvider ◄────┘
//!                          │ subscribe(h) for each handler
//!                          └─► session.attach(provider) ─► running
//!
//!  stop ─► provider.close() ─► session.dispose() ─► stopped
//! ```
//!
//! # Usage Examples
//!
//! ```rust
//! use rtsignal_signaling_core::{
//!     MemorySignaling, SignalingHandler, SignalingManager, SignalingSession,
//!     SignalingSettings, TransportRegistry,
//! };
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Viewer;
//!
//! #[async_trait]
//! impl SignalingHandler for Viewer {
//!     fn bind(&self, _session: Option<Arc<SignalingSession>>) {}
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let manager = SignalingManager::builder()
//!     .transport_registry(TransportRegistry::new().with_memory_transport())
//!     .default_settings(SignalingSettings::new("memory", "ws://127.0.0.1:8080"))
//!     .build();
//!
//! manager.add_handler(Arc::new(Viewer)).await.unwrap();
//! manager.run(None, None).await.unwrap();
//! assert!(manager.is_running());
//!
//! manager.stop().await;
//! assert!(!manager.is_running());
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{
    RtcConfiguration, SessionConfigBuilder, SettingsProvider, SignalingSettings,
    StaticSettingsProvider,
};
use crate::error::{SignalingError, SignalingResult};
use crate::events::{HandlerId, SignalingHandler};
use crate::provider::SignalingEventProvider;
use crate::recovery::RetryConfig;
use crate::registry::HandlerRegistry;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::session::SignalingSession;
use crate::transport::{Signaling, TransportRegistry};

struct ActiveSession {
    session: Arc<SignalingSession>,
    provider: Arc<SignalingEventProvider>,
}

struct ManagerState {
    use_default: bool,
    settings: Option<SignalingSettings>,
    handlers: HandlerRegistry,
    active: Option<ActiveSession>,
}

pub struct SignalingManager {
    registry: TransportRegistry,
    defaults: Arc<dyn SettingsProvider>,
    scheduler: Option<Arc<dyn Scheduler>>,
    connect_retry: RetryConfig,
    handler_timeout: Option<Duration>,
    run_on_start: bool,
    state: Mutex<ManagerState>,
    running: AtomicBool,
}

impl SignalingManager {
    pub fn builder() -> SignalingManagerBuilder {
        SignalingManagerBuilder::new()
    }

    /// True strictly between a successful run and the matching stop
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn use_default_settings(&self) -> bool {
        self.state.lock().await.use_default
    }

    /// Choose between the injected defaults and the override for the next run
    pub async fn set_use_default_settings(&self, use_default: bool) {
        self.state.lock().await.use_default = use_default;
    }

    /// Replace the override settings
    ///
    /// Fails with `InvalidState` while running and `InvalidArgument` for
    /// `None`.
    pub async fn set_settings(&self, settings: Option<SignalingSettings>) -> SignalingResult<()> {
        let mut state = self.state.lock().await;
        if state.active.is_some() {
            return Err(SignalingError::invalid_state("The signaling process has already started"));
        }
        let settings = settings.ok_or_else(|| SignalingError::invalid_argument("settings must not be empty"))?;
        state.settings = Some(settings);
        Ok(())
    }

    /// The settings the next run would use: defaults or override, per the
    /// use-default flag
    pub async fn settings(&self) -> Option<SignalingSettings> {
        let state = self.state.lock().await;
        if state.use_default {
            self.defaults.signaling_settings()
        } else {
            state.settings.clone()
        }
    }

    /// Register `handler`; while running it is also bound and subscribed
    /// immediately and sees events emitted from now on
    pub async fn add_handler(&self, handler: Arc<dyn SignalingHandler>) -> SignalingResult<()> {
        let mut state = self.state.lock().await;
        if !state.handlers.add(handler.clone()) {
            return Ok(());
        }
        debug!(handler = %HandlerId::of(&handler), name = handler.name(), "Handler registered");

        if let Some(active) = &state.active {
            if let Err(e) = active.provider.subscribe(handler.clone()) {
                state.handlers.remove(&handler);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Unregister `handler`; while running it is also unbound and receives
    /// no further events once this returns
    pub async fn remove_handler(&self, handler: &Arc<dyn SignalingHandler>) {
        let mut state = self.state.lock().await;
        if state.handlers.remove(handler) {
            debug!(handler = %HandlerId::of(handler), "Handler unregistered");
        }
        if let Some(active) = &state.active {
            active.provider.unsubscribe(handler);
        }
    }

    /// Registered handlers in registration order
    pub async fn handlers(&self) -> Vec<Arc<dyn SignalingHandler>> {
        self.state.lock().await.handlers.snapshot()
    }

    /// The live session, if running
    pub async fn session(&self) -> Option<Arc<SignalingSession>> {
        self.state
            .lock()
            .await
            .active
            .as_ref()
            .map(|active| active.session.clone())
    }

    /// Start a session
    ///
    /// `transport` replaces the one built from settings; a non-empty
    /// `handlers` list replaces the registry contents for this run.
    pub async fn run(
        &self,
        transport: Option<Arc<dyn Signaling>>,
        handlers: Option<Vec<Arc<dyn SignalingHandler>>>,
    ) -> SignalingResult<()> {
        let mut state = self.state.lock().await;
        self.run_locked(&mut state, None, transport, handlers).await
    }

    /// Like [`run`](Self::run), with ICE servers taken from `rtc_configuration`
    /// instead of the settings
    pub async fn run_with_config(
        &self,
        rtc_configuration: RtcConfiguration,
        transport: Option<Arc<dyn Signaling>>,
        handlers: Option<Vec<Arc<dyn SignalingHandler>>>,
    ) -> SignalingResult<()> {
        let mut state = self.state.lock().await;
        self.run_locked(&mut state, Some(rtc_configuration), transport, handlers)
            .await
    }

    /// Host start hook
    ///
    /// Runs with the registered handlers when run-on-start is enabled, the
    /// manager is idle and at least one handler is registered. Returns
    /// whether a run was started.
    pub async fn start(&self) -> SignalingResult<bool> {
        if !self.run_on_start {
            return Ok(false);
        }
        let mut state = self.state.lock().await;
        if state.active.is_some() || state.handlers.is_empty() {
            return Ok(false);
        }
        self.run_locked(&mut state, None, None, None).await?;
        Ok(true)
    }

    /// Stop the session; a no-op when not running
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(active) = state.active.take() else {
            debug!("Stop requested while not running");
            return;
        };
        self.running.store(false, Ordering::Release);

        active.provider.close();
        active.session.dispose().await;
        info!("Signaling manager stopped");
    }

    /// Host teardown hook
    pub async fn shutdown(&self) {
        self.stop().await;
    }

    async fn run_locked(
        &self,
        state: &mut ManagerState,
        rtc_configuration: Option<RtcConfiguration>,
        transport: Option<Arc<dyn Signaling>>,
        handlers: Option<Vec<Arc<dyn SignalingHandler>>>,
    ) -> SignalingResult<()> {
        if state.active.is_some() {
            return Err(SignalingError::invalid_state("The signaling process has already started"));
        }

        let effective = SessionConfigBuilder::new(self.defaults.clone())
            .use_default(state.use_default)
            .settings(state.settings.clone())
            .rtc_configuration(rtc_configuration)
            .build(&self.registry)?;

        let handlers = resolve_handlers(handlers, &state.handlers);
        if handlers.is_empty() {
            return Err(SignalingError::invalid_argument("Handler list is empty"));
        }

        let transport = match transport {
            Some(transport) => transport,
            None => effective.create_transport(Handle::current())?,
        };
        let scheduler = self
            .scheduler
            .clone()
            .unwrap_or_else(|| Arc::new(TokioScheduler::current()));

        let session =
            SignalingSession::open(effective.session, transport, scheduler, &self.connect_retry).await?;
        let provider = SignalingEventProvider::with_handler_timeout(&session, self.handler_timeout);

        let bound = handlers
            .iter()
            .try_for_each(|handler| provider.subscribe(handler.clone()))
            .and_then(|()| session.attach(provider.clone()));
        if let Err(e) = bound {
            provider.close();
            session.dispose().await;
            return Err(e);
        }

        info!(
            url = %session.transport_url(),
            handlers = handlers.len(),
            "Signaling manager running"
        );
        state.active = Some(ActiveSession { session, provider });
        self.running.store(true, Ordering::Release);
        Ok(())
    }
}

/// Explicit non-empty list wins over the registry; duplicates collapse to
/// their first occurrence
fn resolve_handlers(
    explicit: Option<Vec<Arc<dyn SignalingHandler>>>,
    registry: &HandlerRegistry,
) -> Vec<Arc<dyn SignalingHandler>> {
    match explicit {
        Some(list) if !list.is_empty() => {
            let mut unique = HandlerRegistry::new();
            for handler in list {
                unique.add(handler);
            }
            unique.snapshot()
        }
        _ => registry.snapshot(),
    }
}

impl fmt::Debug for SignalingManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalingManager")
            .field("registry", &self.registry)
            .field("run_on_start", &self.run_on_start)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Fluent builder for [`SignalingManager`]
pub struct SignalingManagerBuilder {
    registry: TransportRegistry,
    defaults: Option<Arc<dyn SettingsProvider>>,
    settings: Option<SignalingSettings>,
    use_default: bool,
    scheduler: Option<Arc<dyn Scheduler>>,
    connect_retry: RetryConfig,
    handler_timeout: Option<Duration>,
    run_on_start: bool,
    handlers: HandlerRegistry,
}

impl SignalingManagerBuilder {
    pub fn new() -> Self {
        Self {
            registry: TransportRegistry::new(),
            defaults: None,
            settings: None,
            use_default: true,
            scheduler: None,
            connect_retry: RetryConfig::default(),
            handler_timeout: None,
            run_on_start: true,
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn transport_registry(mut self, registry: TransportRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Source of process-wide default settings
    pub fn settings_provider(mut self, provider: Arc<dyn SettingsProvider>) -> Self {
        self.defaults = Some(provider);
        self
    }

    /// Shorthand for a [`StaticSettingsProvider`] holding `settings`
    pub fn default_settings(self, settings: SignalingSettings) -> Self {
        self.settings_provider(Arc::new(StaticSettingsProvider::new(settings)))
    }

    /// Override settings, used when `use_default_settings(false)`
    pub fn settings(mut self, settings: SignalingSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn use_default_settings(mut self, use_default: bool) -> Self {
        self.use_default = use_default;
        self
    }

    /// Scheduler for offer resends; defaults to the current tokio runtime
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Policy for starting the transport, on run and after a lost connection
    pub fn connect_retry(mut self, retry: RetryConfig) -> Self {
        self.connect_retry = retry;
        self
    }

    /// Cancel any handler callback that runs longer than `timeout`
    ///
    /// Unset by default, in which case a callback that never returns stalls
    /// delivery to every handler.
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }

    /// Whether [`SignalingManager::start`] runs automatically
    pub fn run_on_start(mut self, enabled: bool) -> Self {
        self.run_on_start = enabled;
        self
    }

    /// Pre-register a handler
    pub fn handler(mut self, handler: Arc<dyn SignalingHandler>) -> Self {
        self.handlers.add(handler);
        self
    }

    pub fn build(self) -> Arc<SignalingManager> {
        Arc::new(SignalingManager {
            registry: self.registry,
            defaults: self
                .defaults
                .unwrap_or_else(|| Arc::new(StaticSettingsProvider::empty())),
            scheduler: self.scheduler,
            connect_retry: self.connect_retry,
            handler_timeout: self.handler_timeout,
            run_on_start: self.run_on_start,
            state: Mutex::new(ManagerState {
                use_default: self.use_default,
                settings: self.settings,
                handlers: self.handlers,
                active: None,
            }),
            running: AtomicBool::new(false),
        })
    }
}

impl Default for SignalingManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
