//! Signaling configuration and the per-run config builder
//!
//! # Key Components
//!
//! - **SignalingSettings** - Serializable settings: transport kind, URL, ICE
//!   servers and offer resend interval
//! - **SettingsProvider** - Injected source of process-wide default settings
//! - **SessionConfig** - Immutable snapshot handed to a [`SignalingSession`]
//! - **SessionConfigBuilder** - Picks default vs. override settings and
//!   validates them before any connection attempt
//!
//! ```text
//!  use_default ──► SettingsProvider ──┐
//!                                     ├─► validate ─► EffectiveConfig
//!  override ──────────────────────────┘      │          ├─ SessionConfig
//!                                            │          ├─ SignalingSettings
//!                         TransportRegistry ─┘          └─ TransportConstructor
//! ```
//!
//! # Usage Examples
//!
//! ```rust
//! use rtsignal_signaling_core::config::{SignalingSettings, IceServer};
//!
//! let settings = SignalingSettings::new("memory", "ws://127.0.0.1:8080")
//!     .with_ice_servers(vec![IceServer::new(vec!["stun:stun.l.google.com:19302".to_string()])])
//!     .with_resend_interval(2.5);
//!
//! assert_eq!(settings.transport.as_deref(), Some("memory"));
//! assert_eq!(settings.resend_interval_secs, 2.5);
//! ```
//!
//! [`SignalingSession`]: crate::session::SignalingSession

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::warn;

use crate::error::{SignalingError, SignalingResult};
use crate::transport::{Signaling, TransportConstructor, TransportRegistry};

/// Default interval between resends of an unanswered offer, in seconds
pub const DEFAULT_RESEND_INTERVAL_SECS: f64 = 5.0;

/// Default signaling server URL
pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:80";

/// Credential type of a TURN server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceCredentialType {
    #[default]
    Password,
    OAuth,
}

/// A STUN/TURN server descriptor
///
/// Opaque to the orchestrator; handed through to handlers via the
/// [`SessionConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs, e.g. `stun:stun.l.google.com:19302`
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(default)]
    pub credential_type: IceCredentialType,
}

impl IceServer {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            username: None,
            credential: None,
            credential_type: IceCredentialType::Password,
        }
    }

    /// Attach TURN credentials
    pub fn with_credentials(mut self, username: impl Into<String>, credential: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.credential = Some(credential.into());
        self
    }

    /// A descriptor with at least one non-blank URL
    pub fn is_usable(&self) -> bool {
        self.urls.iter().any(|url| !url.trim().is_empty())
    }
}

/// Signaling settings, either process-wide defaults or a caller override
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingSettings {
    /// Transport kind key, resolved through the [`TransportRegistry`]
    pub transport: Option<String>,
    /// Signaling server URL passed to the transport constructor
    pub url: String,
    /// ICE servers offered to every handler's peer connection
    pub ice_servers: Vec<IceServer>,
    /// Seconds between resends of unanswered offers; `0` disables resending
    pub resend_interval_secs: f64,
}

impl Default for SignalingSettings {
    fn default() -> Self {
        Self {
            transport: None,
            url: DEFAULT_SIGNALING_URL.to_string(),
            ice_servers: vec![IceServer::new(vec![
                "stun:stun.l.google.com:19302".to_string(),
            ])],
            resend_interval_secs: DEFAULT_RESEND_INTERVAL_SECS,
        }
    }
}

impl SignalingSettings {
    pub fn new(transport: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            transport: Some(transport.into()),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_ice_servers(mut self, ice_servers: Vec<IceServer>) -> Self {
        self.ice_servers = ice_servers;
        self
    }

    pub fn with_resend_interval(mut self, secs: f64) -> Self {
        self.resend_interval_secs = secs;
        self
    }

    /// Parse settings from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> SignalingResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| SignalingError::invalid_argument(format!("Malformed signaling settings: {}", e)))
    }
}

/// Source of process-wide default signaling settings
///
/// Must be able to answer before the first run; `None` makes any run that
/// uses defaults fail with `InvalidArgument`.
pub trait SettingsProvider: Send + Sync {
    fn signaling_settings(&self) -> Option<SignalingSettings>;
}

/// Settings provider backed by a fixed value
#[derive(Debug, Clone, Default)]
pub struct StaticSettingsProvider {
    settings: Option<SignalingSettings>,
}

impl StaticSettingsProvider {
    pub fn new(settings: SignalingSettings) -> Self {
        Self {
            settings: Some(settings),
        }
    }

    /// A provider with no defaults configured
    pub fn empty() -> Self {
        Self { settings: None }
    }
}

impl SettingsProvider for StaticSettingsProvider {
    fn signaling_settings(&self) -> Option<SignalingSettings> {
        self.settings.clone()
    }
}

/// Peer-connection configuration supplied explicitly to a run
///
/// Takes precedence over the ICE servers derived from settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcConfiguration {
    pub ice_servers: Vec<IceServer>,
}

/// Immutable configuration snapshot for one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    ice_servers: Vec<IceServer>,
    resend_interval_secs: f64,
}

impl SessionConfig {
    /// Fails with `InvalidArgument` for a negative or non-finite interval
    pub fn new(ice_servers: Vec<IceServer>, resend_interval_secs: f64) -> SignalingResult<Self> {
        if !resend_interval_secs.is_finite() || resend_interval_secs < 0.0 {
            return Err(SignalingError::invalid_argument(format!(
                "Resend interval must be a finite number of seconds >= 0, got {}",
                resend_interval_secs
            )));
        }
        Ok(Self {
            ice_servers,
            resend_interval_secs,
        })
    }

    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    pub fn resend_interval_secs(&self) -> f64 {
        self.resend_interval_secs
    }

    /// `None` when offer resending is disabled
    pub fn resend_interval(&self) -> Option<Duration> {
        if self.resend_interval_secs > 0.0 {
            Some(Duration::from_secs_f64(self.resend_interval_secs))
        } else {
            None
        }
    }
}

/// Validated output of [`SessionConfigBuilder::build`]
#[derive(Clone)]
pub struct EffectiveConfig {
    pub settings: SignalingSettings,
    pub session: SessionConfig,
    constructor: TransportConstructor,
}

impl EffectiveConfig {
    /// Build a fresh transport from the resolved constructor
    pub fn create_transport(&self, context: Handle) -> SignalingResult<Arc<dyn Signaling>> {
        (self.constructor)(&self.settings, context)
    }
}

impl fmt::Debug for EffectiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectiveConfig")
            .field("settings", &self.settings)
            .field("session", &self.session)
            .field("constructor", &"<transport constructor>")
            .finish()
    }
}

/// Merges default and override settings into one validated snapshot
pub struct SessionConfigBuilder {
    use_default: bool,
    settings: Option<SignalingSettings>,
    defaults: Arc<dyn SettingsProvider>,
    rtc_configuration: Option<RtcConfiguration>,
}

impl SessionConfigBuilder {
    pub fn new(defaults: Arc<dyn SettingsProvider>) -> Self {
        Self {
            use_default: true,
            settings: None,
            defaults,
            rtc_configuration: None,
        }
    }

    /// Pull settings from the provider and ignore any override
    pub fn use_default(mut self, use_default: bool) -> Self {
        self.use_default = use_default;
        self
    }

    pub fn settings(mut self, settings: Option<SignalingSettings>) -> Self {
        self.settings = settings;
        self
    }

    pub fn rtc_configuration(mut self, rtc_configuration: Option<RtcConfiguration>) -> Self {
        self.rtc_configuration = rtc_configuration;
        self
    }

    /// Resolve and validate the settings for one run
    ///
    /// The transport kind is resolved against `registry` here so an unknown
    /// kind surfaces before any connection attempt.
    pub fn build(&self, registry: &TransportRegistry) -> SignalingResult<EffectiveConfig> {
        let selected = if self.use_default {
            self.defaults.signaling_settings()
        } else {
            self.settings.clone()
        };
        let settings = selected.ok_or_else(|| {
            let source = if self.use_default { "default" } else { "override" };
            SignalingError::invalid_argument(format!("No {} signaling settings available", source))
        })?;

        let kind = settings
            .transport
            .as_deref()
            .map(str::trim)
            .filter(|kind| !kind.is_empty())
            .ok_or_else(|| SignalingError::invalid_argument("Signaling transport type is undefined"))?;
        let constructor = registry.resolve(kind)?;

        let ice_servers = match &self.rtc_configuration {
            Some(rtc) => rtc.ice_servers.clone(),
            None => usable_ice_servers(&settings.ice_servers),
        };
        let session = SessionConfig::new(ice_servers, settings.resend_interval_secs)?;

        Ok(EffectiveConfig {
            settings,
            session,
            constructor,
        })
    }
}

fn usable_ice_servers(servers: &[IceServer]) -> Vec<IceServer> {
    servers
        .iter()
        .filter(|server| {
            let usable = server.is_usable();
            if !usable {
                warn!(urls = ?server.urls, "Dropping ICE server without URLs");
            }
            usable
        })
        .cloned()
        .collect()
}
