use std::{sync::Arc, time::Duration};

use crate::{
    attributes::{AttributesProvider, NoAttributes},
    presentation::{
        ContentProvider, DebugSession, EntitlementProvider, HostingProvider, NeverEntitled,
        NoDebugSession, SingleFlight,
    },
    storage::{DurableStore, InMemoryStore},
    Client, Result,
};

/// Configuration for [`Client`].
///
/// Content and hosting providers are required. Everything else has a default suitable for apps
/// without purchases or debug tooling.
pub struct ClientConfig {
    pub(crate) store: Arc<dyn DurableStore>,
    pub(crate) attributes: Arc<dyn AttributesProvider>,
    pub(crate) entitlements: Arc<dyn EntitlementProvider>,
    pub(crate) debug_session: Arc<dyn DebugSession>,
    pub(crate) content: Arc<dyn ContentProvider>,
    pub(crate) hosting: Arc<dyn HostingProvider>,
    pub(crate) readiness_timeout: Duration,
    pub(crate) hosting_timeout: Option<Duration>,
    pub(crate) single_flight: SingleFlight,
}

impl ClientConfig {
    /// Default bound on how long a presentation waits for configuration to load.
    pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a configuration with the given content and hosting providers.
    ///
    /// Assignments and occurrence counters are kept in memory until [`ClientConfig::store`] is
    /// set.
    pub fn new(content: Arc<dyn ContentProvider>, hosting: Arc<dyn HostingProvider>) -> Self {
        ClientConfig {
            store: Arc::new(InMemoryStore::new()),
            attributes: Arc::new(NoAttributes),
            entitlements: Arc::new(NeverEntitled),
            debug_session: Arc::new(NoDebugSession),
            content,
            hosting,
            readiness_timeout: ClientConfig::DEFAULT_READINESS_TIMEOUT,
            hosting_timeout: None,
            single_flight: SingleFlight::new(),
        }
    }

    /// Set the durable store for confirmed assignments and occurrence counters.
    pub fn store(&mut self, store: Arc<dyn DurableStore>) -> &mut Self {
        self.store = store;
        self
    }

    /// Set the provider of user and device attributes used by rule expressions.
    pub fn attributes(&mut self, attributes: Arc<dyn AttributesProvider>) -> &mut Self {
        self.attributes = attributes;
        self
    }

    pub fn entitlements(&mut self, entitlements: Arc<dyn EntitlementProvider>) -> &mut Self {
        self.entitlements = entitlements;
        self
    }

    pub fn debug_session(&mut self, debug_session: Arc<dyn DebugSession>) -> &mut Self {
        self.debug_session = debug_session;
        self
    }

    /// Override how long a presentation waits for configuration before failing with
    /// [`ReadinessTimeout`](crate::PresentationErrorKind::ReadinessTimeout).
    pub fn readiness_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.readiness_timeout = timeout;
        self
    }

    /// Bound hosting context acquisition. Unbounded by default.
    pub fn hosting_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.hosting_timeout = Some(timeout);
        self
    }

    /// Share the "a paywall is presented" flag with other clients. Without this, at most one
    /// paywall is presented per client.
    pub fn single_flight(&mut self, single_flight: SingleFlight) -> &mut Self {
        self.single_flight = single_flight;
        self
    }

    /// Create a new [`Client`] using this configuration.
    pub async fn to_client(self) -> Result<Client> {
        Client::new(self).await
    }
}
