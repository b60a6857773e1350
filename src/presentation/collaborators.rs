//! Interfaces of the rendering, purchase, and debug subsystems the pipeline depends on.
use std::sync::Arc;

use async_trait::async_trait;

use crate::{models::Experiment, presentation::DismissalResult, EventData};

/// Reports whether the user already holds an active entitlement.
#[async_trait]
pub trait EntitlementProvider: Send + Sync {
    async fn has_active_entitlement(&self) -> bool;
}

/// Exposes a paywall pinned by a debug session, if any.
pub trait DebugSession: Send + Sync {
    fn pinned_paywall(&self) -> Option<String>;
}

/// What the pipeline asks the content provider for.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRequest {
    pub event: EventData,
    pub paywall_id: Option<String>,
    /// `None` when the paywall was pinned by a debug session.
    pub experiment: Option<Experiment>,
}

/// Paywall content ready to be displayed.
#[derive(Debug, Clone, PartialEq)]
pub struct PaywallContent {
    pub paywall_id: String,
    pub payload: serde_json::Value,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ContentError(pub String);

/// Resolves concrete paywall content.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn acquire_content(
        &self,
        request: &ContentRequest,
    ) -> Result<PaywallContent, ContentError>;
}

/// Provides a context capable of displaying content, e.g. the active foreground surface.
#[async_trait]
pub trait HostingProvider: Send + Sync {
    /// Returns `None` if nothing can host a paywall right now. Acquiring a host must not change
    /// any visible state.
    async fn acquire_host(&self) -> Option<Arc<dyn Host>>;
}

/// A context that displays paywall content.
#[async_trait]
pub trait Host: Send + Sync {
    /// Display `content` and resolve once the user dismisses it.
    async fn present(&self, content: PaywallContent) -> DismissalResult;
}

/// Entitlement provider for apps without purchases: nobody is entitled.
pub(crate) struct NeverEntitled;
#[async_trait]
impl EntitlementProvider for NeverEntitled {
    async fn has_active_entitlement(&self) -> bool {
        false
    }
}

pub(crate) struct NoDebugSession;
impl DebugSession for NoDebugSession {
    fn pinned_paywall(&self) -> Option<String> {
        None
    }
}
