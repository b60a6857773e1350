//! Presentation pipeline: turns a fired event into at most one displayed paywall.
//!
//! Each call to [`Client::present`](crate::Client::present) runs an independent pipeline on its
//! own task. Progress is reported through a [`PresentationHandle`] as a stream of
//! [`PaywallState`]s.
mod collaborators;
mod pipeline;
mod single_flight;
mod state;

pub use collaborators::{
    ContentError, ContentProvider, ContentRequest, DebugSession, EntitlementProvider, Host,
    HostingProvider, PaywallContent,
};
pub use pipeline::PresentationHandle;
pub use single_flight::SingleFlight;
pub use state::{
    DismissalResult, PaywallInfo, PaywallState, PresentationError, PresentationErrorKind,
    PreventedReason, SkippedReason, Stage,
};

pub(crate) use collaborators::{NeverEntitled, NoDebugSession};
pub(crate) use pipeline::{spawn, PresentationContext};

#[cfg(test)]
pub(crate) use pipeline::tests as fakes;
