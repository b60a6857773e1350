//! Paywall decision engine: decides whether, which, and when a paywall is shown in response to an
//! application event.
//!
//! # Overview
//!
//! The crate revolves around a [`Client`]. Configuration sync hands it trigger configuration
//! ([`Client::load_configuration_json`] or [`Client::set_configuration`]): event names bound to
//! ordered rules, each rule pointing to an experiment with weighted variants. When the application
//! fires an event, [`Client::present`] runs a presentation pipeline that evaluates the rules,
//! resolves the user's variant, and either presents a paywall or reports why nothing was shown.
//!
//! A variant is chosen per experiment as an *unconfirmed* assignment. It becomes *confirmed*, and
//! sticks to the user forever, only once the user has actually been exposed to it: the paywall
//! was presented or the user was held out. Confirmed assignments and rule occurrence counters are
//! persisted through a [`DurableStore`].
//!
//! Rendering, purchases, and debugging live outside of this crate and are plugged in through
//! [`ContentProvider`], [`HostingProvider`], [`EntitlementProvider`], and [`DebugSession`].
//!
//! # Error Handling
//!
//! Storage and configuration errors are represented by the [`Error`] enum. Presentation never
//! returns an error: every outcome, including failures, is a terminal [`PaywallState`] carrying a
//! [`PresentationError`] when something went wrong.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages under
//! the `paywall` target. Consider integrating a `log`-compatible logger implementation for better
//! visibility into presentation decisions.

#![warn(rustdoc::missing_crate_level_docs)]

mod assignment_store;
mod attributes;
mod client;
mod config;
mod configuration;
mod configuration_store;
mod error;
mod expression_evaluator;
mod models;
mod occurrences;
mod presentation;
mod rule_engine;
mod rules;
mod storage;

pub use assignment_store::{AssignmentStore, ConfirmableAssignment};
pub use attributes::{AttributeValue, Attributes, AttributesProvider, EventData};
pub use client::Client;
pub use config::ClientConfig;
pub use configuration::{Configuration, Triggers};
pub use configuration_store::ConfigurationStore;
pub use error::{Error, Result};
pub use models::{
    Assignments, Condition, ConditionOperator, ConditionValue, ConfigResponse, Experiment,
    ExperimentId, OccurrenceInterval, Predicate, RawExperiment, Trigger, TriggerRule,
    TriggerRuleOccurrence, TryParse, Value, Variant, VariantOption, VariantType,
};
pub use presentation::{
    ContentError, ContentProvider, ContentRequest, DebugSession, DismissalResult,
    EntitlementProvider, Host, HostingProvider, PaywallContent, PaywallInfo, PaywallState,
    PresentationError, PresentationErrorKind, PresentationHandle, PreventedReason, SingleFlight,
    SkippedReason, Stage,
};
pub use rule_engine::{Outcome, RuleEngine, TriggerError, TriggerResult};
pub use storage::{DurableStore, FileStore, InMemoryStore};
