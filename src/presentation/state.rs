use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::models::{Experiment, ExperimentId};

/// Lifecycle state of a single presentation request.
///
/// A pipeline emits `Placeholder` first, optionally `Presenting`, and then exactly one terminal
/// state (`PresentationPrevented`, `PresentationSkipped`, or `Presented`), after which the state
/// stream closes. A cancelled pipeline closes the stream without a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaywallState {
    Placeholder,
    /// The paywall has been handed to the host and is on screen.
    Presenting(PaywallInfo),
    /// The paywall was dismissed.
    Presented(DismissalResult),
    /// Nothing was shown.
    PresentationPrevented(PreventedReason),
    /// Nothing was shown on purpose, e.g. the user is in a holdout.
    PresentationSkipped(SkippedReason),
}

impl PaywallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaywallState::Presented(_)
                | PaywallState::PresentationPrevented(_)
                | PaywallState::PresentationSkipped(_)
        )
    }
}

/// Details of the paywall being presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaywallInfo {
    pub paywall_id: Option<String>,
    /// `None` when the paywall was pinned by a debug session.
    pub experiment: Option<Experiment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreventedReason {
    /// Another paywall is currently presented.
    AlreadyPresented,
    /// The user already has an active entitlement. Paywalls are never shown to entitled users.
    UserIsSubscribed,
    /// No context capable of displaying the paywall is available right now.
    NoHostingContext,
    /// Presentation failed. See [`PresentationErrorKind`] for the possible causes.
    Error(PresentationError),
}

impl PreventedReason {
    pub fn error_kind(&self) -> Option<&PresentationErrorKind> {
        match self {
            PreventedReason::Error(err) => Some(&err.kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkippedReason {
    /// The user is in the experiment's holdout arm. The assignment has been confirmed.
    Holdout(Experiment),
}

/// How the user left the paywall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DismissalResult {
    Purchased { product_id: String },
    Declined,
    Restored,
    Failed { message: String },
}

/// Stages of the presentation pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SingleFlight,
    Readiness,
    DebugOverride,
    RuleEvaluation,
    EntitlementGate,
    HoldoutConfirmation,
    ContentAcquisition,
    HostingAcquisition,
    AssignmentConfirmation,
    Present,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::SingleFlight => "single_flight",
            Stage::Readiness => "readiness",
            Stage::DebugOverride => "debug_override",
            Stage::RuleEvaluation => "rule_evaluation",
            Stage::EntitlementGate => "entitlement_gate",
            Stage::HoldoutConfirmation => "holdout_confirmation",
            Stage::ContentAcquisition => "content_acquisition",
            Stage::HostingAcquisition => "hosting_acquisition",
            Stage::AssignmentConfirmation => "assignment_confirmation",
            Stage::Present => "present",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why presentation failed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PresentationErrorKind {
    /// No trigger is configured for the event.
    #[error("no trigger configured for event")]
    ConfigurationMissing,
    /// None of the trigger's rules matched.
    #[error("no rule matched")]
    NoRuleMatched,
    /// The matched rule's experiment has no assignment. This is a misconfiguration.
    #[error("assignment not found")]
    AssignmentNotFound,
    /// Configuration was not loaded before the readiness timeout expired.
    #[error("timed out waiting for configuration")]
    ReadinessTimeout,
    /// Paywall content could not be acquired.
    #[error("failed to acquire paywall content: {0}")]
    ContentAcquisitionFailed(String),
    /// Hosting context acquisition did not complete in time.
    #[error("hosting context unavailable")]
    HostingUnavailable,
}

/// A terminal presentation failure with enough context to report it without recomputation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} (stage: {stage}, experiment: {experiment_id:?})")]
pub struct PresentationError {
    pub kind: PresentationErrorKind,
    pub stage: Stage,
    pub experiment_id: Option<ExperimentId>,
}

/// Sends states to the observer. Enforces a single terminal state and closes the channel after
/// it.
pub(crate) struct StateEmitter {
    sender: Option<mpsc::UnboundedSender<PaywallState>>,
}

impl StateEmitter {
    pub(crate) fn new(sender: mpsc::UnboundedSender<PaywallState>) -> StateEmitter {
        StateEmitter {
            sender: Some(sender),
        }
    }

    pub(crate) fn emit(&mut self, state: PaywallState) {
        let terminal = state.is_terminal();
        let Some(sender) = &self.sender else {
            log::debug!(target: "paywall",
                        "dropping state emitted after terminal state: {:?}", state);
            return;
        };
        // Error means the observer is gone. The pipeline carries on regardless.
        let _ = sender.send(state);
        if terminal {
            self.sender = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::{
        DismissalResult, PaywallState, PresentationError, PresentationErrorKind, PreventedReason,
        Stage, StateEmitter,
    };

    #[test]
    fn emits_at_most_one_terminal_state() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut emitter = StateEmitter::new(sender);

        emitter.emit(PaywallState::Placeholder);
        emitter.emit(PaywallState::PresentationPrevented(PreventedReason::AlreadyPresented));
        emitter.emit(PaywallState::Presented(DismissalResult::Declined));

        assert_eq!(receiver.try_recv(), Ok(PaywallState::Placeholder));
        assert_eq!(
            receiver.try_recv(),
            Ok(PaywallState::PresentationPrevented(
                PreventedReason::AlreadyPresented
            ))
        );
        assert_eq!(
            receiver.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        );
    }

    #[test]
    fn error_message_names_stage_and_experiment() {
        let err = PresentationError {
            kind: PresentationErrorKind::AssignmentNotFound,
            stage: Stage::RuleEvaluation,
            experiment_id: Some("exp1".to_owned()),
        };
        assert_eq!(
            err.to_string(),
            "assignment not found (stage: rule_evaluation, experiment: Some(\"exp1\"))"
        );
    }
}
