use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, watch};

use crate::{
    assignment_store::{AssignmentStore, ConfirmableAssignment},
    configuration_store::ConfigurationStore,
    models::{Experiment, ExperimentId},
    presentation::{
        collaborators::{
            ContentProvider, ContentRequest, DebugSession, EntitlementProvider, Host,
            HostingProvider,
        },
        single_flight::SingleFlight,
        state::StateEmitter,
        PaywallInfo, PaywallState, PresentationError, PresentationErrorKind, PreventedReason,
        SkippedReason, Stage,
    },
    rule_engine::{RuleEngine, TriggerError, TriggerResult},
    Configuration, EventData,
};

/// Everything a presentation pipeline needs. Shared by all pipelines of a client.
pub(crate) struct PresentationContext {
    pub(crate) configuration_store: Arc<ConfigurationStore>,
    pub(crate) assignments: Arc<AssignmentStore>,
    pub(crate) rule_engine: Arc<RuleEngine>,
    pub(crate) single_flight: SingleFlight,
    pub(crate) entitlements: Arc<dyn EntitlementProvider>,
    pub(crate) debug_session: Arc<dyn DebugSession>,
    pub(crate) content: Arc<dyn ContentProvider>,
    pub(crate) hosting: Arc<dyn HostingProvider>,
    pub(crate) readiness_timeout: Duration,
    pub(crate) hosting_timeout: Option<Duration>,
}

/// Observer side of a running presentation.
///
/// Dropping the handle does not cancel the presentation.
pub struct PresentationHandle {
    states: mpsc::UnboundedReceiver<PaywallState>,
    cancel: watch::Sender<bool>,
}

impl PresentationHandle {
    /// Next lifecycle state, or `None` once the stream is closed.
    pub async fn next_state(&mut self) -> Option<PaywallState> {
        self.states.recv().await
    }

    /// Request cancellation. A pipeline cancelled before it confirms an assignment leaves
    /// assignments and hosting state untouched. The state stream closes without a terminal
    /// state.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Drain the stream and return the terminal state, if any.
    pub async fn terminal_state(mut self) -> Option<PaywallState> {
        let mut terminal = None;
        while let Some(state) = self.states.recv().await {
            if state.is_terminal() {
                terminal = Some(state);
            }
        }
        terminal
    }
}

/// Start a presentation pipeline for `event` on its own task.
pub(crate) fn spawn(context: Arc<PresentationContext>, event: EventData) -> PresentationHandle {
    let (sender, states) = mpsc::unbounded_channel();
    let (cancel, mut cancelled) = watch::channel(false);

    tokio::spawn(async move {
        let mut emitter = StateEmitter::new(sender);
        tokio::select! {
            biased;
            _ = wait_for_cancel(&mut cancelled) => {
                log::debug!(target: "paywall",
                            event_name = event.name.as_str();
                            "presentation cancelled");
            }
            _ = context.run(&event, &mut emitter) => {}
        }
    });

    PresentationHandle { states, cancel }
}

async fn wait_for_cancel(cancelled: &mut watch::Receiver<bool>) {
    if cancelled.wait_for(|cancelled| *cancelled).await.is_err() {
        // The handle was dropped without cancelling.
        std::future::pending::<()>().await;
    }
}

/// Early exit of a pipeline. Carries the terminal state.
type Exit = PaywallState;

fn prevented(reason: PreventedReason) -> Exit {
    PaywallState::PresentationPrevented(reason)
}

fn failed(kind: PresentationErrorKind, stage: Stage, experiment_id: Option<&ExperimentId>) -> Exit {
    prevented(PreventedReason::Error(PresentationError {
        kind,
        stage,
        experiment_id: experiment_id.cloned(),
    }))
}

/// Paywall chosen for display, before content is acquired.
struct Selection {
    paywall_id: Option<String>,
    experiment: Option<Experiment>,
    pending: Option<ConfirmableAssignment>,
}

impl PresentationContext {
    async fn run(&self, event: &EventData, emitter: &mut StateEmitter) {
        emitter.emit(PaywallState::Placeholder);
        let terminal = match self.present(event, emitter).await {
            Ok(state) | Err(state) => state,
        };
        log::debug!(target: "paywall",
                    event_name = event.name.as_str();
                    "presentation finished: {:?}", terminal);
        emitter.emit(terminal);
    }

    async fn present(
        &self,
        event: &EventData,
        emitter: &mut StateEmitter,
    ) -> Result<PaywallState, Exit> {
        self.check_no_paywall_presented()?;
        let configuration = self.wait_to_present().await?;

        let selection = match self.debug_override() {
            Some(selection) => selection,
            None => self.select_by_rules(event, &configuration).await?,
        };
        let experiment_id = selection.experiment.as_ref().map(|experiment| &experiment.id);

        let request = ContentRequest {
            event: event.clone(),
            paywall_id: selection.paywall_id.clone(),
            experiment: selection.experiment.clone(),
        };
        let content = self.content.acquire_content(&request).await.map_err(|err| {
            log::warn!(target: "paywall",
                       event_name = event.name.as_str();
                       "failed to acquire paywall content: {}", err);
            failed(
                PresentationErrorKind::ContentAcquisitionFailed(err.to_string()),
                Stage::ContentAcquisition,
                experiment_id,
            )
        })?;

        let host = self.acquire_host(experiment_id).await?;

        // Re-claim single-flight atomically before confirming: another pipeline may have started
        // presenting while this one was suspended.
        let _presenting = self.single_flight.try_acquire().ok_or_else(|| {
            log::debug!(target: "paywall",
                        stage = Stage::AssignmentConfirmation.as_str();
                        "lost single-flight race");
            prevented(PreventedReason::AlreadyPresented)
        })?;

        if let Some(pending) = &selection.pending {
            self.confirm(pending, Stage::AssignmentConfirmation).await;
        }

        emitter.emit(PaywallState::Presenting(PaywallInfo {
            paywall_id: selection.paywall_id.clone(),
            experiment: selection.experiment.clone(),
        }));
        log::debug!(target: "paywall",
                    event_name = event.name.as_str(),
                    stage = Stage::Present.as_str();
                    "paywall handed to host");
        let dismissal = host.present(content).await;

        Ok(PaywallState::Presented(dismissal))
    }

    fn check_no_paywall_presented(&self) -> Result<(), Exit> {
        if self.single_flight.is_presenting() {
            log::debug!(target: "paywall",
                        stage = Stage::SingleFlight.as_str();
                        "a paywall is already presented");
            return Err(prevented(PreventedReason::AlreadyPresented));
        }
        Ok(())
    }

    async fn wait_to_present(&self) -> Result<Arc<Configuration>, Exit> {
        self.configuration_store
            .wait_for_configuration(self.readiness_timeout)
            .await
            .ok_or_else(|| {
                let timeout_ms = self.readiness_timeout.as_millis() as u64;
                log::warn!(target: "paywall",
                           timeout_ms = timeout_ms;
                           "timed out waiting for configuration");
                failed(PresentationErrorKind::ReadinessTimeout, Stage::Readiness, None)
            })
    }

    fn debug_override(&self) -> Option<Selection> {
        let paywall_id = self.debug_session.pinned_paywall()?;
        log::debug!(target: "paywall",
                    paywall_id = paywall_id.as_str(),
                    stage = Stage::DebugOverride.as_str();
                    "presenting paywall pinned by debug session");
        Some(Selection {
            paywall_id: Some(paywall_id),
            experiment: None,
            pending: None,
        })
    }

    /// Rule evaluation, entitlement gate, and holdout confirmation.
    async fn select_by_rules(
        &self,
        event: &EventData,
        configuration: &Configuration,
    ) -> Result<Selection, Exit> {
        let outcome = self
            .rule_engine
            .evaluate(event, &configuration.triggers, false)
            .await;

        let experiment = match outcome.trigger_result {
            TriggerResult::EventNotFound => {
                return Err(failed(
                    PresentationErrorKind::ConfigurationMissing,
                    Stage::RuleEvaluation,
                    None,
                ))
            }
            TriggerResult::NoRuleMatch => {
                return Err(failed(
                    PresentationErrorKind::NoRuleMatched,
                    Stage::RuleEvaluation,
                    None,
                ))
            }
            TriggerResult::Error(TriggerError::AssignmentNotFound { experiment_id }) => {
                return Err(failed(
                    PresentationErrorKind::AssignmentNotFound,
                    Stage::RuleEvaluation,
                    Some(&experiment_id),
                ))
            }
            TriggerResult::Holdout(experiment) => {
                // Holdout assignments must be recorded even though nothing is shown, otherwise
                // the experiment's control group is undercounted.
                if let Some(pending) = &outcome.confirmable_assignment {
                    self.confirm(pending, Stage::HoldoutConfirmation).await;
                }
                log::debug!(target: "paywall",
                            experiment_id = experiment.id.as_str();
                            "user is in holdout");
                return Err(PaywallState::PresentationSkipped(SkippedReason::Holdout(
                    experiment,
                )));
            }
            TriggerResult::Paywall(experiment) => experiment,
        };

        if self.entitlements.has_active_entitlement().await {
            log::debug!(target: "paywall",
                        experiment_id = experiment.id.as_str(),
                        stage = Stage::EntitlementGate.as_str();
                        "user already has an active entitlement");
            return Err(prevented(PreventedReason::UserIsSubscribed));
        }

        Ok(Selection {
            paywall_id: experiment.variant.paywall_id.clone(),
            experiment: Some(experiment),
            pending: outcome.confirmable_assignment,
        })
    }

    async fn acquire_host(
        &self,
        experiment_id: Option<&ExperimentId>,
    ) -> Result<Arc<dyn Host>, Exit> {
        let host = match self.hosting_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.hosting.acquire_host())
                .await
                .map_err(|_| {
                    log::warn!(target: "paywall",
                               stage = Stage::HostingAcquisition.as_str();
                               "timed out acquiring hosting context");
                    failed(
                        PresentationErrorKind::HostingUnavailable,
                        Stage::HostingAcquisition,
                        experiment_id,
                    )
                })?,
            None => self.hosting.acquire_host().await,
        };

        host.ok_or_else(|| {
            log::debug!(target: "paywall",
                        stage = Stage::HostingAcquisition.as_str();
                        "no hosting context available");
            prevented(PreventedReason::NoHostingContext)
        })
    }

    async fn confirm(&self, pending: &ConfirmableAssignment, stage: Stage) {
        if let Err(err) = self.assignments.confirm(pending).await {
            log::warn!(target: "paywall",
                       experiment_id = pending.experiment_id.as_str(),
                       stage = stage.as_str();
                       "failed to persist confirmed assignment: {:?}", err);
        }
    }
}
