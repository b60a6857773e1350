use std::sync::Arc;

use crate::{
    assignment_store::{AssignmentLookup, AssignmentStore, ConfirmableAssignment},
    configuration::Triggers,
    expression_evaluator::ExpressionEvaluator,
    models::{Experiment, ExperimentId, Trigger, TriggerRule, VariantType},
    EventData,
};

/// Result of evaluating an event against the trigger configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerResult {
    /// No trigger is configured for the event.
    EventNotFound,
    /// A trigger exists but none of its rules matched.
    NoRuleMatch,
    /// The user is in the holdout arm of the experiment.
    Holdout(Experiment),
    /// The user should see the experiment's paywall.
    Paywall(Experiment),
    /// A rule matched but its outcome could not be resolved.
    Error(TriggerError),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    /// The matched rule's experiment has neither a confirmed nor an unconfirmed assignment.
    #[error("there isn't a paywall configured to show in this context (experiment {experiment_id:?})")]
    AssignmentNotFound { experiment_id: ExperimentId },
}

/// Outcome of rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Set if the variant came from the unconfirmed map and still needs to be confirmed.
    pub confirmable_assignment: Option<ConfirmableAssignment>,
    pub trigger_result: TriggerResult,
}

impl Outcome {
    fn without_assignment(trigger_result: TriggerResult) -> Outcome {
        Outcome {
            confirmable_assignment: None,
            trigger_result,
        }
    }
}

/// Maps events to experiment outcomes. `RuleEngine` never writes confirmed assignments.
pub struct RuleEngine {
    evaluator: ExpressionEvaluator,
    assignments: Arc<AssignmentStore>,
}

impl RuleEngine {
    pub(crate) fn new(
        evaluator: ExpressionEvaluator,
        assignments: Arc<AssignmentStore>,
    ) -> RuleEngine {
        RuleEngine {
            evaluator,
            assignments,
        }
    }

    /// Determine the outcome of `event` under `triggers`.
    ///
    /// Finds the trigger for the event name, picks the first matching rule, then resolves the
    /// rule's experiment from confirmed assignments, falling back to unconfirmed ones. Only an
    /// unconfirmed resolution produces a [`ConfirmableAssignment`].
    ///
    /// `is_preemptive` only controls side effects of rule matching (occurrence counting). It
    /// never changes which rule matches.
    pub async fn evaluate(
        &self,
        event: &EventData,
        triggers: &Triggers,
        is_preemptive: bool,
    ) -> Outcome {
        let Some(trigger) = triggers.get(&event.name) else {
            log::trace!(target: "paywall",
                        event_name = event.name.as_str();
                        "no trigger for event");
            return Outcome::without_assignment(TriggerResult::EventNotFound);
        };

        let Some(rule) = self.find_matching_rule(event, trigger, is_preemptive).await else {
            log::trace!(target: "paywall", event_name = event.name.as_str(); "no rule matched");
            return Outcome::without_assignment(TriggerResult::NoRuleMatch);
        };

        let experiment_id = &rule.experiment.id;
        let (variant, confirmable_assignment) = match self.assignments.lookup(experiment_id) {
            Some(AssignmentLookup::Confirmed(variant)) => (variant, None),
            Some(AssignmentLookup::Unconfirmed(variant)) => {
                let assignment = ConfirmableAssignment {
                    experiment_id: experiment_id.clone(),
                    variant: variant.clone(),
                };
                (variant, Some(assignment))
            }
            None => {
                log::warn!(target: "paywall",
                           event_name = event.name.as_str(),
                           experiment_id = experiment_id.as_str();
                           "matched rule has no assignment");
                return Outcome::without_assignment(TriggerResult::Error(
                    TriggerError::AssignmentNotFound {
                        experiment_id: experiment_id.clone(),
                    },
                ));
            }
        };

        let variant_type = variant.variant_type;
        let experiment = Experiment {
            id: experiment_id.clone(),
            group_id: rule.experiment.group_id.clone(),
            variant,
        };

        log::trace!(target: "paywall",
                    event_name = event.name.as_str(),
                    experiment_id = experiment.id.as_str(),
                    variant_id = experiment.variant.id.as_str(),
                    pending = confirmable_assignment.is_some();
                    "evaluated rules");

        Outcome {
            confirmable_assignment,
            trigger_result: match variant_type {
                VariantType::Holdout => TriggerResult::Holdout(experiment),
                VariantType::Treatment => TriggerResult::Paywall(experiment),
            },
        }
    }

    async fn find_matching_rule<'a>(
        &self,
        event: &EventData,
        trigger: &'a Trigger,
        is_preemptive: bool,
    ) -> Option<&'a TriggerRule> {
        for rule in &trigger.rules {
            if self.evaluator.matches(rule, event, is_preemptive).await {
                return Some(rule);
            }
        }
        None
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::{RuleEngine, TriggerError, TriggerResult};
    use crate::{
        assignment_store::{AssignmentStore, ConfirmableAssignment},
        configuration::Triggers,
        expression_evaluator::ExpressionEvaluator,
        models::{
            Assignments, Condition, ConditionOperator, Experiment, OccurrenceInterval, Predicate,
            RawExperiment, Trigger, TriggerRule, TriggerRuleOccurrence, TryParse, Variant,
        },
        occurrences::OccurrenceStore,
        storage::{DurableStore, InMemoryStore},
        Attributes, Configuration, EventData,
    };

    pub(crate) fn always_rule(experiment_id: &str) -> TriggerRule {
        TriggerRule {
            experiment: RawExperiment {
                id: experiment_id.to_owned(),
                group_id: format!("{experiment_id}_group"),
                variants: vec![],
            },
            expression: None,
            occurrence: None,
        }
    }

    pub(crate) fn never_rule(experiment_id: &str) -> TriggerRule {
        TriggerRule {
            expression: Some(TryParse::Parsed(Predicate {
                conditions: vec![Condition {
                    attribute: "user.missing".to_owned(),
                    operator: ConditionOperator::IsNull,
                    value: false.into(),
                }],
            })),
            ..always_rule(experiment_id)
        }
    }

    pub(crate) fn triggers(event_name: &str, rules: Vec<TriggerRule>) -> Triggers {
        Configuration::from_triggers([Trigger {
            event_name: event_name.to_owned(),
            rules,
        }])
        .triggers
    }

    struct Fixture {
        engine: RuleEngine,
        assignments: Arc<AssignmentStore>,
        occurrences: Arc<OccurrenceStore>,
    }

    async fn fixture() -> Fixture {
        let durable: Arc<dyn DurableStore> = Arc::new(InMemoryStore::new());
        let assignments = Arc::new(AssignmentStore::load(durable.clone()).await.unwrap());
        let occurrences = Arc::new(OccurrenceStore::load(durable).await.unwrap());
        let evaluator = ExpressionEvaluator::new(Arc::new(Attributes::new()), occurrences.clone());
        Fixture {
            engine: RuleEngine::new(evaluator, assignments.clone()),
            assignments,
            occurrences,
        }
    }

    #[tokio::test]
    async fn event_not_found() {
        let f = fixture().await;
        let outcome = f
            .engine
            .evaluate(&EventData::new("checkout"), &triggers("app_open", vec![]), false)
            .await;
        assert_eq!(outcome.trigger_result, TriggerResult::EventNotFound);
        assert_eq!(outcome.confirmable_assignment, None);
    }

    #[tokio::test]
    async fn no_rule_match() {
        let f = fixture().await;
        let outcome = f
            .engine
            .evaluate(
                &EventData::new("app_open"),
                &triggers("app_open", vec![never_rule("exp1")]),
                false,
            )
            .await;
        assert_eq!(outcome.trigger_result, TriggerResult::NoRuleMatch);
    }

    #[tokio::test]
    async fn holdout_from_unconfirmed_assignment() {
        let f = fixture().await;
        f.assignments.replace_unconfirmed(Assignments::from([(
            "exp1".to_owned(),
            Variant::holdout("holdout"),
        )]));

        let outcome = f
            .engine
            .evaluate(
                &EventData::new("app_open"),
                &triggers("app_open", vec![always_rule("exp1")]),
                false,
            )
            .await;

        assert_eq!(
            outcome.confirmable_assignment,
            Some(ConfirmableAssignment {
                experiment_id: "exp1".to_owned(),
                variant: Variant::holdout("holdout"),
            })
        );
        assert_eq!(
            outcome.trigger_result,
            TriggerResult::Holdout(Experiment {
                id: "exp1".to_owned(),
                group_id: "exp1_group".to_owned(),
                variant: Variant::holdout("holdout"),
            })
        );
    }

    #[tokio::test]
    async fn first_match_wins() {
        let f = fixture().await;
        f.assignments.replace_unconfirmed(Assignments::from([
            ("exp1".to_owned(), Variant::treatment("v1", "pw1")),
            ("exp2".to_owned(), Variant::treatment("v2", "pw2")),
            ("exp3".to_owned(), Variant::treatment("v3", "pw3")),
        ]));
        let triggers = triggers(
            "app_open",
            vec![never_rule("exp1"), always_rule("exp2"), always_rule("exp3")],
        );

        let outcome = f
            .engine
            .evaluate(&EventData::new("app_open"), &triggers, false)
            .await;

        let TriggerResult::Paywall(experiment) = outcome.trigger_result else {
            panic!("expected paywall result");
        };
        assert_eq!(experiment.id, "exp2");
        assert_eq!(experiment.variant, Variant::treatment("v2", "pw2"));
    }

    #[tokio::test]
    async fn confirmed_overrides_unconfirmed() {
        let f = fixture().await;
        f.assignments
            .confirm(&ConfirmableAssignment {
                experiment_id: "exp1".to_owned(),
                variant: Variant::treatment("confirmed", "pw"),
            })
            .await
            .unwrap();
        f.assignments.replace_unconfirmed(Assignments::from([(
            "exp1".to_owned(),
            Variant::holdout("unconfirmed"),
        )]));

        let outcome = f
            .engine
            .evaluate(
                &EventData::new("app_open"),
                &triggers("app_open", vec![always_rule("exp1")]),
                false,
            )
            .await;

        assert_eq!(outcome.confirmable_assignment, None);
        assert!(matches!(
            outcome.trigger_result,
            TriggerResult::Paywall(Experiment { ref variant, .. }) if variant.id == "confirmed"
        ));
    }

    #[tokio::test]
    async fn missing_assignment_is_not_found_error() {
        let f = fixture().await;
        let outcome = f
            .engine
            .evaluate(
                &EventData::new("app_open"),
                &triggers("app_open", vec![always_rule("exp1")]),
                false,
            )
            .await;
        assert_eq!(
            outcome.trigger_result,
            TriggerResult::Error(TriggerError::AssignmentNotFound {
                experiment_id: "exp1".to_owned()
            })
        );
    }

    #[tokio::test]
    async fn evaluation_is_deterministic_and_never_confirms() {
        let f = fixture().await;
        f.assignments.replace_unconfirmed(Assignments::from([(
            "exp1".to_owned(),
            Variant::treatment("v1", "pw1"),
        )]));
        let triggers = triggers("app_open", vec![always_rule("exp1")]);

        let first = f
            .engine
            .evaluate(&EventData::new("app_open"), &triggers, false)
            .await;
        for _ in 0..5 {
            let again = f
                .engine
                .evaluate(&EventData::new("app_open"), &triggers, false)
                .await;
            assert_eq!(again, first);
        }
        assert!(f.assignments.confirmed_assignments().is_empty());
    }

    #[tokio::test]
    async fn preemptive_evaluation_keeps_counters() {
        let f = fixture().await;
        f.assignments.replace_unconfirmed(Assignments::from([(
            "exp1".to_owned(),
            Variant::treatment("v1", "pw1"),
        )]));
        let occurrence = TriggerRuleOccurrence {
            key: "exp1_cap".to_owned(),
            max_count: 10,
            interval: OccurrenceInterval::Infinity,
        };
        let triggers = triggers(
            "app_open",
            vec![TriggerRule {
                occurrence: Some(occurrence.clone()),
                ..always_rule("exp1")
            }],
        );

        for _ in 0..3 {
            f.engine
                .evaluate(&EventData::new("app_open"), &triggers, true)
                .await;
        }
        assert_eq!(f.occurrences.count(&occurrence, chrono::Utc::now()), 0);

        f.engine
            .evaluate(&EventData::new("app_open"), &triggers, false)
            .await;
        assert_eq!(f.occurrences.count(&occurrence, chrono::Utc::now()), 1);
    }
}
