use std::sync::Arc;

use chrono::Utc;

use crate::{
    attributes::{attributes_for_event, AttributesProvider},
    models::{TriggerRule, TryParse},
    occurrences::OccurrenceStore,
    EventData,
};

/// Evaluates a single trigger rule against an event.
pub(crate) struct ExpressionEvaluator {
    attributes: Arc<dyn AttributesProvider>,
    occurrences: Arc<OccurrenceStore>,
}

impl ExpressionEvaluator {
    pub(crate) fn new(
        attributes: Arc<dyn AttributesProvider>,
        occurrences: Arc<OccurrenceStore>,
    ) -> ExpressionEvaluator {
        ExpressionEvaluator {
            attributes,
            occurrences,
        }
    }

    /// Returns `true` if `rule` matches `event`.
    ///
    /// A matching rule with a frequency cap records one occurrence, unless `is_preemptive` is
    /// set. Preemptive evaluation never writes anything. A malformed expression never matches.
    pub(crate) async fn matches(
        &self,
        rule: &TriggerRule,
        event: &EventData,
        is_preemptive: bool,
    ) -> bool {
        let expression_holds = match &rule.expression {
            None => true,
            Some(TryParse::Parsed(predicate)) => {
                let attributes = attributes_for_event(&*self.attributes, event);
                predicate.eval(&attributes)
            }
            Some(TryParse::ParseFailed(expression)) => {
                log::warn!(target: "paywall",
                           event_name = event.name.as_str(),
                           experiment_id = rule.experiment.id.as_str(),
                           expression:serde = expression;
                           "skipping rule with malformed expression");
                false
            }
        };
        if !expression_holds {
            return false;
        }

        let Some(occurrence) = &rule.occurrence else {
            return true;
        };

        let now = Utc::now();
        if is_preemptive {
            return self.occurrences.count(occurrence, now) < occurrence.max_count as usize;
        }

        let recorded = match self.occurrences.try_record(occurrence, now).await {
            Ok(recorded) => recorded,
            Err(err) => {
                // Recorded in memory, only persisting failed.
                log::warn!(target: "paywall",
                           occurrence_key = occurrence.key.as_str();
                           "failed to persist rule occurrence: {:?}", err);
                true
            }
        };
        if !recorded {
            log::trace!(target: "paywall",
                        occurrence_key = occurrence.key.as_str(),
                        max_count = occurrence.max_count;
                        "rule occurrence limit reached");
        }
        recorded
    }
}
