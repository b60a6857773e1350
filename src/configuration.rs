use std::collections::HashMap;

use rand::Rng;

use crate::models::{Assignments, ConfigResponse, Trigger, TryParse, VariantOption};

/// Trigger configuration keyed by event name.
pub type Triggers = HashMap<String, Trigger>;

/// Remote configuration relevant to paywall decisions.
///
/// `Configuration` is immutable and is only ever replaced completely.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    pub triggers: Triggers,
}

impl Configuration {
    /// Build configuration from a configuration sync payload. Triggers that failed to parse are
    /// skipped (and logged). If two triggers share an event name, the last one wins.
    pub fn from_response(response: ConfigResponse) -> Configuration {
        let mut triggers = Triggers::with_capacity(response.triggers.len());
        for trigger in response.triggers {
            match trigger {
                TryParse::Parsed(trigger) => {
                    triggers.insert(trigger.event_name.clone(), trigger);
                }
                TryParse::ParseFailed(json) => {
                    log::warn!(target: "paywall",
                               trigger:serde = json;
                               "skipping trigger that failed to parse");
                }
            }
        }
        Configuration { triggers }
    }

    pub fn from_triggers(triggers: impl IntoIterator<Item = Trigger>) -> Configuration {
        Configuration {
            triggers: triggers
                .into_iter()
                .map(|trigger| (trigger.event_name.clone(), trigger))
                .collect(),
        }
    }

    /// Choose a candidate variant for every experiment referenced by a trigger rule that is not
    /// in `confirmed`.
    pub fn choose_unconfirmed_assignments(
        &self,
        confirmed: &Assignments,
        rng: &mut impl Rng,
    ) -> Assignments {
        let mut assignments = Assignments::new();
        for rule in self.triggers.values().flat_map(|trigger| &trigger.rules) {
            let experiment = &rule.experiment;
            if confirmed.contains_key(&experiment.id) || assignments.contains_key(&experiment.id) {
                continue;
            }
            match choose_variant(&experiment.variants, rng) {
                Some(variant) => {
                    assignments.insert(experiment.id.clone(), variant.to_variant());
                }
                None => {
                    log::warn!(target: "paywall",
                               experiment_id = experiment.id.as_str();
                               "experiment has no variants to choose from");
                }
            }
        }
        assignments
    }
}

/// Weighted random choice by `percentage`. If no variant carries any weight, the choice is
/// uniform.
fn choose_variant<'a>(
    variants: &'a [VariantOption],
    rng: &mut impl Rng,
) -> Option<&'a VariantOption> {
    if variants.is_empty() {
        return None;
    }

    let total: u64 = variants.iter().map(|v| u64::from(v.percentage)).sum();
    if total == 0 {
        return variants.get(rng.gen_range(0..variants.len()));
    }

    let mut pick = rng.gen_range(0..total);
    for variant in variants {
        let weight = u64::from(variant.percentage);
        if pick < weight {
            return Some(variant);
        }
        pick -= weight;
    }
    variants.last()
}
