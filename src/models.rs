//! Trigger configuration as delivered by configuration sync, and the experiment types derived
//! from it.
use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Experiment identifier.
pub type ExperimentId = String;

/// Configuration payload as produced by configuration sync.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    /// Triggers configuration.
    ///
    /// Each trigger is wrapped in `TryParse` so that if we fail to parse one trigger (e.g., new
    /// server format), other triggers are still usable.
    #[serde(default)]
    pub triggers: Vec<TryParse<Trigger>>,
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(serde_json::Value),
}
impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}
impl<'a, T> From<&'a TryParse<T>> for Option<&'a T> {
    fn from(value: &TryParse<T>) -> Option<&T> {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// A named rule set bound to an event name.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    /// Name of the event that fires this trigger.
    pub event_name: String,
    /// Rules in evaluation order. The first matching rule wins.
    pub rules: Vec<TriggerRule>,
}

/// A predicate bound to an experiment.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRule {
    pub experiment: RawExperiment,
    /// Predicate over event and user attributes. `None` always holds.
    #[serde(default)]
    pub expression: Option<TryParse<Predicate>>,
    /// Frequency cap for this rule.
    #[serde(default)]
    pub occurrence: Option<TriggerRuleOccurrence>,
}

/// A conjunction of conditions. An empty predicate holds.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, From)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub attribute: String,
    pub operator: ConditionOperator,
    pub value: ConditionValue,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionOperator {
    Matches,
    NotMatches,
    Gte,
    Gt,
    Lte,
    Lt,
    OneOf,
    NotOneOf,
    IsNull,
    Equals,
    NotEquals,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ConditionValue {
    /// List operand of `ONE_OF` / `NOT_ONE_OF`. Elements may mix strings, numbers, and booleans;
    /// they are compared by string form.
    Multiple(Vec<Value>),
    Single(Value),
}

impl<T: Into<Value>> From<T> for ConditionValue {
    fn from(value: T) -> Self {
        Self::Single(value.into())
    }
}
impl From<Vec<String>> for ConditionValue {
    fn from(value: Vec<String>) -> Self {
        Self::Multiple(value.into_iter().map(Value::String).collect())
    }
}
impl From<Vec<&str>> for ConditionValue {
    fn from(value: Vec<&str>) -> Self {
        Self::Multiple(value.into_iter().map(Value::from).collect())
    }
}
impl From<Vec<f64>> for ConditionValue {
    fn from(value: Vec<f64>) -> Self {
        Self::Multiple(value.into_iter().map(Value::Number).collect())
    }
}

/// A scalar condition value.
#[derive(Debug, Serialize, Deserialize, PartialEq, From, Clone)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Number(f64),
    String(String),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Limits how many times a rule may match within an interval.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRuleOccurrence {
    /// Counter key. Rules sharing a key share a counter.
    pub key: String,
    pub max_count: u32,
    pub interval: OccurrenceInterval,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OccurrenceInterval {
    /// Count every occurrence ever recorded.
    Infinity,
    /// Count occurrences recorded within the last `n` minutes.
    Minutes(u32),
}

/// Experiment reference as it appears in a rule.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawExperiment {
    pub id: ExperimentId,
    pub group_id: String,
    /// Candidate variants with their traffic percentage. Used to choose unconfirmed
    /// assignments.
    #[serde(default)]
    pub variants: Vec<VariantOption>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariantOption {
    pub id: String,
    #[serde(rename = "type")]
    pub variant_type: VariantType,
    #[serde(default)]
    pub paywall_id: Option<String>,
    #[serde(default)]
    pub percentage: u32,
}

impl VariantOption {
    pub fn to_variant(&self) -> Variant {
        Variant {
            id: self.id.clone(),
            variant_type: self.variant_type,
            paywall_id: self.paywall_id.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VariantType {
    /// Withhold treatment. Holdout variants never acquire paywall content.
    Holdout,
    /// Show a paywall.
    Treatment,
}

/// One arm of an experiment.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    #[serde(rename = "type")]
    pub variant_type: VariantType,
    #[serde(default)]
    pub paywall_id: Option<String>,
}

impl Variant {
    pub fn holdout(id: impl Into<String>) -> Variant {
        Variant {
            id: id.into(),
            variant_type: VariantType::Holdout,
            paywall_id: None,
        }
    }

    pub fn treatment(id: impl Into<String>, paywall_id: impl Into<String>) -> Variant {
        Variant {
            id: id.into(),
            variant_type: VariantType::Treatment,
            paywall_id: Some(paywall_id.into()),
        }
    }
}

/// Experiment with a resolved variant.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: ExperimentId,
    pub group_id: String,
    pub variant: Variant,
}

/// Confirmed or unconfirmed assignments keyed by experiment id.
pub type Assignments = HashMap<ExperimentId, Variant>;

#[cfg(test)]
mod tests {
    use super::{
        ConditionOperator, ConditionValue, ConfigResponse, OccurrenceInterval, Trigger, TryParse,
        Value, VariantType,
    };

    #[test]
    fn parse_partially_if_unexpected() {
        let config: ConfigResponse = serde_json::from_str(
            r#"
              {
                "triggers": [
                  {
                    "eventName": "success",
                    "rules": []
                  },
                  {
                    "eventName": "fail_parsing",
                    "rules": [{ "experiment": { "id": 1 } }]
                  }
                ]
              }
            "#,
        )
        .unwrap();
        assert!(matches!(config.triggers[0], TryParse::Parsed(_)));
        assert!(matches!(config.triggers[1], TryParse::ParseFailed(_)));
    }

    #[test]
    fn malformed_expression_is_isolated_to_the_rule() {
        let config: ConfigResponse = serde_json::from_str(
            r#"
              {
                "triggers": [{
                  "eventName": "app_open",
                  "rules": [{
                    "experiment": { "id": "exp1", "groupId": "g1" },
                    "expression": { "conditions": [{ "attribute": "x", "operator": "NEW_OPERATOR", "value": 1 }] }
                  }]
                }]
              }
            "#,
        )
        .unwrap();
        let TryParse::Parsed(trigger) = &config.triggers[0] else {
            panic!("trigger should parse");
        };
        assert!(matches!(
            trigger.rules[0].expression,
            Some(TryParse::ParseFailed(_))
        ));
    }

    #[test]
    fn parse_numeric_one_of_list() {
        let value: ConditionValue = serde_json::from_str(r#"[1, "two", true]"#).unwrap();
        assert_eq!(
            value,
            ConditionValue::Multiple(vec![
                Value::Number(1.0),
                Value::String("two".to_owned()),
                Value::Boolean(true),
            ])
        );
    }

    #[test]
    fn parse_fixture() {
        let f = std::fs::File::open("tests/data/config.json")
            .expect("Failed to open tests/data/config.json");
        let config: ConfigResponse = serde_json::from_reader(std::io::BufReader::new(f)).unwrap();

        let triggers: Vec<_> = config
            .triggers
            .iter()
            .filter_map(|t| Option::<&Trigger>::from(t))
            .collect();
        assert_eq!(triggers.len(), 2);

        let campaign = triggers
            .iter()
            .find(|t| t.event_name == "campaign_trigger")
            .unwrap();
        let rule = &campaign.rules[0];
        assert_eq!(rule.experiment.variants.len(), 2);
        assert_eq!(rule.experiment.variants[0].variant_type, VariantType::Treatment);
        let Some(TryParse::Parsed(predicate)) = &rule.expression else {
            panic!("expression should parse");
        };
        assert_eq!(predicate.conditions[0].operator, ConditionOperator::OneOf);
        assert_eq!(
            rule.occurrence.as_ref().unwrap().interval,
            OccurrenceInterval::Minutes(60)
        );
    }
}
