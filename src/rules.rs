use regex::Regex;
use semver::Version;

use crate::{
    models::{Condition, ConditionOperator, ConditionValue, Predicate, Value},
    AttributeValue, Attributes,
};

impl Predicate {
    pub(crate) fn eval(&self, attributes: &Attributes) -> bool {
        self.conditions
            .iter()
            .all(|condition| condition.eval(attributes))
    }
}

impl Condition {
    fn eval(&self, attributes: &Attributes) -> bool {
        self.operator
            .eval(attributes.get(&self.attribute), &self.value)
    }
}

impl ConditionOperator {
    /// Applying `Operator` to the values. Returns `false` if the operator cannot be applied or
    /// there's a misconfiguration.
    fn eval(&self, attribute: Option<&AttributeValue>, condition_value: &ConditionValue) -> bool {
        self.try_eval(attribute, condition_value).unwrap_or(false)
    }

    /// Try applying `Operator` to the values, returning `None` if the operator cannot be applied.
    fn try_eval(
        &self,
        attribute: Option<&AttributeValue>,
        condition_value: &ConditionValue,
    ) -> Option<bool> {
        match self {
            Self::Matches | Self::NotMatches => {
                let s = match attribute {
                    Some(AttributeValue::String(s)) => s,
                    _ => return None,
                };
                let regex = match condition_value {
                    ConditionValue::Single(Value::String(s)) => Regex::new(s).ok()?,
                    _ => return None,
                };
                let matches = regex.is_match(s);
                Some(matches == (*self == Self::Matches))
            }

            Self::OneOf | Self::NotOneOf => {
                let s = attribute.and_then(to_comparable_string)?;
                let values = match condition_value {
                    ConditionValue::Multiple(v) => v,
                    _ => return None,
                };
                let is_one_of = values.iter().any(|v| value_to_string(v) == s);
                Some(is_one_of == (*self == Self::OneOf))
            }

            Self::Equals | Self::NotEquals => {
                let attribute = attribute?;
                let ConditionValue::Single(expected) = condition_value else {
                    return None;
                };
                let equal = match (attribute, expected) {
                    (AttributeValue::String(a), Value::String(b)) => a == b,
                    (AttributeValue::Number(a), Value::Number(b)) => a == b,
                    (AttributeValue::Boolean(a), Value::Boolean(b)) => a == b,
                    (AttributeValue::Null, _) => false,
                    // Mixed types compare by their string form ("1" == 1.0 is false, "true" ==
                    // true is true).
                    (a, b) => to_comparable_string(a)? == value_to_string(b),
                };
                Some(equal == (*self == Self::Equals))
            }

            Self::IsNull => {
                let is_null = attribute.is_none() || attribute == Some(&AttributeValue::Null);
                let ConditionValue::Single(Value::Boolean(expected_null)) = condition_value else {
                    return None;
                };
                Some(is_null == *expected_null)
            }

            Self::Gte | Self::Gt | Self::Lte | Self::Lt => {
                let condition_version = match condition_value {
                    ConditionValue::Single(Value::String(s)) => Version::parse(s).ok(),
                    _ => None,
                };

                if let Some(condition_version) = condition_version {
                    // semver comparison

                    let attribute_version = match attribute {
                        Some(AttributeValue::String(s)) => Version::parse(s).ok(),
                        _ => None,
                    }?;

                    Some(self.compare(attribute_version.cmp(&condition_version)))
                } else {
                    // numeric comparison
                    let condition_value = match condition_value {
                        ConditionValue::Single(Value::Number(n)) => *n,
                        ConditionValue::Single(Value::String(s)) => s.parse().ok()?,
                        _ => return None,
                    };

                    let attribute_value = match attribute {
                        Some(AttributeValue::Number(n)) => *n,
                        Some(AttributeValue::String(s)) => s.parse().ok()?,
                        _ => return None,
                    };

                    Some(self.compare(attribute_value.partial_cmp(&condition_value)?))
                }
            }
        }
    }

    fn compare(&self, ordering: std::cmp::Ordering) -> bool {
        match self {
            Self::Gt => ordering.is_gt(),
            Self::Gte => ordering.is_ge(),
            Self::Lt => ordering.is_lt(),
            Self::Lte => ordering.is_le(),
            _ => false,
        }
    }
}

fn to_comparable_string(value: &AttributeValue) -> Option<String> {
    match value {
        AttributeValue::String(s) => Some(s.clone()),
        AttributeValue::Number(n) => Some(n.to_string()),
        AttributeValue::Boolean(b) => Some(b.to_string()),
        AttributeValue::Null => None,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Boolean(b) => b.to_string(),
    }
}
