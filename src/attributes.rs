use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Type alias for a HashMap representing key-value pairs of attributes.
///
/// Keys are dotted attribute paths such as `user.plan`, `device.appVersion`, or
/// `params.source`.
///
/// # Examples
/// ```
/// # use paywall::{Attributes, AttributeValue};
/// let attributes = [
///     ("user.age".to_owned(), 30.0.into()),
///     ("user.isTrialing".to_owned(), true.into()),
///     ("device.locale".to_owned(), "en_US".into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Enum representing possible values of an attribute.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `f64`, and `bool` types.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numerical value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A null value or absence of value.
    Null,
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// An application event that may fire a trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    /// Event name. Used to look up the trigger.
    pub name: String,
    /// Event parameters, exposed to predicates under the `params.` prefix.
    #[serde(default)]
    pub parameters: Attributes,
}

impl EventData {
    pub fn new(name: impl Into<String>) -> EventData {
        EventData {
            name: name.into(),
            parameters: Attributes::new(),
        }
    }

    pub fn with_parameter(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> EventData {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Supplies computed user and device attributes for predicate evaluation.
pub trait AttributesProvider: Send + Sync {
    /// Current attributes. Keys should already carry their namespace (e.g. `user.plan`).
    fn attributes(&self) -> Attributes;
}

impl AttributesProvider for Attributes {
    fn attributes(&self) -> Attributes {
        self.clone()
    }
}

/// Provider that has no attributes.
pub(crate) struct NoAttributes;
impl AttributesProvider for NoAttributes {
    fn attributes(&self) -> Attributes {
        Attributes::new()
    }
}

/// Merge provider attributes with event parameters. Event parameters are placed under the
/// `params.` prefix and never shadow provider attributes.
pub(crate) fn attributes_for_event(
    provider: &dyn AttributesProvider,
    event: &EventData,
) -> Attributes {
    let mut attributes = provider.attributes();
    attributes.reserve(event.parameters.len());
    for (key, value) in &event.parameters {
        attributes
            .entry(format!("params.{key}"))
            .or_insert_with(|| value.clone());
    }
    attributes
}

#[cfg(test)]
mod tests {
    use super::{attributes_for_event, AttributeValue, Attributes, EventData};

    #[test]
    fn event_parameters_are_prefixed() {
        let provider: Attributes = [("user.plan".to_owned(), "free".into())].into();
        let event = EventData::new("app_open").with_parameter("source", "push");

        let attributes = attributes_for_event(&provider, &event);

        assert_eq!(attributes.get("user.plan"), Some(&AttributeValue::from("free")));
        assert_eq!(attributes.get("params.source"), Some(&AttributeValue::from("push")));
        assert_eq!(attributes.get("source"), None);
    }

    #[test]
    fn deserializes_untagged_values() {
        let attributes: Attributes =
            serde_json::from_str(r#"{"a": "x", "b": 1.5, "c": true, "d": null}"#).unwrap();
        assert_eq!(attributes["a"], AttributeValue::from("x"));
        assert_eq!(attributes["b"], AttributeValue::from(1.5));
        assert_eq!(attributes["c"], AttributeValue::from(true));
        assert_eq!(attributes["d"], AttributeValue::Null);
    }
}
