//! Actions flowing through the pipeline.
//!
//! An action is a type label plus arbitrary JSON fields. It serializes as a
//! flat object, `{"type": "DEC", ...}`, the same shape a store's reducer
//! and the monitor trace use.
//!
//! Actions are never mutated once constructed; a phase that wants a
//! different action builds a new one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{KyroResult, ValidationError};

/// A tagged message describing an intended state transition.
///
/// # Examples
///
/// ```
/// use kyrologic::Action;
///
/// let action = Action::new("ADD").with_field("payload", 3);
/// assert_eq!(action.action_type(), "ADD");
/// assert_eq!(action.payload(), Some(&serde_json::json!(3)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    action_type: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Action {
    /// Creates an action with no fields besides its type.
    #[must_use]
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            fields: Map::new(),
        }
    }

    /// Returns a copy of this action with `key` set to `value`.
    ///
    /// `"type"` is reserved for the label and is ignored here.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "type" {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Parses an action from a JSON object carrying a string `type`.
    pub fn from_value(value: Value) -> KyroResult<Self> {
        let Value::Object(mut fields) = value else {
            return Err(ValidationError::InvalidAction {
                reason: "action must be a JSON object".to_string(),
            }
            .into());
        };

        let action_type = match fields.remove("type") {
            Some(Value::String(t)) if !t.is_empty() => t,
            Some(Value::String(_)) | None => return Err(ValidationError::MissingActionType.into()),
            Some(other) => {
                return Err(ValidationError::InvalidAction {
                    reason: format!("type label must be a string, got {other}"),
                }
                .into())
            }
        };

        Ok(Self { action_type, fields })
    }

    /// The type label.
    #[must_use]
    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    /// True when the action can enter the pipeline (non-empty type label).
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.action_type.trim().is_empty()
    }

    /// The conventional `payload` field, if present.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        self.fields.get("payload")
    }

    /// Looks up an arbitrary field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All fields except the type label.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The action as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut obj = self.fields.clone();
        obj.insert("type".to_string(), Value::String(self.action_type.clone()));
        Value::Object(obj)
    }
}

impl From<&str> for Action {
    fn from(action_type: &str) -> Self {
        Self::new(action_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_serializes_flat() {
        let action = Action::new("DEC").with_field("payload", json!({"by": 2}));
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v, json!({"type": "DEC", "payload": {"by": 2}}));
    }

    #[test]
    fn test_action_roundtrip_through_value() {
        let v = json!({"type": "ADD", "payload": 1, "meta": "x"});
        let action = Action::from_value(v.clone()).unwrap();
        assert_eq!(action.action_type(), "ADD");
        assert_eq!(action.field("meta"), Some(&json!("x")));
        assert_eq!(action.to_value(), v);
    }

    #[test]
    fn test_from_value_requires_type() {
        let err = Action::from_value(json!({"payload": 1})).unwrap_err();
        assert!(matches!(
            err,
            crate::KyroError::Validation(ValidationError::MissingActionType)
        ));

        let err = Action::from_value(json!({"type": ""})).unwrap_err();
        assert!(err.is_validation());

        let err = Action::from_value(json!({"type": 7})).unwrap_err();
        assert!(matches!(
            err,
            crate::KyroError::Validation(ValidationError::InvalidAction { .. })
        ));

        assert!(Action::from_value(json!("DEC")).is_err());
    }

    #[test]
    fn test_with_field_ignores_type_key() {
        let action = Action::new("A").with_field("type", "B");
        assert_eq!(action.action_type(), "A");
        assert!(action.fields().is_empty());
    }

    #[test]
    fn test_well_formed() {
        assert!(Action::new("X").is_well_formed());
        assert!(!Action::new("").is_well_formed());
        assert!(!Action::new("  ").is_well_formed());
    }
}
