//! Error types for field cleaning

use serde_json::Value;
use thiserror::Error;

use super::path::{FieldPath, PathSegment};

/// A raw value could not be cast into any plausible value of a field's type.
///
/// Distinct from a validation failure: the value is not merely out of range,
/// it has the wrong shape entirely (an object handed to a string field).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot coerce value at '{path}' into {expected}: found {found}")]
pub struct CoercionFailure {
    pub path: FieldPath,
    pub expected: &'static str,
    pub found: String,
}

impl CoercionFailure {
    pub fn new(expected: &'static str, value: &Value) -> Self {
        Self {
            path: FieldPath::new(),
            expected,
            found: describe(value),
        }
    }

    /// Re-anchor the failure one level further up the schema.
    pub fn within(mut self, segment: impl Into<PathSegment>) -> Self {
        self.path.prepend(segment);
        self
    }
}

/// Short human-readable description of a JSON value used in messages.
pub(crate) fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) if s.chars().count() > 40 => {
            format!("string \"{}...\"", s.chars().take(40).collect::<String>())
        }
        Value::String(s) => format!("string \"{s}\""),
        Value::Array(a) => format!("array of {} elements", a.len()),
        Value::Object(o) => format!("object with {} keys", o.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_within_builds_dotted_path() {
        let failure = CoercionFailure::new("string", &json!({"a": 1}))
            .within("name")
            .within("details");
        assert_eq!(failure.path.to_dotted(), "details.name");
        assert_eq!(
            failure.to_string(),
            "cannot coerce value at 'details.name' into string: found object with 1 keys"
        );
    }
}
