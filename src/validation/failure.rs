//! Structured validation failure reports
//!
//! A [`ValidationFailure`] mirrors the shape of the schema that produced it:
//! nested schema failures live under `fields` keyed by child name, array and
//! collection failures live under `elements` keyed by index or id. Every
//! sibling is validated, so one report carries every problem found in a pass.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::fields::{FieldPath, PathSegment};

/// Failure of one element of an array or embedded collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementFailure {
    pub key: PathSegment,
    pub failure: ValidationFailure,
}

/// Aggregated validation failure for a value and its children
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFailure {
    /// Reason this value itself is invalid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The offending value, when it is a leaf
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_value: Option<Value>,
    /// Value substituted when fallback recovery succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Value>,
    /// The element was removed from its array during fallback recovery
    #[serde(default)]
    pub dropped: bool,
    /// Set on a failure no recovery path could fix
    #[serde(default)]
    pub unresolved: bool,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub fields: IndexMap<String, ValidationFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<ElementFailure>,
}

impl ValidationFailure {
    /// Create an unresolved leaf failure
    pub fn new(message: impl Into<String>, invalid_value: Option<Value>) -> Self {
        Self {
            message: Some(message.into()),
            invalid_value,
            unresolved: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_none() && self.fields.is_empty() && self.elements.is_empty()
    }

    /// True when this failure or any nested failure remains unrecovered
    pub fn is_unresolved(&self) -> bool {
        self.unresolved
            || self.fields.values().any(Self::is_unresolved)
            || self.elements.iter().any(|e| e.failure.is_unresolved())
    }

    pub fn add_field(&mut self, name: impl Into<String>, failure: ValidationFailure) {
        self.fields.insert(name.into(), failure);
    }

    pub fn add_element(&mut self, key: impl Into<PathSegment>, failure: ValidationFailure) {
        self.elements.push(ElementFailure {
            key: key.into(),
            failure,
        });
    }

    /// Record that `fallback` replaced the invalid value, resolving the whole subtree.
    pub fn resolve_with(&mut self, fallback: Value) {
        self.mark_resolved();
        self.fallback = Some(fallback);
    }

    /// Record that the invalid element was dropped from its container.
    pub fn mark_dropped(&mut self) {
        self.mark_resolved();
        self.dropped = true;
    }

    fn mark_resolved(&mut self) {
        self.unresolved = false;
        for failure in self.fields.values_mut() {
            failure.mark_resolved();
        }
        for element in &mut self.elements {
            element.failure.mark_resolved();
        }
    }

    /// Look up the nested failure at a dotted path, e.g. `"items.2.name"`.
    pub fn get(&self, path: &str) -> Option<&ValidationFailure> {
        let path = FieldPath::parse(path);
        let mut current = self;
        for segment in path.segments() {
            current = match segment {
                PathSegment::Field(name) => match current.fields.get(name) {
                    Some(failure) => failure,
                    None => current.element(segment)?,
                },
                PathSegment::Index(_) => current.element(segment)?,
            };
        }
        Some(current)
    }

    fn element(&self, key: &PathSegment) -> Option<&ValidationFailure> {
        self.elements
            .iter()
            .find(|e| &e.key == key)
            .map(|e| &e.failure)
    }

    /// Flatten into `dotted path -> messages`. The root renders as `""`.
    pub fn issues(&self) -> BTreeMap<String, Vec<String>> {
        let mut out = BTreeMap::new();
        self.collect(&mut FieldPath::new(), &mut out);
        out
    }

    fn collect(&self, path: &mut FieldPath, out: &mut BTreeMap<String, Vec<String>>) {
        if let Some(message) = &self.message {
            out.entry(path.to_dotted())
                .or_default()
                .push(message.clone());
        }
        for (name, failure) in &self.fields {
            path.push(name.as_str());
            failure.collect(path, out);
            path.pop();
        }
        for element in &self.elements {
            path.push(element.key.clone());
            element.failure.collect(path, out);
            path.pop();
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let issues = self.issues();
        write!(f, "{} invalid value(s)", issues.len())?;
        for (path, messages) in issues {
            let path = if path.is_empty() { "<root>".to_string() } else { path };
            for message in messages {
                write!(f, "\n  {path}: {message}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationFailure {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ValidationFailure {
        let mut items = ValidationFailure::default();
        items.add_element(1usize, {
            let mut el = ValidationFailure::default();
            el.add_field("name", ValidationFailure::new("may not be null", Some(Value::Null)));
            el
        });

        let mut root = ValidationFailure::default();
        root.add_field("hp", ValidationFailure::new("cannot be less than 0", Some(json!(-5))));
        root.add_field("items", items);
        root
    }

    #[test]
    fn test_issues_are_keyed_by_dotted_path() {
        let issues = sample().issues();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues["hp"], vec!["cannot be less than 0".to_string()]);
        assert!(issues.contains_key("items.1.name"));
    }

    #[test]
    fn test_get_by_path() {
        let failure = sample();
        assert!(failure.get("hp").is_some());
        assert!(failure.get("items.1.name").is_some());
        assert!(failure.get("items.0").is_none());
    }

    #[test]
    fn test_resolution_propagates() {
        let mut failure = sample();
        assert!(failure.is_unresolved());
        failure.fields["hp"].resolve_with(json!(10));
        assert!(failure.is_unresolved());
        failure.fields["items"].mark_dropped();
        assert!(!failure.is_unresolved());
    }

    #[test]
    fn test_display_lists_every_issue() {
        let rendered = sample().to_string();
        assert!(rendered.starts_with("2 invalid value(s)"));
        assert!(rendered.contains("hp: cannot be less than 0"));
    }
}
