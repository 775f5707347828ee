//! Error types for data models and embedded collections

use thiserror::Error;

use crate::fields::CoercionFailure;
use crate::validation::ValidationFailure;

/// Errors raised while constructing, validating or updating documents
#[derive(Error, Debug)]
pub enum ModelError {
    /// A raw value had the wrong shape for its field
    #[error(transparent)]
    Coercion(#[from] CoercionFailure),

    /// Data failed validation and no recovery was possible
    #[error("{model} validation errors: {failure}")]
    Validation {
        model: String,
        failure: ValidationFailure,
    },

    /// An embedded record could not be constructed in strict mode
    #[error("failed to construct {model} '{id}' in field '{field}': {source}")]
    Construction {
        model: String,
        field: String,
        id: String,
        #[source]
        source: Box<ModelError>,
    },

    /// A migration hook failed
    #[error("migration of {model} failed: {source}")]
    Migration {
        model: String,
        #[source]
        source: anyhow::Error,
    },

    /// No field is declared at the given path
    #[error("{model} has no field '{path}'")]
    UnknownField { model: String, path: String },

    /// The field at the given path is not an embedded collection
    #[error("field '{path}' is not an embedded collection")]
    NotACollection { path: String },

    /// The collection sits inside an embedded model or array
    #[error("collection '{path}' is nested in an embedded model or array")]
    NestedCollection { path: String },

    /// Strict lookup of an id that is not in the collection
    #[error("no document with id '{id}' in collection '{field}'")]
    NotFound { field: String, id: String },

    /// A record given to a collection update carried no `_id`
    #[error("record in collection '{field}' is missing an _id")]
    MissingId { field: String },

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelError {
    /// The validation failure carried by this error, if any
    pub fn failure(&self) -> Option<&ValidationFailure> {
        match self {
            Self::Validation { failure, .. } => Some(failure),
            Self::Construction { source, .. } => source.failure(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validation_message_lists_issues() {
        let mut failure = ValidationFailure::default();
        failure.add_field("hp", ValidationFailure::new("cannot be less than 0", Some(json!(-1))));
        let err = ModelError::Validation {
            model: "Actor".to_string(),
            failure,
        };
        let message = err.to_string();
        assert!(message.starts_with("Actor validation errors: 1 invalid value(s)"));
        assert!(message.contains("hp: cannot be less than 0"));
        assert!(err.failure().is_some());
    }

    #[test]
    fn test_construction_exposes_nested_failure() {
        let inner = ModelError::Validation {
            model: "Item".to_string(),
            failure: ValidationFailure::new("bad", None),
        };
        let err = ModelError::Construction {
            model: "Item".to_string(),
            field: "items".to_string(),
            id: "abc".to_string(),
            source: Box::new(inner),
        };
        assert!(err.failure().is_some());
        assert!(err.to_string().contains("items"));
    }
}
