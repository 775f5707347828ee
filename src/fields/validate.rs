//! Validation of cleaned values against field rules

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::clean::EMPTY_RECORD;
use super::scalar;
use super::type_data::TypeDataResolution;
use super::{ArrayOptions, Field, FieldKind, Record, SchemaField};
use crate::validation::ValidationFailure;

/// Options for validating a single field or schema
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValidateOptions {
    /// Missing keys are not reported as missing
    pub partial: bool,
    /// Replace invalid values with their initial value where that value is valid
    pub fallback: bool,
}

#[derive(Clone, Copy)]
pub(crate) struct ValidateContext<'a> {
    pub partial: bool,
    pub fallback: bool,
    pub joint: bool,
    pub root: Option<&'a Record>,
    pub siblings: &'a Record,
}

impl<'a> ValidateContext<'a> {
    pub fn new(options: &FieldValidateOptions, root: Option<&'a Record>) -> Self {
        Self {
            partial: options.partial,
            fallback: options.fallback,
            joint: !options.partial,
            root,
            siblings: root.unwrap_or(&*EMPTY_RECORD),
        }
    }
}

impl Field {
    /// Validate a cleaned value.
    ///
    /// With `fallback`, an invalid value is replaced in place by the field's
    /// initial value when that value passes validation; the returned failure
    /// then records the substitution and is no longer unresolved.
    pub fn validate(
        &self,
        value: &mut Value,
        options: &FieldValidateOptions,
        source: Option<&Record>,
    ) -> Result<(), ValidationFailure> {
        self.validate_in(value, &ValidateContext::new(options, source))
    }

    pub(crate) fn validate_in(
        &self,
        value: &mut Value,
        ctx: &ValidateContext<'_>,
    ) -> Result<(), ValidationFailure> {
        let Err(mut failure) = self.validate_value(value, ctx) else {
            return Ok(());
        };
        if ctx.fallback && failure.is_unresolved() {
            let mut candidate = self.initial_value(ctx.siblings);
            let strict = ValidateContext {
                fallback: false,
                ..*ctx
            };
            if self.validate_value(&mut candidate, &strict).is_ok() {
                *value = candidate.clone();
                failure.resolve_with(candidate);
            }
        }
        Err(failure)
    }

    fn validate_value(
        &self,
        value: &mut Value,
        ctx: &ValidateContext<'_>,
    ) -> Result<(), ValidationFailure> {
        if value.is_null() {
            if self.options.nullable || !self.options.required {
                return Ok(());
            }
            return Err(ValidationFailure::new("may not be null", Some(Value::Null)));
        }

        match &self.kind {
            FieldKind::String(options) => scalar::validate_string(value, options)?,
            FieldKind::Number(options) => scalar::validate_number(value, options)?,
            FieldKind::Boolean => scalar::validate_boolean(value)?,
            FieldKind::Color => scalar::validate_color(value)?,
            FieldKind::FilePath(options) => scalar::validate_file_path(value, options)?,
            FieldKind::Json => scalar::validate_json(value)?,
            FieldKind::Object => scalar::validate_object(value)?,
            FieldKind::DocumentId | FieldKind::ForeignDocument { .. } => {
                scalar::validate_document_id(value)?
            }
            FieldKind::Array(options) | FieldKind::Set(options) => {
                validate_elements(value, options, ctx)?
            }
            FieldKind::Schema(schema) => match &mut *value {
                Value::Object(record) => schema.validate_record(record, ctx)?,
                other => return Err(must_be_object(other)),
            },
            FieldKind::EmbeddedData(model) => match &mut *value {
                Value::Object(record) => model.validate_record(record, ctx)?,
                other => return Err(must_be_object(other)),
            },
            FieldKind::TypeData(options) => {
                let subtype = options.discriminant_in(Some(ctx.siblings), ctx.root);
                match (options.resolve(subtype), &mut *value) {
                    (TypeDataResolution::Typed { model, .. }, Value::Object(record)) => {
                        model.validate_record(record, ctx)?
                    }
                    (TypeDataResolution::Untyped, Value::Object(_)) => {}
                    (_, other) => return Err(must_be_object(other)),
                }
            }
            FieldKind::EmbeddedCollection(_) | FieldKind::EmbeddedCollectionDelta(_) => {
                validate_collection_shape(value)?
            }
        }

        if let Some(validator) = &self.options.validator {
            validator(value)
                .map_err(|e| ValidationFailure::new(e.to_string(), Some(value.clone())))?;
        }
        Ok(())
    }
}

impl SchemaField {
    /// Validate a cleaned record against every field, collecting all failures.
    pub fn validate(
        &self,
        record: &mut Record,
        options: &FieldValidateOptions,
    ) -> Result<(), ValidationFailure> {
        let root = record.clone();
        self.validate_record(record, &ValidateContext::new(options, Some(&root)))
    }

    pub(crate) fn validate_record(
        &self,
        record: &mut Record,
        ctx: &ValidateContext<'_>,
    ) -> Result<(), ValidationFailure> {
        let mut failure = ValidationFailure::default();
        for (name, field) in self.iter() {
            let Some(slot) = record.get_mut(name) else {
                if !ctx.partial && field.is_required() {
                    failure.add_field(name, ValidationFailure::new("is required", None));
                }
                continue;
            };
            let mut value = std::mem::take(slot);
            let result = {
                let child_ctx = ValidateContext {
                    siblings: &*record,
                    ..*ctx
                };
                field.validate_in(&mut value, &child_ctx)
            };
            record.insert(name.to_string(), value);
            if let Err(child) = result {
                failure.add_field(name, child);
            }
        }
        if failure.is_empty() {
            Ok(())
        } else {
            Err(failure)
        }
    }
}

fn must_be_object(value: &Value) -> ValidationFailure {
    ValidationFailure::new("must be an object", Some(value.clone()))
}

/// Elements are validated without their own fallback; with fallback enabled
/// at this level, invalid elements are dropped instead.
fn validate_elements(
    value: &mut Value,
    options: &ArrayOptions,
    ctx: &ValidateContext<'_>,
) -> Result<(), ValidationFailure> {
    let Value::Array(items) = value else {
        return Err(ValidationFailure::new("must be an array", Some(value.clone())));
    };
    let element_ctx = ValidateContext {
        partial: false,
        fallback: false,
        joint: true,
        root: ctx.root,
        siblings: &*EMPTY_RECORD,
    };

    let mut failure = ValidationFailure::default();
    let mut kept = Vec::with_capacity(items.len());
    for (i, mut item) in std::mem::take(items).into_iter().enumerate() {
        match options.element.validate_in(&mut item, &element_ctx) {
            Ok(()) => kept.push(item),
            Err(mut element) => {
                if ctx.fallback {
                    element.mark_dropped();
                } else {
                    kept.push(item);
                }
                failure.add_element(i, element);
            }
        }
    }
    *items = kept;

    if let Some(min) = options.min_length
        && items.len() < min
    {
        failure.message = Some(format!("must have at least {min} elements"));
        failure.unresolved = true;
    }
    if let Some(max) = options.max_length
        && items.len() > max
    {
        failure.message = Some(format!("may have at most {max} elements"));
        failure.unresolved = true;
    }

    if failure.is_empty() {
        Ok(())
    } else {
        Err(failure)
    }
}

/// Only the container shape is checked here; element records are validated
/// when the collection initializes, where failures are quarantined per element.
fn validate_collection_shape(value: &Value) -> Result<(), ValidationFailure> {
    let Value::Array(items) = value else {
        return Err(ValidationFailure::new("must be an array", Some(value.clone())));
    };
    let mut failure = ValidationFailure::default();
    for (i, item) in items.iter().enumerate() {
        if !item.is_object() {
            failure.add_element(i, ValidationFailure::new("must be an object", Some(item.clone())));
        }
    }
    if failure.is_empty() {
        Ok(())
    } else {
        Err(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strict() -> FieldValidateOptions {
        FieldValidateOptions::default()
    }

    fn fallback() -> FieldValidateOptions {
        FieldValidateOptions {
            partial: false,
            fallback: true,
        }
    }

    #[test]
    fn test_nullable_accepts_null() {
        let mut value = Value::Null;
        assert!(Field::number().validate(&mut value, &strict(), None).is_ok());
        assert!(Field::object().validate(&mut value, &strict(), None).is_err());
    }

    #[test]
    fn test_custom_validator_runs_after_type_check() {
        let field = Field::number().validate_with(|v| {
            if v.as_i64() == Some(13) {
                anyhow::bail!("unlucky number");
            }
            Ok(())
        });
        let failure = field.validate(&mut json!(13), &strict(), None).unwrap_err();
        assert_eq!(failure.message.as_deref(), Some("unlucky number"));
        assert!(field.validate(&mut json!(12), &strict(), None).is_ok());
    }

    #[test]
    fn test_fallback_replaces_with_initial() {
        let field = Field::number().min(0.0).initial(5);
        let mut value = json!(-3);
        let failure = field.validate(&mut value, &fallback(), None).unwrap_err();
        assert_eq!(value, json!(5));
        assert!(!failure.is_unresolved());
        assert_eq!(failure.fallback, Some(json!(5)));
    }

    #[test]
    fn test_fallback_fails_when_initial_invalid() {
        let field = Field::number().min(10.0).initial(0);
        let mut value = json!(-3);
        let failure = field.validate(&mut value, &fallback(), None).unwrap_err();
        assert_eq!(value, json!(-3));
        assert!(failure.is_unresolved());
    }

    #[test]
    fn test_array_fallback_drops_invalid_elements() {
        let field = Field::array(Field::number().positive());
        let mut value = json!([1, -2, 3]);
        let failure = field.validate(&mut value, &fallback(), None).unwrap_err();
        assert_eq!(value, json!([1, 3]));
        assert!(failure.elements[0].failure.dropped);
        assert!(!failure.is_unresolved());
    }

    #[test]
    fn test_schema_collects_every_failure() {
        let schema = SchemaField::new()
            .field("name", Field::string().blank(false))
            .field("hp", Field::number().min(0.0));
        let mut record = json!({"name": "", "hp": -1}).as_object().unwrap().clone();
        let failure = schema.validate(&mut record, &strict()).unwrap_err();
        let issues = failure.issues();
        assert!(issues.contains_key("name"));
        assert!(issues.contains_key("hp"));
    }

    #[test]
    fn test_partial_ignores_missing_keys() {
        let schema = SchemaField::new().field("name", Field::string().required());
        let mut record = Record::new();
        let partial = FieldValidateOptions {
            partial: true,
            fallback: false,
        };
        assert!(schema.validate(&mut record, &partial).is_ok());
        assert!(schema.validate(&mut record, &strict()).is_err());
    }

    #[test]
    fn test_array_length_bounds() {
        let field = Field::array(Field::number()).min_length(2);
        let failure = field.validate(&mut json!([1]), &strict(), None).unwrap_err();
        assert_eq!(failure.message.as_deref(), Some("must have at least 2 elements"));
    }
}
