//! Cleaning: coerce raw input into the canonical shape of each field

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::CoercionFailure;
use super::scalar;
use super::type_data::TypeDataResolution;
use super::{ArrayOptions, Field, FieldKind, Initial, Record};
use crate::collection::{ensure_id, is_tombstone, tombstone};
use crate::model::ModelClass;

pub(crate) static EMPTY_RECORD: Lazy<Record> = Lazy::new(Record::new);

/// Options for a single cleaning pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanOptions {
    /// Missing keys stay missing instead of receiving their initial value
    pub partial: bool,
    /// Replace values that cannot be coerced with their initial value
    pub fallback: bool,
}

impl CleanOptions {
    pub fn partial() -> Self {
        Self {
            partial: true,
            fallback: false,
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) struct CleanContext<'a> {
    pub partial: bool,
    pub fallback: bool,
    /// Top-level record of the document being cleaned
    pub root: Option<&'a Record>,
    /// Record containing the field being cleaned, populated up to this key
    pub siblings: &'a Record,
}

impl<'a> CleanContext<'a> {
    pub fn new(options: &CleanOptions, root: Option<&'a Record>) -> Self {
        Self {
            partial: options.partial,
            fallback: options.fallback,
            root,
            siblings: root.unwrap_or(&*EMPTY_RECORD),
        }
    }
}

impl Field {
    /// Coerce a raw value into this field's canonical shape.
    ///
    /// `None` stands for a missing key. In partial mode it stays missing;
    /// otherwise it becomes the initial value. `source` is the enclosing
    /// record, used to resolve type data discriminants.
    pub fn clean(
        &self,
        value: Option<Value>,
        options: &CleanOptions,
        source: Option<&Record>,
    ) -> Result<Option<Value>, CoercionFailure> {
        self.clean_in(value, &CleanContext::new(options, source))
    }

    pub(crate) fn clean_in(
        &self,
        value: Option<Value>,
        ctx: &CleanContext<'_>,
    ) -> Result<Option<Value>, CoercionFailure> {
        let value = match value {
            None if ctx.partial => return Ok(None),
            None => return Ok(Some(self.initial_value(ctx.siblings))),
            Some(value) => value,
        };
        if value.is_null() {
            return Ok(Some(self.null_value(ctx.siblings)));
        }
        let value = self.cast(value)?;
        if value.is_null() {
            return Ok(Some(self.null_value(ctx.siblings)));
        }
        self.clean_type(value, ctx).map(Some)
    }

    fn null_value(&self, siblings: &Record) -> Value {
        if self.options.nullable {
            Value::Null
        } else {
            self.initial_value(siblings)
        }
    }

    /// Resolve the declared default, or the type default when none was declared.
    pub fn initial_value(&self, siblings: &Record) -> Value {
        match &self.options.initial {
            Some(Initial::Value(value)) => value.clone(),
            Some(Initial::Generator(generate)) => generate(siblings),
            None => self.type_default(),
        }
    }

    fn type_default(&self) -> Value {
        match &self.kind {
            FieldKind::String(options) => {
                if self.options.nullable || self.options.required || !options.blank {
                    Value::Null
                } else {
                    Value::String(String::new())
                }
            }
            FieldKind::Boolean => Value::Bool(false),
            FieldKind::Object | FieldKind::TypeData(_) => Value::Object(Record::new()),
            FieldKind::Array(_)
            | FieldKind::Set(_)
            | FieldKind::EmbeddedCollection(_)
            | FieldKind::EmbeddedCollectionDelta(_) => Value::Array(Vec::new()),
            FieldKind::Schema(schema) => Value::Object(schema.initial_record()),
            FieldKind::EmbeddedData(model) => Value::Object(model.schema().initial_record()),
            _ => Value::Null,
        }
    }

    /// Type coercion only; no range or format checks.
    pub fn cast(&self, value: Value) -> Result<Value, CoercionFailure> {
        match &self.kind {
            FieldKind::String(_) => scalar::cast_string(value),
            FieldKind::Number(_) => scalar::cast_number(value),
            FieldKind::Boolean => scalar::cast_boolean(value),
            FieldKind::Color => scalar::cast_color(value),
            FieldKind::FilePath(_) => match value {
                Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
                Value::String(_) => Ok(value),
                other => Err(CoercionFailure::new("file path", &other)),
            },
            FieldKind::Json => scalar::cast_json(value),
            FieldKind::Object
            | FieldKind::Schema(_)
            | FieldKind::EmbeddedData(_)
            | FieldKind::TypeData(_) => scalar::cast_object(value),
            FieldKind::DocumentId => scalar::cast_document_id(value, false),
            FieldKind::ForeignDocument { .. } => scalar::cast_document_id(value, true),
            FieldKind::Array(_)
            | FieldKind::Set(_)
            | FieldKind::EmbeddedCollection(_)
            | FieldKind::EmbeddedCollectionDelta(_) => cast_array(value),
        }
    }

    fn clean_type(&self, value: Value, ctx: &CleanContext<'_>) -> Result<Value, CoercionFailure> {
        match &self.kind {
            FieldKind::String(options) => Ok(scalar::clean_string(value, options)),
            FieldKind::Number(options) => Ok(scalar::clean_number(value, options)),
            FieldKind::Json => Ok(normalize_json(value)),
            FieldKind::Array(options) => clean_elements(value, options, ctx, false),
            FieldKind::Set(options) => clean_elements(value, options, ctx, true),
            FieldKind::Schema(schema) => match value {
                Value::Object(record) => schema.clean_record(record, ctx).map(Value::Object),
                other => Ok(other),
            },
            FieldKind::EmbeddedData(model) => match value {
                Value::Object(record) => {
                    model.schema().clean_record(record, ctx).map(Value::Object)
                }
                other => Ok(other),
            },
            FieldKind::TypeData(options) => match value {
                Value::Object(record) => {
                    match options.resolve(options.discriminant_in(Some(ctx.siblings), ctx.root)) {
                        TypeDataResolution::Typed { model, .. } => {
                            model.schema().clean_record(record, ctx).map(Value::Object)
                        }
                        TypeDataResolution::Untyped => Ok(Value::Object(record)),
                    }
                }
                other => Ok(other),
            },
            FieldKind::EmbeddedCollection(model) => clean_collection(value, model, ctx, false),
            FieldKind::EmbeddedCollectionDelta(model) => clean_collection(value, model, ctx, true),
            _ => Ok(value),
        }
    }
}

/// Arrays also accept index-keyed objects (`{"0": a, "1": b}`) and bare scalars.
fn cast_array(value: Value) -> Result<Value, CoercionFailure> {
    match value {
        Value::Array(_) | Value::Null => Ok(value),
        Value::Object(record) => {
            if !record.keys().all(|key| key.parse::<usize>().is_ok()) {
                return Err(CoercionFailure::new("array", &Value::Object(record)));
            }
            let mut indexed: Vec<(usize, Value)> = record
                .into_iter()
                .filter_map(|(key, item)| key.parse::<usize>().ok().map(|i| (i, item)))
                .collect();
            indexed.sort_by_key(|(i, _)| *i);
            Ok(Value::Array(indexed.into_iter().map(|(_, v)| v).collect()))
        }
        other => Ok(Value::Array(vec![other])),
    }
}

/// Re-serialize parseable JSON so equal payloads clean to equal strings.
fn normalize_json(value: Value) -> Value {
    let Value::String(text) = &value else {
        return value;
    };
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Null) => Value::Null,
        Ok(parsed) => serde_json::to_string(&parsed).map(Value::String).unwrap_or(value),
        Err(_) => value,
    }
}

fn clean_elements(
    value: Value,
    options: &ArrayOptions,
    ctx: &CleanContext<'_>,
    unique: bool,
) -> Result<Value, CoercionFailure> {
    let Value::Array(items) = value else {
        return Ok(value);
    };
    let element_ctx = CleanContext {
        partial: false,
        fallback: ctx.fallback,
        root: ctx.root,
        siblings: &*EMPTY_RECORD,
    };

    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        match options.element.clean_in(Some(item), &element_ctx) {
            Ok(Some(cleaned)) => {
                if unique && out.contains(&cleaned) {
                    continue;
                }
                out.push(cleaned);
            }
            Ok(None) => {}
            Err(e) if ctx.fallback => {
                warn!("Dropping array element {}: {}", i, e);
            }
            Err(e) => return Err(e.within(i)),
        }
    }
    Ok(Value::Array(out))
}

/// Clean each record of an embedded collection.
///
/// Records without an `_id` receive a generated one. Records that fail to
/// clean are kept as they are so the collection can quarantine them later.
/// Duplicate ids collapse to the last record, at the first one's position.
fn clean_collection(
    value: Value,
    model: &ModelClass,
    ctx: &CleanContext<'_>,
    delta: bool,
) -> Result<Value, CoercionFailure> {
    let Value::Array(items) = value else {
        return Ok(value);
    };

    let mut records: IndexMap<String, Value> = IndexMap::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let Value::Object(mut record) = item else {
            warn!("Dropping non-record element {} of {} collection", i, model.name());
            continue;
        };

        if delta && is_tombstone(&record) {
            match record.get("_id").and_then(Value::as_str) {
                Some(id) => {
                    let id = id.to_string();
                    records.insert(id.clone(), Value::Object(tombstone(&id)));
                }
                None => warn!("Dropping tombstone {} without an id", i),
            }
            continue;
        }

        let id = ensure_id(&mut record, model.name(), i);
        let raw = record.clone();
        let element_ctx = CleanContext {
            partial: false,
            fallback: ctx.fallback,
            root: Some(&raw),
            siblings: &raw,
        };
        let cleaned = match model.schema().clean_record(record, &element_ctx) {
            Ok(cleaned) => Value::Object(cleaned),
            Err(e) => {
                debug!("Keeping uncleanable {} record {} for quarantine: {}", model.name(), id, e);
                Value::Object(raw.clone())
            }
        };

        if records.insert(id.clone(), cleaned).is_some() {
            warn!(
                "Duplicate id {} in {} collection; keeping the last record",
                id,
                model.name()
            );
        }
    }
    Ok(Value::Array(records.into_values().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::SchemaField;
    use serde_json::json;

    fn clean(field: &Field, value: Value) -> Value {
        field
            .clean(Some(value), &CleanOptions::default(), None)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_missing_value_uses_initial() {
        let field = Field::number().initial(5);
        let cleaned = field.clean(None, &CleanOptions::default(), None).unwrap();
        assert_eq!(cleaned, Some(json!(5)));
    }

    #[test]
    fn test_missing_value_stays_missing_when_partial() {
        let field = Field::number().initial(5);
        let cleaned = field.clean(None, &CleanOptions::partial(), None).unwrap();
        assert_eq!(cleaned, None);
    }

    #[test]
    fn test_null_on_non_nullable_becomes_initial() {
        let field = Field::boolean();
        assert_eq!(clean(&field, Value::Null), json!(false));
        let field = Field::number();
        assert_eq!(clean(&field, Value::Null), Value::Null);
    }

    #[test]
    fn test_number_from_string() {
        let field = Field::number().integer();
        assert_eq!(clean(&field, json!("12.6")), json!(13));
        assert_eq!(clean(&field, json!("")), Value::Null);
    }

    #[test]
    fn test_uncoercible_value_fails() {
        let field = Field::string();
        let err = field
            .clean(Some(json!({"a": 1})), &CleanOptions::default(), None)
            .unwrap_err();
        assert_eq!(err.expected, "string");
    }

    #[test]
    fn test_array_from_indexed_object() {
        let field = Field::array(Field::number());
        assert_eq!(clean(&field, json!({"1": "2", "0": 1})), json!([1, 2]));
        assert_eq!(clean(&field, json!(3)), json!([3]));
    }

    #[test]
    fn test_set_keeps_first_occurrence() {
        let field = Field::set(Field::string());
        assert_eq!(clean(&field, json!(["b", "a", "b"])), json!(["b", "a"]));
    }

    #[test]
    fn test_array_element_failure_has_index() {
        let field = Field::array(Field::number());
        let err = field
            .clean(Some(json!([1, "x"])), &CleanOptions::default(), None)
            .unwrap_err();
        assert_eq!(err.path.to_dotted(), "1");
    }

    #[test]
    fn test_array_fallback_drops_element() {
        let field = Field::array(Field::number());
        let options = CleanOptions {
            partial: false,
            fallback: true,
        };
        let cleaned = field.clean(Some(json!([1, "x", 3])), &options, None).unwrap();
        assert_eq!(cleaned, Some(json!([1, 3])));
    }

    #[test]
    fn test_json_normalized() {
        let field = Field::json();
        assert_eq!(clean(&field, json!("{\"a\": 1}")), json!("{\"a\":1}"));
        assert_eq!(clean(&field, json!({"b": true})), json!("{\"b\":true}"));
        assert_eq!(clean(&field, json!("null")), Value::Null);
    }

    #[test]
    fn test_schema_default_is_cleaned_empty_record() {
        let field = Field::schema(
            SchemaField::new()
                .field("value", Field::number().initial(10))
                .field("max", Field::number().initial_with(|s| s["value"].clone())),
        );
        assert_eq!(
            field.clean(None, &CleanOptions::default(), None).unwrap(),
            Some(json!({"value": 10, "max": 10}))
        );
    }
}
