//! Initialization (source -> live data) and export (live data -> source)

use serde_json::Value;

use super::clean::EMPTY_RECORD;
use super::live::{LiveObject, LiveValue};
use super::type_data::TypeDataResolution;
use super::{Field, FieldKind, Record, SchemaField};
use crate::collection::{CollectionOptions, EmbeddedCollection};
use crate::model::{DataModel, ModelError, ParentLink};

#[derive(Clone)]
pub(crate) struct InitContext<'a> {
    /// Link to the owning document, with the field path reached so far
    pub parent: Option<ParentLink>,
    /// Fail on the first embedded record that does not validate
    pub strict: bool,
    pub root: Option<&'a Record>,
    pub siblings: &'a Record,
}

impl<'a> InitContext<'a> {
    pub fn new(parent: Option<ParentLink>, strict: bool, root: Option<&'a Record>) -> Self {
        Self {
            parent,
            strict,
            root,
            siblings: root.unwrap_or(&*EMPTY_RECORD),
        }
    }
}

impl Field {
    /// Convert a cleaned source value into its live form.
    ///
    /// Embedded records become [`DataModel`]s linked to `parent`; embedded
    /// collections are built and initialized, quarantining records that fail
    /// validation.
    pub fn initialize(
        &self,
        value: &Value,
        parent: Option<&ParentLink>,
        source: Option<&Record>,
    ) -> Result<LiveValue, ModelError> {
        self.initialize_in(value, &InitContext::new(parent.cloned(), false, source))
    }

    pub(crate) fn initialize_in(
        &self,
        value: &Value,
        ctx: &InitContext<'_>,
    ) -> Result<LiveValue, ModelError> {
        if value.is_null() {
            return Ok(LiveValue::Value(Value::Null));
        }
        let parent = ctx.parent.as_ref().map(|p| p.at(self.name()));

        let live = match (&self.kind, value) {
            (FieldKind::Json, Value::String(text)) => {
                LiveValue::Value(serde_json::from_str(text).unwrap_or_else(|_| value.clone()))
            }
            (FieldKind::Array(options) | FieldKind::Set(options), Value::Array(items)) => {
                let mut list = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let element_ctx = InitContext {
                        parent: parent.as_ref().map(|p| p.at(&i.to_string())),
                        strict: ctx.strict,
                        root: ctx.root,
                        siblings: &*EMPTY_RECORD,
                    };
                    list.push(options.element.initialize_in(item, &element_ctx)?);
                }
                LiveValue::List(list)
            }
            (FieldKind::Schema(schema), Value::Object(record)) => {
                let child_ctx = InitContext {
                    parent,
                    ..ctx.clone()
                };
                LiveValue::Object(schema.initialize_record(record, &child_ctx)?)
            }
            (FieldKind::EmbeddedData(model), Value::Object(record)) => LiveValue::Model(Box::new(
                DataModel::initialized(model.clone(), record.clone(), parent, ctx.strict)?,
            )),
            (FieldKind::TypeData(options), Value::Object(record)) => {
                let subtype = options.discriminant_in(Some(ctx.siblings), ctx.root);
                match options.resolve(subtype) {
                    TypeDataResolution::Typed { model, .. } => LiveValue::Model(Box::new(
                        DataModel::initialized(model.clone(), record.clone(), parent, ctx.strict)?,
                    )),
                    TypeDataResolution::Untyped => LiveValue::Value(value.clone()),
                }
            }
            (
                FieldKind::EmbeddedCollection(model) | FieldKind::EmbeddedCollectionDelta(model),
                Value::Array(items),
            ) => {
                let records = items.iter().filter_map(|v| v.as_object().cloned()).collect();
                let delta = matches!(self.kind, FieldKind::EmbeddedCollectionDelta(_));
                let mut collection =
                    EmbeddedCollection::new(model.clone(), self.name(), records, delta)
                        .with_parent(parent);
                collection.initialize(&CollectionOptions::builder().strict(ctx.strict).build())?;
                LiveValue::Collection(Box::new(collection))
            }
            _ => LiveValue::Value(value.clone()),
        };
        Ok(live)
    }

    /// Export a live value back to its source representation.
    pub fn to_object(&self, live: &LiveValue) -> Value {
        match (&self.kind, live) {
            (FieldKind::Json, LiveValue::Value(Value::Null)) => Value::Null,
            (FieldKind::Json, LiveValue::Value(parsed)) => serde_json::to_string(parsed)
                .map(Value::String)
                .unwrap_or(Value::Null),
            (FieldKind::Array(options) | FieldKind::Set(options), LiveValue::List(items)) => {
                Value::Array(items.iter().map(|item| options.element.to_object(item)).collect())
            }
            (FieldKind::Schema(schema), LiveValue::Object(object)) => {
                Value::Object(schema.to_object_record(object))
            }
            (_, other) => other.to_value(),
        }
    }
}

impl SchemaField {
    pub(crate) fn initialize_record(
        &self,
        record: &Record,
        ctx: &InitContext<'_>,
    ) -> Result<LiveObject, ModelError> {
        let mut out = LiveObject::with_capacity(self.len());
        for (name, field) in self.iter() {
            let Some(value) = record.get(name) else {
                continue;
            };
            let child_ctx = InitContext {
                siblings: record,
                ..ctx.clone()
            };
            out.insert(name.to_string(), field.initialize_in(value, &child_ctx)?);
        }
        Ok(out)
    }

    /// Export live data under this schema; undeclared keys are rendered as plain JSON.
    pub fn to_object_record(&self, live: &LiveObject) -> Record {
        live.iter()
            .map(|(name, value)| {
                let exported = match self.get(name) {
                    Some(field) => field.to_object(value),
                    None => value.to_value(),
                };
                (name.clone(), exported)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_is_parsed_and_restored() {
        let field = Field::json();
        let live = field.initialize(&json!("{\"a\":[1,2]}"), None, None).unwrap();
        assert_eq!(live, LiveValue::Value(json!({"a": [1, 2]})));
        assert_eq!(field.to_object(&live), json!("{\"a\":[1,2]}"));
    }

    #[test]
    fn test_schema_becomes_live_object() {
        let field = Field::schema(
            SchemaField::new()
                .field("tags", Field::set(Field::string()))
                .field("value", Field::number()),
        );
        let source = json!({"tags": ["a"], "value": 3});
        let live = field.initialize(&source, None, None).unwrap();
        let object = live.as_object().unwrap();
        assert!(matches!(object["tags"], LiveValue::List(_)));
        assert_eq!(object["value"].as_i64(), Some(3));
        assert_eq!(field.to_object(&live), source);
    }

    #[test]
    fn test_null_stays_null() {
        let live = Field::schema(SchemaField::new()).initialize(&Value::Null, None, None).unwrap();
        assert!(live.is_null());
    }
}
