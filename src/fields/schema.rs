//! Ordered collections of named fields

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use super::clean::CleanContext;
use super::error::CoercionFailure;
use super::path::{FieldPath, PathSegment};
use super::{CleanOptions, Field, FieldKind, Record};

/// A record-valued field whose properties are themselves fields.
///
/// Key order is declaration order and is significant: initial values and
/// type data discriminants are resolved against siblings declared earlier.
#[derive(Debug, Clone, Default)]
pub struct SchemaField {
    fields: IndexMap<String, Field>,
}

impl SchemaField {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. Redeclaring a name replaces the earlier field in place.
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.insert(name, field);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, field: Field) {
        let name = name.into();
        self.fields.insert(name.clone(), field.with_name(name));
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    /// Name and field pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Find a nested field by dotted path, e.g. `"attributes.hp.value"`.
    ///
    /// Array and set elements are reached with `element` or any index.
    /// Type data sub-schemas are reached through the subtype name, as in
    /// `"system.weapon.damage"`.
    pub fn get_field(&self, dotted: &str) -> Option<&Field> {
        let path = FieldPath::parse(dotted);
        let mut cursor = Cursor::Schema(self);
        for segment in path.segments() {
            cursor = match (cursor, segment) {
                (Cursor::Schema(schema), PathSegment::Field(name)) => {
                    Cursor::Field(schema.get(name)?)
                }
                (Cursor::Schema(_), PathSegment::Index(_)) => return None,
                (Cursor::Field(field), segment) => descend(field, segment)?,
            };
        }
        match cursor {
            Cursor::Field(field) => Some(field),
            Cursor::Schema(_) => None,
        }
    }

    /// Visit every declared field depth-first, with its path from this schema.
    pub fn for_each_field(&self, visit: &mut impl FnMut(&FieldPath, &Field)) {
        let mut path = FieldPath::new();
        self.walk(&mut path, visit);
    }

    fn walk(&self, path: &mut FieldPath, visit: &mut impl FnMut(&FieldPath, &Field)) {
        for (name, field) in &self.fields {
            path.push(name.as_str());
            visit(path, field);
            match field.kind() {
                FieldKind::Schema(schema) => schema.walk(path, visit),
                FieldKind::EmbeddedData(model)
                | FieldKind::EmbeddedCollection(model)
                | FieldKind::EmbeddedCollectionDelta(model) => model.schema().walk(path, visit),
                FieldKind::Array(options) | FieldKind::Set(options) => {
                    path.push("element");
                    visit(path, &options.element);
                    if let Some(schema) = options.element.nested_schema() {
                        schema.walk(path, visit);
                    }
                    path.pop();
                }
                FieldKind::TypeData(options) => {
                    for (subtype, model) in &options.models {
                        path.push(subtype.as_str());
                        model.schema().walk(path, visit);
                        path.pop();
                    }
                }
                _ => {}
            }
            path.pop();
        }
    }

    /// Record holding the initial value of every field, in schema order.
    pub fn initial_record(&self) -> Record {
        let mut out = Record::new();
        for (name, field) in &self.fields {
            let value = field.initial_value(&out);
            out.insert(name.clone(), value);
        }
        out
    }

    /// Clean a whole record. Keys the schema does not declare are dropped.
    pub fn clean(&self, source: Record, options: &CleanOptions) -> Result<Record, CoercionFailure> {
        let root = source.clone();
        self.clean_record(source, &CleanContext::new(options, Some(&root)))
    }

    pub(crate) fn clean_record(
        &self,
        mut input: Record,
        ctx: &CleanContext<'_>,
    ) -> Result<Record, CoercionFailure> {
        let mut out = Record::with_capacity(self.fields.len());
        for (name, field) in &self.fields {
            let raw = input.remove(name);
            let result = {
                let child_ctx = CleanContext {
                    partial: ctx.partial,
                    fallback: ctx.fallback,
                    root: ctx.root,
                    siblings: &out,
                };
                field.clean_in(raw, &child_ctx)
            };
            match result {
                Ok(Some(value)) => {
                    out.insert(name.clone(), value);
                }
                Ok(None) => {}
                Err(e) if ctx.fallback => {
                    warn!(
                        "Replacing uncoercible value with its initial value: {}",
                        e.within(name.as_str())
                    );
                    let value = field.initial_value(&out);
                    out.insert(name.clone(), value);
                }
                Err(e) => return Err(e.within(name.as_str())),
            }
        }
        if !input.is_empty() {
            debug!(
                "Dropping undeclared keys: {}",
                input.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }
        Ok(out)
    }
}

enum Cursor<'a> {
    Field(&'a Field),
    Schema(&'a SchemaField),
}

fn descend<'a>(field: &'a Field, segment: &PathSegment) -> Option<Cursor<'a>> {
    let next = match (field.kind(), segment) {
        (FieldKind::Array(options) | FieldKind::Set(options), PathSegment::Index(_)) => {
            Cursor::Field(&options.element)
        }
        (FieldKind::Array(options) | FieldKind::Set(options), PathSegment::Field(name))
            if name == "element" =>
        {
            Cursor::Field(&options.element)
        }
        (FieldKind::Schema(schema), PathSegment::Field(name)) => Cursor::Field(schema.get(name)?),
        (
            FieldKind::EmbeddedData(model)
            | FieldKind::EmbeddedCollection(model)
            | FieldKind::EmbeddedCollectionDelta(model),
            PathSegment::Field(name),
        ) => Cursor::Field(model.schema().get(name)?),
        (FieldKind::TypeData(options), PathSegment::Field(subtype)) => {
            Cursor::Schema(options.models.get(subtype)?.schema())
        }
        _ => return None,
    };
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource() -> SchemaField {
        SchemaField::new()
            .field("value", Field::number().initial(10))
            .field("max", Field::number().initial_with(|s| s["value"].clone()))
    }

    #[test]
    fn test_initial_record_uses_earlier_siblings() {
        assert_eq!(
            Value::Object(resource().initial_record()),
            json!({"value": 10, "max": 10})
        );
    }

    #[test]
    fn test_clean_drops_unknown_keys() {
        let schema = resource();
        let cleaned = schema
            .clean(
                json!({"value": "3", "bogus": true}).as_object().unwrap().clone(),
                &CleanOptions::default(),
            )
            .unwrap();
        assert_eq!(Value::Object(cleaned), json!({"value": 3, "max": 3}));
    }

    #[test]
    fn test_clean_preserves_schema_order() {
        let schema = resource();
        let cleaned = schema
            .clean(
                json!({"max": 5, "value": 1}).as_object().unwrap().clone(),
                &CleanOptions::default(),
            )
            .unwrap();
        assert_eq!(cleaned.keys().collect::<Vec<_>>(), vec!["value", "max"]);
    }

    #[test]
    fn test_partial_clean_keeps_only_given_keys() {
        let cleaned = resource()
            .clean(json!({"max": "7"}).as_object().unwrap().clone(), &CleanOptions::partial())
            .unwrap();
        assert_eq!(Value::Object(cleaned), json!({"max": 7}));
    }

    #[test]
    fn test_get_field() {
        let schema = SchemaField::new()
            .field(
                "attributes",
                Field::schema(SchemaField::new().field("hp", Field::schema(resource()))),
            )
            .field("tags", Field::array(Field::string()));
        assert!(schema.get_field("attributes.hp.max").is_some());
        assert!(schema.get_field("attributes.hp.missing").is_none());
        assert!(matches!(
            schema.get_field("tags.element").map(Field::kind),
            Some(FieldKind::String(_))
        ));
        assert_eq!(schema.get_field("attributes.hp.max").map(Field::name), Some("max"));
    }

    #[test]
    fn test_for_each_field_paths() {
        let schema = SchemaField::new().field("hp", Field::schema(resource()));
        let mut paths = Vec::new();
        schema.for_each_field(&mut |path, _| paths.push(path.to_dotted()));
        assert_eq!(paths, vec!["hp", "hp.value", "hp.max"]);
    }
}
