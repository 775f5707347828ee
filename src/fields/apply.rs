//! Depth-first traversal of a source value alongside its schema
//!
//! The visitor sees every node pre-order and may rewrite it in place before
//! its children are visited. Migration uses this to run each embedded model's
//! own migration on the records nested below a document.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::path::FieldPath;
use super::type_data::TypeDataResolution;
use super::{Field, FieldKind, Record, SchemaField};
use crate::collection::is_tombstone;
use crate::model::ModelClass;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOptions {
    /// Descend into embedded models, collections and typed type data
    pub models: bool,
}

/// A node handed to an apply visitor
#[derive(Debug, Clone, Copy)]
pub struct ApplyNode<'a> {
    pub field: &'a Field,
    pub path: &'a FieldPath,
    /// Model governing this value when it is a single embedded record
    /// (embedded data, or type data with a registered subtype)
    pub model: Option<&'a ModelClass>,
}

impl Field {
    /// Visit this value and everything below it.
    pub fn apply<E, F>(
        &self,
        value: &mut Value,
        options: &ApplyOptions,
        visit: &mut F,
    ) -> Result<(), E>
    where
        F: FnMut(&ApplyNode<'_>, &mut Value) -> Result<(), E>,
    {
        self.apply_at(value, None, &mut FieldPath::new(), options, visit)
    }

    fn apply_at<E, F>(
        &self,
        value: &mut Value,
        siblings: Option<&Record>,
        path: &mut FieldPath,
        options: &ApplyOptions,
        visit: &mut F,
    ) -> Result<(), E>
    where
        F: FnMut(&ApplyNode<'_>, &mut Value) -> Result<(), E>,
    {
        let model = match (&self.kind, &*value) {
            (FieldKind::EmbeddedData(model), Value::Object(_)) => Some(model),
            (FieldKind::TypeData(type_data), Value::Object(_)) => {
                match type_data.resolve(type_data.discriminant_in(siblings, None)) {
                    TypeDataResolution::Typed { model, .. } => Some(model),
                    TypeDataResolution::Untyped => None,
                }
            }
            _ => None,
        };
        let node = ApplyNode {
            field: self,
            path,
            model,
        };
        visit(&node, value)?;

        match (&self.kind, &mut *value) {
            (FieldKind::Array(element) | FieldKind::Set(element), Value::Array(items)) => {
                for (i, item) in items.iter_mut().enumerate() {
                    path.push(i);
                    let result = element.element.apply_at(item, None, path, options, visit);
                    path.pop();
                    result?;
                }
            }
            (FieldKind::Schema(schema), Value::Object(record)) => {
                schema.apply_at(record, path, options, visit)?;
            }
            (FieldKind::EmbeddedData(_) | FieldKind::TypeData(_), Value::Object(record))
                if options.models =>
            {
                if let Some(model) = model {
                    model.schema().apply_at(record, path, options, visit)?;
                }
            }
            (
                FieldKind::EmbeddedCollection(model) | FieldKind::EmbeddedCollectionDelta(model),
                Value::Array(items),
            ) if options.models => {
                for (i, item) in items.iter_mut().enumerate() {
                    let Value::Object(record) = item else {
                        continue;
                    };
                    if is_tombstone(record) {
                        continue;
                    }
                    path.push(i);
                    let result = model.schema().apply_at(record, path, options, visit);
                    path.pop();
                    result?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl SchemaField {
    /// Visit every present value of a record, in schema order.
    pub fn apply<E, F>(
        &self,
        record: &mut Record,
        options: &ApplyOptions,
        visit: &mut F,
    ) -> Result<(), E>
    where
        F: FnMut(&ApplyNode<'_>, &mut Value) -> Result<(), E>,
    {
        self.apply_at(record, &mut FieldPath::new(), options, visit)
    }

    fn apply_at<E, F>(
        &self,
        record: &mut Record,
        path: &mut FieldPath,
        options: &ApplyOptions,
        visit: &mut F,
    ) -> Result<(), E>
    where
        F: FnMut(&ApplyNode<'_>, &mut Value) -> Result<(), E>,
    {
        for (name, field) in self.iter() {
            let Some(slot) = record.get_mut(name) else {
                continue;
            };
            let mut value = std::mem::take(slot);
            path.push(name);
            let result = field.apply_at(&mut value, Some(&*record), path, options, visit);
            path.pop();
            record.insert(name.to_string(), value);
            result?;
        }
        Ok(())
    }
}
