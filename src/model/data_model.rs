//! Data model instances
//!
//! A [`DataModel`] owns a sealed source record and the live data derived from
//! it. The source only changes through [`DataModel::update_source`], which is
//! all-or-nothing: either the whole change set cleans and validates and is
//! merged, or the model is left untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::{Deref, DerefMut};
use tracing::{debug, warn};

use super::class::ModelClass;
use super::config::{ModelOptions, UpdateOptions, ValidateOptions};
use super::diff::{diff_records, expand_dotted, merge_records, set_at_path};
use super::error::ModelError;
use crate::collection::EmbeddedCollection;
use crate::fields::clean::CleanContext;
use crate::fields::initialize::InitContext;
use crate::fields::validate::ValidateContext;
use crate::fields::{
    CleanOptions, Field, FieldKind, FieldPath, LiveObject, LiveValue, PathSegment, Record,
    SchemaField,
};
use crate::validation::ValidationFailure;

/// Non-owning reference from an embedded document to the document holding it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentLink {
    /// Model name of the owning document
    pub model: String,
    /// Id of the owning document, when it has one
    pub id: Option<String>,
    /// Dotted path of the field holding the embedded document
    pub field: Option<String>,
}

impl ParentLink {
    pub fn new(model: impl Into<String>, id: Option<String>) -> Self {
        Self {
            model: model.into(),
            id,
            field: None,
        }
    }

    /// Link extended by one field path segment
    pub fn at(&self, segment: &str) -> Self {
        if segment.is_empty() {
            return self.clone();
        }
        let field = match &self.field {
            Some(prefix) => format!("{prefix}.{segment}"),
            None => segment.to_string(),
        };
        Self {
            field: Some(field),
            ..self.clone()
        }
    }
}

/// An instance of a model class
#[derive(Debug, Clone)]
pub struct DataModel {
    class: ModelClass,
    source: Record,
    data: LiveObject,
    parent: Option<ParentLink>,
    strict_embedded: bool,
    last_failure: Option<ValidationFailure>,
}

impl DataModel {
    /// Construct from raw input: migrate, clean, validate, then initialize.
    pub fn new(
        class: ModelClass,
        source: Record,
        options: &ModelOptions,
    ) -> Result<Self, ModelError> {
        debug!("Constructing {}", class.name());
        let migrated = class.migrate_data_safe(source);
        let clean_options = CleanOptions {
            partial: options.partial,
            fallback: options.fallback,
        };
        let mut source = class.clean_data(migrated, &clean_options)?;

        let mut last_failure = None;
        if let Err(failure) = validate_record(
            &class,
            &mut source,
            None,
            options.partial,
            options.fallback,
            !options.partial,
        ) {
            if !failure.is_unresolved() {
                warn!("{} recovered from invalid values: {}", class.name(), failure);
            } else if options.strict {
                return Err(ModelError::Validation {
                    model: class.name().to_string(),
                    failure,
                });
            } else {
                warn!("{} constructed with invalid data: {}", class.name(), failure);
                last_failure = Some(failure);
            }
        }

        let mut model = Self {
            class,
            source,
            data: LiveObject::new(),
            parent: options.parent.clone(),
            strict_embedded: options.strict_embedded,
            last_failure,
        };
        model.data = model.derive(&model.source)?;
        Ok(model)
    }

    /// Construct from trusted data: migrated and cleaned, validated non-strictly.
    pub fn from_source(class: ModelClass, source: Record) -> Result<Self, ModelError> {
        Self::new(class, source, &ModelOptions::trusted())
    }

    /// Parse a JSON object and construct from it.
    pub fn from_json(
        class: ModelClass,
        json: &str,
        options: &ModelOptions,
    ) -> Result<Self, ModelError> {
        let source: Record = serde_json::from_str(json)?;
        Self::new(class, source, options)
    }

    /// Wrap source that an owning document already cleaned and validated.
    pub(crate) fn initialized(
        class: ModelClass,
        source: Record,
        parent: Option<ParentLink>,
        strict_embedded: bool,
    ) -> Result<Self, ModelError> {
        let mut model = Self {
            class,
            source,
            data: LiveObject::new(),
            parent,
            strict_embedded,
            last_failure: None,
        };
        model.data = model.derive(&model.source)?;
        Ok(model)
    }

    /// Degraded instance for a record that failed construction. Its live data
    /// is the raw record, uninitialized.
    pub(crate) fn quarantined(
        class: ModelClass,
        source: Record,
        parent: Option<ParentLink>,
        failure: Option<ValidationFailure>,
    ) -> Self {
        let data = source
            .iter()
            .map(|(k, v)| (k.clone(), LiveValue::Value(v.clone())))
            .collect();
        Self {
            class,
            source,
            data,
            parent,
            strict_embedded: false,
            last_failure: failure,
        }
    }

    fn link_for(&self, source: &Record) -> ParentLink {
        ParentLink::new(
            self.class.name(),
            source.get("_id").and_then(Value::as_str).map(str::to_string),
        )
    }

    fn derive(&self, source: &Record) -> Result<LiveObject, ModelError> {
        let ctx = InitContext::new(Some(self.link_for(source)), self.strict_embedded, Some(source));
        self.class.schema().initialize_record(source, &ctx)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn class(&self) -> &ModelClass {
        &self.class
    }

    pub fn schema(&self) -> &SchemaField {
        self.class.schema()
    }

    /// The sealed source record
    pub fn source(&self) -> &Record {
        &self.source
    }

    /// Live data derived from the source
    pub fn data(&self) -> &LiveObject {
        &self.data
    }

    /// Mutable live data. Changes here are discarded by the next reset.
    pub fn data_mut(&mut self) -> &mut LiveObject {
        &mut self.data
    }

    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    pub fn id(&self) -> Option<&str> {
        self.source.get("_id").and_then(Value::as_str)
    }

    /// Failure recorded by the last non-strict construction or validation
    pub fn validation_failure(&self) -> Option<&ValidationFailure> {
        self.last_failure.as_ref()
    }

    pub fn get(&self, key: &str) -> Option<&LiveValue> {
        self.data.get(key)
    }

    /// Live value at a dotted path, descending into embedded models and lists
    pub fn get_path(&self, dotted: &str) -> Option<&LiveValue> {
        let path = FieldPath::parse(dotted);
        let (first, rest) = path.segments().split_first()?;
        let mut current = self.data.get(&first.to_string())?;
        for segment in rest {
            current = current.get(&segment.to_string())?;
        }
        Some(current)
    }

    /// Declared field at a dotted path
    pub fn get_field(&self, dotted: &str) -> Option<&Field> {
        self.class.schema().get_field(dotted)
    }

    /// Embedded collection at a dotted path
    pub fn collection(&self, dotted: &str) -> Option<&EmbeddedCollection> {
        self.get_path(dotted).and_then(LiveValue::as_collection)
    }

    /// Mutable access to an embedded collection. Changes the collection makes
    /// to its own source are written back to this model's source on drop.
    pub fn collection_mut(&mut self, dotted: &str) -> Result<CollectionMut<'_>, ModelError> {
        match self.get_field(dotted).map(Field::kind) {
            Some(FieldKind::EmbeddedCollection(_) | FieldKind::EmbeddedCollectionDelta(_)) => {}
            Some(_) => {
                return Err(ModelError::NotACollection {
                    path: dotted.to_string(),
                });
            }
            None => {
                return Err(ModelError::UnknownField {
                    model: self.class.name().to_string(),
                    path: dotted.to_string(),
                });
            }
        }

        let path = FieldPath::parse(dotted);
        // Embedded models hold their own copy of the source, so a collection
        // below one cannot be written back through this model.
        let mut prefix = FieldPath::new();
        for segment in &path.segments()[..path.len().saturating_sub(1)] {
            prefix.push(segment.clone());
            if let Some(
                FieldKind::EmbeddedData(_)
                | FieldKind::EmbeddedCollection(_)
                | FieldKind::EmbeddedCollectionDelta(_)
                | FieldKind::TypeData(_)
                | FieldKind::Array(_)
                | FieldKind::Set(_),
            ) = self.get_field(&prefix.to_dotted()).map(Field::kind)
            {
                return Err(ModelError::NestedCollection {
                    path: dotted.to_string(),
                });
            }
        }

        let Self { data, source, .. } = self;
        let collection = live_path_mut(data, path.segments())
            .and_then(LiveValue::as_collection_mut)
            .ok_or_else(|| ModelError::NotACollection {
                path: dotted.to_string(),
            })?;
        Ok(CollectionMut {
            collection,
            source,
            path: dotted.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Validate the current source, or a differential payload.
    ///
    /// Returns `Ok(true)` when valid (possibly after fallback recovery),
    /// `Ok(false)` when invalid and `strict` is off, and an error otherwise.
    pub fn validate(&mut self, options: &ValidateOptions) -> Result<bool, ModelError> {
        let joint = options.run_joint();
        let (mut target, partial) = match &options.changes {
            Some(changes) => {
                let changes = expand_dotted(changes.clone());
                let changes = if options.clean {
                    self.clean_changes(changes, options.fallback, true)?
                } else {
                    changes
                };
                if joint {
                    let mut merged = self.source.clone();
                    merge_records(&mut merged, &changes, true);
                    (merged, false)
                } else {
                    (changes, true)
                }
            }
            None => (self.source.clone(), false),
        };

        let result = if options.fields {
            validate_record(
                &self.class,
                &mut target,
                Some(&self.source),
                partial,
                options.fallback,
                joint,
            )
        } else if joint {
            self.class
                .validate_joint(&target)
                .map_err(|e| ValidationFailure::new(e.to_string(), None))
        } else {
            Ok(())
        };

        match result {
            Ok(()) => {
                if options.changes.is_none() {
                    self.last_failure = None;
                }
                Ok(true)
            }
            Err(failure) if !failure.is_unresolved() => {
                warn!("{} recovered from invalid values: {}", self.class.name(), failure);
                if options.changes.is_none() {
                    self.data = self.derive(&target)?;
                    self.source = target;
                    self.last_failure = None;
                }
                Ok(true)
            }
            Err(failure) if options.strict => Err(ModelError::Validation {
                model: self.class.name().to_string(),
                failure,
            }),
            Err(failure) => {
                warn!("{} failed validation: {}", self.class.name(), failure);
                self.last_failure = Some(failure);
                Ok(false)
            }
        }
    }

    fn clean_changes(
        &self,
        changes: Record,
        fallback: bool,
        recursive: bool,
    ) -> Result<Record, ModelError> {
        let mut preview = self.source.clone();
        merge_records(&mut preview, &changes, recursive);
        let schema = self.class.schema();

        if recursive {
            let ctx = CleanContext {
                partial: true,
                fallback,
                root: Some(&preview),
                siblings: &preview,
            };
            return Ok(schema.clean_record(changes, &ctx)?);
        }

        let ctx = CleanContext {
            partial: false,
            fallback,
            root: Some(&preview),
            siblings: &preview,
        };
        let mut cleaned = Record::new();
        for (key, value) in changes {
            let Some(field) = schema.get(&key) else {
                debug!("Ignoring change to undeclared key {}", key);
                continue;
            };
            let value = field
                .clean_in(Some(value), &ctx)
                .map_err(|e| e.within(key.as_str()))?
                .unwrap_or(Value::Null);
            cleaned.insert(key, value);
        }
        Ok(cleaned)
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    /// Clean, validate and merge a change set, returning the leaf values that changed.
    pub fn update_source(
        &mut self,
        changes: Record,
        options: &UpdateOptions,
    ) -> Result<Record, ModelError> {
        let changes = expand_dotted(changes);
        let mut cleaned = self.clean_changes(changes, options.fallback, options.recursive)?;

        let mut failure = ValidationFailure::default();
        readonly_violations(self.class.schema(), &self.source, &cleaned, &mut failure);

        let mut merged = self.source.clone();
        merge_records(&mut merged, &cleaned, options.recursive);
        if let Err(fields) = validate_record(
            &self.class,
            &mut cleaned,
            Some(&merged),
            true,
            options.fallback,
            false,
        ) {
            merge_failures(&mut failure, fields);
            merged = self.source.clone();
            merge_records(&mut merged, &cleaned, options.recursive);
        }
        if options.joint
            && !failure.is_unresolved()
            && let Err(e) = self.class.validate_joint(&merged)
        {
            failure.message = Some(e.to_string());
            failure.unresolved = true;
        }

        if failure.is_unresolved() {
            return Err(ModelError::Validation {
                model: self.class.name().to_string(),
                failure,
            });
        }
        if !failure.is_empty() {
            warn!("{} update recovered from invalid values: {}", self.class.name(), failure);
        }

        let diff = diff_records(&self.source, &merged);
        if options.dry_run || diff.is_empty() {
            return Ok(diff);
        }
        let data = self.derive(&merged)?;
        self.source = merged;
        self.data = data;
        debug!("Updated {} with {} changed keys", self.class.name(), diff.len());
        Ok(diff)
    }

    /// Discard live data and derive it again from the source.
    pub fn reset(&mut self) -> Result<(), ModelError> {
        self.data = self.derive(&self.source)?;
        Ok(())
    }

    /// Construct a new instance from this one's source with changes applied.
    pub fn clone_with(&self, changes: Record, options: &ModelOptions) -> Result<Self, ModelError> {
        let mut source = self.source.clone();
        merge_records(&mut source, &expand_dotted(changes), true);
        let options = ModelOptions {
            parent: options.parent.clone().or_else(|| self.parent.clone()),
            ..options.clone()
        };
        Self::new(self.class.clone(), source, &options)
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    /// Export from the source (`true`) or from the live data (`false`).
    pub fn to_object(&self, source: bool) -> Record {
        if source {
            self.source.clone()
        } else {
            self.class.schema().to_object_record(&self.data)
        }
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.to_object(true))
    }

    pub fn to_json_string(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string(&self.source)?)
    }
}

impl PartialEq for DataModel {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && self.source == other.source
    }
}

/// Guard returned by [`DataModel::collection_mut`]
pub struct CollectionMut<'a> {
    collection: &'a mut EmbeddedCollection,
    source: &'a mut Record,
    path: String,
}

impl Deref for CollectionMut<'_> {
    type Target = EmbeddedCollection;

    fn deref(&self) -> &Self::Target {
        self.collection
    }
}

impl DerefMut for CollectionMut<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.collection
    }
}

impl Drop for CollectionMut<'_> {
    fn drop(&mut self) {
        set_at_path(self.source, &self.path, Value::Array(self.collection.source_array()));
    }
}

fn live_path_mut<'a>(
    data: &'a mut LiveObject,
    segments: &[PathSegment],
) -> Option<&'a mut LiveValue> {
    let (first, rest) = segments.split_first()?;
    descend_mut(data.get_mut(&first.to_string())?, rest)
}

fn descend_mut<'a>(
    value: &'a mut LiveValue,
    segments: &[PathSegment],
) -> Option<&'a mut LiveValue> {
    match segments.split_first() {
        None => Some(value),
        Some((segment, rest)) => match value {
            LiveValue::Object(object) => descend_mut(object.get_mut(&segment.to_string())?, rest),
            _ => None,
        },
    }
}

/// Validate a whole record under a model class.
fn validate_record(
    class: &ModelClass,
    record: &mut Record,
    root: Option<&Record>,
    partial: bool,
    fallback: bool,
    joint: bool,
) -> Result<(), ValidationFailure> {
    let snapshot;
    let root = match root {
        Some(root) => root,
        None => {
            snapshot = record.clone();
            &snapshot
        }
    };
    let ctx = ValidateContext {
        partial,
        fallback,
        joint,
        root: Some(root),
        siblings: root,
    };
    class.validate_record(record, &ctx)
}

fn merge_failures(target: &mut ValidationFailure, other: ValidationFailure) {
    if other.message.is_some() {
        target.message = other.message;
        target.unresolved |= other.unresolved;
    }
    for (name, failure) in other.fields {
        target.fields.entry(name).or_insert(failure);
    }
    target.elements.extend(other.elements);
}

/// Report readonly fields whose current non-null value the changes would alter.
fn readonly_violations(
    schema: &SchemaField,
    current: &Record,
    changes: &Record,
    failure: &mut ValidationFailure,
) {
    for (key, incoming) in changes {
        let Some(field) = schema.get(key) else {
            continue;
        };
        let existing = current.get(key);
        if field.is_readonly() {
            if existing.is_some_and(|v| !v.is_null() && v != incoming) {
                let issue = ValidationFailure::new("is readonly", Some(incoming.clone()));
                failure.add_field(key.clone(), issue);
            }
            continue;
        }
        if let (Some(nested), Some(Value::Object(before)), Value::Object(after)) =
            (field.nested_schema(), existing, incoming)
        {
            let mut child = ValidationFailure::default();
            readonly_violations(nested, before, after, &mut child);
            if !child.is_empty() {
                failure.add_field(key.clone(), child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    fn monster() -> ModelClass {
        ModelClass::builder("Monster")
            .schema(
                SchemaField::new()
                    .field("name", Field::string().required())
                    .field("hp", Field::number().min(0.0).initial(10))
                    .field(
                        "details",
                        Field::schema(SchemaField::new().field("biography", Field::html())),
                    ),
            )
            .build()
    }

    fn goblin() -> DataModel {
        let source = record(json!({"name": "Goblin"}));
        DataModel::new(monster(), source, &ModelOptions::default()).unwrap()
    }

    #[test]
    fn test_parent_link_paths() {
        let link = ParentLink::new("Actor", Some("abc".to_string()));
        assert_eq!(link.at("system").at("items").field.as_deref(), Some("system.items"));
        assert_eq!(link.at(""), link);
    }

    #[test]
    fn test_construct_fills_defaults() {
        let model = goblin();
        assert_eq!(
            model.to_json(),
            json!({"name": "Goblin", "hp": 10, "details": {"biography": ""}})
        );
    }

    #[test]
    fn test_get_path_reads_nested_live_values() {
        let model = DataModel::new(
            monster(),
            record(json!({"name": "Goblin", "details": {"biography": "Small"}})),
            &ModelOptions::default(),
        )
        .unwrap();
        assert_eq!(model.get_path("details.biography").and_then(LiveValue::as_str), Some("Small"));
        assert!(model.get_path("details.missing").is_none());
    }

    #[test]
    fn test_non_strict_records_failure() {
        let model = DataModel::new(
            monster(),
            record(json!({"name": "Goblin", "hp": -5})),
            &ModelOptions::trusted(),
        )
        .unwrap();
        assert!(model.validation_failure().is_some());
        assert_eq!(model.source()["hp"], json!(-5));
    }

    #[test]
    fn test_update_dry_run_leaves_source() {
        let mut model = goblin();
        let diff = model
            .update_source(
                record(json!({"hp": 4})),
                &UpdateOptions::builder().dry_run(true).build(),
            )
            .unwrap();
        assert_eq!(Value::Object(diff), json!({"hp": 4}));
        assert_eq!(model.source()["hp"], json!(10));
    }

    #[test]
    fn test_validate_changes_is_partial() {
        let mut model = goblin();
        let options = ValidateOptions::builder().changes(record(json!({"hp": 3}))).build();
        assert!(model.validate(&options).unwrap());
        let options = ValidateOptions::builder()
            .changes(record(json!({"hp": -3})))
            .strict(false)
            .build();
        assert!(!model.validate(&options).unwrap());
    }
}
