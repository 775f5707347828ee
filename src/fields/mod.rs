//! Field declarations
//!
//! A [`Field`] describes one property of a schema: its type ([`FieldKind`]),
//! whether it may be missing or null, its default, and any custom validation.
//! Fields are immutable once attached to a [`SchemaField`]; all per-instance
//! data lives in the [`DataModel`](crate::model::DataModel) that uses them.
//!
//! The set of field types is closed. Every pass over a schema (clean,
//! validate, initialize, export, visit) dispatches on [`FieldKind`]:
//!
//! - scalars: string, number, boolean, color, file path, JSON, object, document id
//! - references: foreign document id
//! - structural: array, set, nested schema, embedded model, embedded
//!   collection (optionally with tombstones), type data

mod apply;
pub(crate) mod clean;
pub mod error;
pub(crate) mod initialize;
pub mod live;
pub mod path;
pub mod scalar;
pub mod schema;
pub mod type_data;
pub(crate) mod validate;

pub use apply::{ApplyNode, ApplyOptions};
pub use clean::CleanOptions;
pub use error::CoercionFailure;
pub use live::{LiveObject, LiveValue};
pub use path::{FieldPath, PathSegment};
pub use scalar::{FileCategory, FilePathOptions, NumberOptions, StringOptions, is_valid_id};
pub use schema::SchemaField;
pub use type_data::{TypeDataOptions, TypeDataResolution};
pub use validate::FieldValidateOptions;

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::model::ModelClass;

/// A raw source record: a JSON object whose keys follow schema order.
pub type Record = Map<String, Value>;

/// Generator for a default value; receives siblings already resolved earlier in key order.
pub type InitialFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// Custom validation predicate run after the built-in type checks.
pub type ValidatorFn = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Declared default for a field
#[derive(Clone)]
pub enum Initial {
    Value(Value),
    Generator(InitialFn),
}

impl fmt::Debug for Initial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// Attributes shared by every field type
#[derive(Clone, Default)]
pub struct FieldOptions {
    /// The value must be present (non-null) after cleaning
    pub required: bool,
    /// Null is a valid value
    pub nullable: bool,
    /// Default used when the input omits the value
    pub initial: Option<Initial>,
    /// Once set, the value may not be changed by differential updates
    pub readonly: bool,
    pub label: Option<String>,
    pub hint: Option<String>,
    pub validator: Option<ValidatorFn>,
}

impl fmt::Debug for FieldOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldOptions")
            .field("required", &self.required)
            .field("nullable", &self.nullable)
            .field("initial", &self.initial)
            .field("readonly", &self.readonly)
            .field("label", &self.label)
            .field("hint", &self.hint)
            .field("validator", &self.validator.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Element declaration for array and set fields
#[derive(Debug, Clone)]
pub struct ArrayOptions {
    pub element: Box<Field>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

/// The closed set of field types
#[derive(Debug, Clone)]
pub enum FieldKind {
    String(StringOptions),
    Number(NumberOptions),
    Boolean,
    Color,
    FilePath(FilePathOptions),
    /// Arbitrary JSON stored as a serialized string
    Json,
    /// Untyped JSON object
    Object,
    /// The document's own `_id`
    DocumentId,
    /// Id of another document; never dereferenced
    ForeignDocument { model: Option<String> },
    Array(ArrayOptions),
    /// Array whose elements are unique
    Set(ArrayOptions),
    Schema(SchemaField),
    /// A single nested model stored inline
    EmbeddedData(ModelClass),
    /// Keyed collection of nested models
    EmbeddedCollection(ModelClass),
    /// Keyed collection that also records tombstones for removed entries
    EmbeddedCollectionDelta(ModelClass),
    /// Sub-schema selected by a sibling discriminant
    TypeData(TypeDataOptions),
}

impl FieldKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::Boolean => "boolean",
            Self::Color => "color",
            Self::FilePath(_) => "file path",
            Self::Json => "json",
            Self::Object => "object",
            Self::DocumentId => "document id",
            Self::ForeignDocument { .. } => "foreign document",
            Self::Array(_) => "array",
            Self::Set(_) => "set",
            Self::Schema(_) => "schema",
            Self::EmbeddedData(_) => "embedded data",
            Self::EmbeddedCollection(_) => "embedded collection",
            Self::EmbeddedCollectionDelta(_) => "embedded collection delta",
            Self::TypeData(_) => "type data",
        }
    }
}

/// A declared schema property
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    options: FieldOptions,
    kind: FieldKind,
}

impl Field {
    fn with_kind(kind: FieldKind, options: FieldOptions) -> Self {
        Self {
            name: String::new(),
            options,
            kind,
        }
    }

    fn optional() -> FieldOptions {
        FieldOptions::default()
    }

    fn nullable_default() -> FieldOptions {
        FieldOptions {
            nullable: true,
            ..FieldOptions::default()
        }
    }

    fn required_default() -> FieldOptions {
        FieldOptions {
            required: true,
            ..FieldOptions::default()
        }
    }

    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    pub fn string() -> Self {
        Self::with_kind(FieldKind::String(StringOptions::default()), Self::optional())
    }

    /// Rich text; identical to a string field that allows blanks
    pub fn html() -> Self {
        Self::string().blank(true)
    }

    pub fn number() -> Self {
        Self::with_kind(FieldKind::Number(NumberOptions::default()), Self::nullable_default())
    }

    /// Opacity in `[0, 1]`, defaulting to fully opaque
    pub fn alpha() -> Self {
        Self::number().nullable(false).min(0.0).max(1.0).initial(1)
    }

    /// Degrees, wrapped into `[0, 360)`
    pub fn angle() -> Self {
        let mut field = Self::number().nullable(false).initial(0);
        if let FieldKind::Number(options) = &mut field.kind {
            options.normalize_angle = true;
        }
        field
    }

    /// Integer sort key, defaulting to zero
    pub fn integer_sort() -> Self {
        Self::number().nullable(false).integer().initial(0)
    }

    pub fn boolean() -> Self {
        Self::with_kind(FieldKind::Boolean, Self::required_default()).initial(false)
    }

    pub fn color() -> Self {
        Self::with_kind(FieldKind::Color, Self::nullable_default())
    }

    pub fn file_path(categories: impl IntoIterator<Item = FileCategory>) -> Self {
        Self::with_kind(
            FieldKind::FilePath(FilePathOptions {
                categories: categories.into_iter().collect(),
                base64: false,
            }),
            Self::nullable_default(),
        )
    }

    pub fn json() -> Self {
        Self::with_kind(FieldKind::Json, Self::nullable_default())
    }

    pub fn object() -> Self {
        Self::with_kind(FieldKind::Object, Self::required_default())
    }

    /// The `_id` of a document: nullable until assigned, then readonly
    pub fn document_id() -> Self {
        Self::with_kind(
            FieldKind::DocumentId,
            FieldOptions {
                required: true,
                nullable: true,
                readonly: true,
                ..FieldOptions::default()
            },
        )
    }

    /// Reference to another document by id
    pub fn foreign_document(model: Option<&str>) -> Self {
        Self::with_kind(
            FieldKind::ForeignDocument {
                model: model.map(str::to_string),
            },
            Self::nullable_default(),
        )
    }

    pub fn array(element: Field) -> Self {
        Self::with_kind(
            FieldKind::Array(ArrayOptions {
                element: Box::new(element),
                min_length: None,
                max_length: None,
            }),
            Self::required_default(),
        )
    }

    pub fn set(element: Field) -> Self {
        Self::with_kind(
            FieldKind::Set(ArrayOptions {
                element: Box::new(element),
                min_length: None,
                max_length: None,
            }),
            Self::required_default(),
        )
    }

    pub fn schema(schema: SchemaField) -> Self {
        Self::with_kind(FieldKind::Schema(schema), Self::required_default())
    }

    pub fn embedded_data(model: ModelClass) -> Self {
        Self::with_kind(FieldKind::EmbeddedData(model), Self::required_default())
    }

    pub fn embedded_collection(model: ModelClass) -> Self {
        Self::with_kind(FieldKind::EmbeddedCollection(model), Self::required_default())
    }

    pub fn embedded_collection_delta(model: ModelClass) -> Self {
        Self::with_kind(
            FieldKind::EmbeddedCollectionDelta(model),
            Self::required_default(),
        )
    }

    /// Type data keyed by the sibling `type` property
    pub fn type_data<K: Into<String>>(models: impl IntoIterator<Item = (K, ModelClass)>) -> Self {
        Self::with_kind(
            FieldKind::TypeData(TypeDataOptions::new(models)),
            Self::required_default(),
        )
    }

    // -----------------------------------------------------------------------
    // Common builder methods
    // -----------------------------------------------------------------------

    pub fn required(mut self) -> Self {
        self.options.required = true;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.options.nullable = nullable;
        self
    }

    pub fn initial(mut self, value: impl Into<Value>) -> Self {
        self.options.initial = Some(Initial::Value(value.into()));
        self
    }

    /// Compute the default from siblings resolved earlier in schema order.
    pub fn initial_with(
        mut self,
        generator: impl Fn(&Record) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.options.initial = Some(Initial::Generator(Arc::new(generator)));
        self
    }

    pub fn readonly(mut self) -> Self {
        self.options.readonly = true;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.options.label = Some(label.into());
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.options.hint = Some(hint.into());
        self
    }

    pub fn validate_with(
        mut self,
        validator: impl Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.options.validator = Some(Arc::new(validator));
        self
    }

    // -----------------------------------------------------------------------
    // Type-specific builder methods (ignored by unrelated kinds)
    // -----------------------------------------------------------------------

    pub fn choices<V: Into<Value>>(mut self, choices: impl IntoIterator<Item = V>) -> Self {
        let values: Vec<Value> = choices.into_iter().map(Into::into).collect();
        match &mut self.kind {
            FieldKind::String(options) => {
                options.choices = Some(
                    values
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                );
            }
            FieldKind::Number(options) => {
                options.choices = Some(values.iter().filter_map(Value::as_f64).collect());
            }
            _ => {}
        }
        self
    }

    pub fn blank(mut self, blank: bool) -> Self {
        if let FieldKind::String(options) = &mut self.kind {
            options.blank = blank;
        }
        self
    }

    pub fn trim(mut self, trim: bool) -> Self {
        if let FieldKind::String(options) = &mut self.kind {
            options.trim = trim;
        }
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        if let FieldKind::Number(options) = &mut self.kind {
            options.min = Some(min);
        }
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        if let FieldKind::Number(options) = &mut self.kind {
            options.max = Some(max);
        }
        self
    }

    pub fn step(mut self, step: f64) -> Self {
        if let FieldKind::Number(options) = &mut self.kind {
            options.step = Some(step);
        }
        self
    }

    pub fn integer(mut self) -> Self {
        if let FieldKind::Number(options) = &mut self.kind {
            options.integer = true;
        }
        self
    }

    pub fn positive(mut self) -> Self {
        if let FieldKind::Number(options) = &mut self.kind {
            options.positive = true;
        }
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        if let FieldKind::Array(options) | FieldKind::Set(options) = &mut self.kind {
            options.min_length = Some(min);
        }
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        if let FieldKind::Array(options) | FieldKind::Set(options) = &mut self.kind {
            options.max_length = Some(max);
        }
        self
    }

    pub fn base64(mut self) -> Self {
        if let FieldKind::FilePath(options) = &mut self.kind {
            options.base64 = true;
        }
        self
    }

    /// Name of the sibling property selecting a type data sub-schema
    pub fn discriminant(mut self, key: impl Into<String>) -> Self {
        if let FieldKind::TypeData(options) = &mut self.kind {
            options.discriminant = key.into();
        }
        self
    }

    pub(crate) fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Name of this field within its parent schema (empty for array elements)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &FieldOptions {
        &self.options
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.options.required
    }

    pub fn is_nullable(&self) -> bool {
        self.options.nullable
    }

    pub fn is_readonly(&self) -> bool {
        self.options.readonly
    }

    /// Does this field type define parent/child document structure
    pub fn is_hierarchical(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::EmbeddedCollection(_) | FieldKind::EmbeddedCollectionDelta(_)
        )
    }

    /// Does this field type contain other fields
    pub fn is_recursive(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::Array(_)
                | FieldKind::Set(_)
                | FieldKind::Schema(_)
                | FieldKind::EmbeddedData(_)
                | FieldKind::EmbeddedCollection(_)
                | FieldKind::EmbeddedCollectionDelta(_)
                | FieldKind::TypeData(_)
        )
    }

    /// Schema of the nested record held by this field, if it holds exactly one
    pub fn nested_schema(&self) -> Option<&SchemaField> {
        match &self.kind {
            FieldKind::Schema(schema) => Some(schema),
            FieldKind::EmbeddedData(model) => Some(model.schema()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capability_flags() {
        assert!(!Field::string().is_recursive());
        assert!(Field::array(Field::number()).is_recursive());
        assert!(Field::schema(SchemaField::default()).is_recursive());
        assert!(!Field::schema(SchemaField::default()).is_hierarchical());
    }

    #[test]
    fn test_builder_sets_kind_options() {
        let field = Field::number().min(0.0).max(10.0).integer();
        match field.kind() {
            FieldKind::Number(options) => {
                assert_eq!(options.min, Some(0.0));
                assert_eq!(options.max, Some(10.0));
                assert!(options.integer);
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert!(field.is_nullable());
    }

    #[test]
    fn test_choices_map_to_kind() {
        let field = Field::string().choices(["a", "b"]);
        match field.kind() {
            FieldKind::String(options) => {
                assert_eq!(options.choices, Some(vec!["a".to_string(), "b".to_string()]))
            }
            other => panic!("unexpected kind {other:?}"),
        }
        let field = Field::number().choices([json!(1), json!(2)]);
        match field.kind() {
            FieldKind::Number(options) => assert_eq!(options.choices, Some(vec![1.0, 2.0])),
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_presets() {
        assert_eq!(Field::alpha().initial_value(&Record::new()), json!(1));
        assert_eq!(Field::integer_sort().initial_value(&Record::new()), json!(0));
        assert!(Field::document_id().is_readonly());
    }
}
