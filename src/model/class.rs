//! Model classes: a named schema plus class-level hooks

use once_cell::sync::OnceCell;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::config::ModelOptions;
use super::data_model::DataModel;
use super::error::ModelError;
use crate::collection::is_tombstone;
use crate::fields::validate::ValidateContext;
use crate::fields::{ApplyOptions, CleanOptions, CoercionFailure, FieldKind, Record, SchemaField};
use crate::validation::ValidationFailure;

/// Class-level declaration of a document type.
///
/// Implementors declare the schema once; it is built lazily on first use and
/// shared by every instance of the class.
pub trait ModelDefinition: Send + Sync + 'static {
    /// Name used in logs and error messages
    fn name(&self) -> &str;

    /// Build the top-level schema
    fn define_schema(&self) -> SchemaField;

    /// Rewrite legacy shapes in a raw source record before cleaning
    fn migrate_data(&self, _source: &mut Record) -> anyhow::Result<()> {
        Ok(())
    }

    /// Check invariants spanning several fields of a cleaned record
    fn validate_joint(&self, _source: &Record) -> anyhow::Result<()> {
        Ok(())
    }
}

struct ModelInner {
    definition: Box<dyn ModelDefinition>,
    schema: OnceCell<SchemaField>,
}

/// Shared handle to a model definition and its schema
#[derive(Clone)]
pub struct ModelClass {
    inner: Arc<ModelInner>,
}

impl ModelClass {
    pub fn new(definition: impl ModelDefinition) -> Self {
        Self {
            inner: Arc::new(ModelInner {
                definition: Box::new(definition),
                schema: OnceCell::new(),
            }),
        }
    }

    /// Declare a model class from closures instead of a [`ModelDefinition`] impl
    pub fn builder(name: impl Into<String>) -> ModelClassBuilder {
        ModelClassBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        self.inner.definition.name()
    }

    pub fn definition(&self) -> &dyn ModelDefinition {
        self.inner.definition.as_ref()
    }

    pub fn schema(&self) -> &SchemaField {
        self.inner.schema.get_or_init(|| {
            debug!("Defining schema for {}", self.name());
            self.inner.definition.define_schema()
        })
    }

    /// Migrate a raw record, then every embedded record below it with the
    /// embedded model's own migration.
    pub fn migrate_data(&self, source: &mut Record) -> Result<(), ModelError> {
        self.migrate_own(source)?;
        self.schema().apply(
            source,
            &ApplyOptions { models: true },
            &mut |node, value| {
                if let (Some(model), Value::Object(record)) = (node.model, &mut *value) {
                    model.migrate_own(record)?;
                }
                if let (
                    FieldKind::EmbeddedCollection(model)
                    | FieldKind::EmbeddedCollectionDelta(model),
                    Value::Array(items),
                ) = (node.field.kind(), value)
                {
                    for item in items.iter_mut() {
                        if let Value::Object(record) = item
                            && !is_tombstone(record)
                        {
                            model.migrate_own(record)?;
                        }
                    }
                }
                Ok(())
            },
        )
    }

    /// Migration that never fails: on error the input is returned unchanged.
    pub fn migrate_data_safe(&self, source: Record) -> Record {
        let mut migrated = source.clone();
        match self.migrate_data(&mut migrated) {
            Ok(()) => migrated,
            Err(e) => {
                warn!("Ignoring failed migration: {}", e);
                source
            }
        }
    }

    fn migrate_own(&self, record: &mut Record) -> Result<(), ModelError> {
        self.inner
            .definition
            .migrate_data(record)
            .map_err(|source| ModelError::Migration {
                model: self.name().to_string(),
                source,
            })
    }

    pub fn clean_data(
        &self,
        source: Record,
        options: &CleanOptions,
    ) -> Result<Record, CoercionFailure> {
        self.schema().clean(source, options)
    }

    pub fn validate_joint(&self, source: &Record) -> anyhow::Result<()> {
        self.inner.definition.validate_joint(source)
    }

    /// Field validation followed by joint validation once every field is valid.
    pub(crate) fn validate_record(
        &self,
        record: &mut Record,
        ctx: &ValidateContext<'_>,
    ) -> Result<(), ValidationFailure> {
        let mut failure = self.schema().validate_record(record, ctx).err().unwrap_or_default();
        if ctx.joint
            && !ctx.partial
            && !failure.is_unresolved()
            && let Err(e) = self.validate_joint(record)
        {
            failure.message = Some(e.to_string());
            failure.unresolved = true;
        }
        if failure.is_empty() {
            Ok(())
        } else {
            Err(failure)
        }
    }

    /// Construct an instance from untrusted input
    pub fn construct(
        &self,
        source: Record,
        options: &ModelOptions,
    ) -> Result<DataModel, ModelError> {
        DataModel::new(self.clone(), source, options)
    }

    /// Construct an instance from trusted (persisted) input
    pub fn from_source(&self, source: Record) -> Result<DataModel, ModelError> {
        DataModel::from_source(self.clone(), source)
    }
}

impl PartialEq for ModelClass {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.name() == other.name()
    }
}

impl fmt::Debug for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClass").field("name", &self.name()).finish()
    }
}

type MigrateFn = Box<dyn Fn(&mut Record) -> anyhow::Result<()> + Send + Sync>;
type JointFn = Box<dyn Fn(&Record) -> anyhow::Result<()> + Send + Sync>;

/// Builder for closure-backed model classes
pub struct ModelClassBuilder {
    name: String,
    schema: SchemaField,
    migrate: Option<MigrateFn>,
    joint: Option<JointFn>,
}

impl ModelClassBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: SchemaField::new(),
            migrate: None,
            joint: None,
        }
    }

    pub fn schema(mut self, schema: SchemaField) -> Self {
        self.schema = schema;
        self
    }

    pub fn migration(
        mut self,
        migrate: impl Fn(&mut Record) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.migrate = Some(Box::new(migrate));
        self
    }

    pub fn joint(
        mut self,
        joint: impl Fn(&Record) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.joint = Some(Box::new(joint));
        self
    }

    pub fn build(self) -> ModelClass {
        ModelClass::new(ClosureModel {
            name: self.name,
            schema: self.schema,
            migrate: self.migrate,
            joint: self.joint,
        })
    }
}

struct ClosureModel {
    name: String,
    schema: SchemaField,
    migrate: Option<MigrateFn>,
    joint: Option<JointFn>,
}

impl ModelDefinition for ClosureModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn define_schema(&self) -> SchemaField {
        self.schema.clone()
    }

    fn migrate_data(&self, source: &mut Record) -> anyhow::Result<()> {
        match &self.migrate {
            Some(migrate) => migrate(source),
            None => Ok(()),
        }
    }

    fn validate_joint(&self, source: &Record) -> anyhow::Result<()> {
        match &self.joint {
            Some(joint) => joint(source),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_schema_is_built_once() {
        let class = ModelClass::builder("Item")
            .schema(SchemaField::new().field("name", Field::string()))
            .build();
        assert!(std::ptr::eq(class.schema(), class.schema()));
        assert_eq!(class.schema().len(), 1);
    }

    #[test]
    fn test_migration_renames_legacy_key() {
        let class = ModelClass::builder("Item")
            .schema(SchemaField::new().field("name", Field::string()))
            .migration(|source| {
                if let Some(label) = source.remove("label") {
                    source.insert("name".to_string(), label);
                }
                Ok(())
            })
            .build();
        let mut source = record(json!({"label": "Sword"}));
        class.migrate_data(&mut source).unwrap();
        assert_eq!(Value::Object(source), json!({"name": "Sword"}));
    }

    #[test]
    fn test_migration_reaches_embedded_records() {
        let item = ModelClass::builder("Item")
            .schema(SchemaField::new().field("name", Field::string()))
            .migration(|source| {
                if let Some(Value::String(name)) = source.get_mut("name") {
                    *name = name.to_uppercase();
                }
                Ok(())
            })
            .build();
        let actor = ModelClass::builder("Actor")
            .schema(
                SchemaField::new()
                    .field("weapon", Field::embedded_data(item.clone()))
                    .field("items", Field::embedded_collection(item)),
            )
            .build();
        let mut source = record(json!({
            "weapon": {"name": "sword"},
            "items": [{"_id": "a", "name": "shield"}]
        }));
        actor.migrate_data(&mut source).unwrap();
        assert_eq!(source["weapon"]["name"], json!("SWORD"));
        assert_eq!(source["items"][0]["name"], json!("SHIELD"));
    }

    #[test]
    fn test_safe_migration_returns_input_on_failure() {
        let class = ModelClass::builder("Broken")
            .migration(|_| anyhow::bail!("cannot migrate"))
            .build();
        let source = record(json!({"a": 1}));
        assert_eq!(class.migrate_data_safe(source.clone()), source);
        assert!(matches!(
            class.migrate_data(&mut source.clone()),
            Err(ModelError::Migration { .. })
        ));
    }

    #[test]
    fn test_class_equality_by_name() {
        let a = ModelClass::builder("Item").build();
        let b = ModelClass::builder("Item").build();
        assert_eq!(a, b);
        assert_ne!(a, ModelClass::builder("Other").build());
    }
}
