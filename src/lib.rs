//! Document Model SDK - schema-driven documents with cleaning, validation
//! and differential updates
//!
//! Provides:
//! - Typed schema fields that clean and validate JSON values
//! - Model classes with migration and joint validation hooks
//! - Data model instances with live data and differential source updates
//! - Embedded collections keyed by `_id`, with quarantine of invalid records
//!
//! ```
//! use document_model_sdk::{DataModel, Field, ModelClass, ModelOptions, SchemaField};
//! use serde_json::json;
//!
//! let monster = ModelClass::builder("Monster")
//!     .schema(
//!         SchemaField::new()
//!             .field("name", Field::string().required())
//!             .field("hp", Field::number().integer().min(0.0).initial(10)),
//!     )
//!     .build();
//!
//! let source = json!({"name": "Goblin"}).as_object().unwrap().clone();
//! let goblin = DataModel::new(monster, source, &ModelOptions::default()).unwrap();
//! assert_eq!(goblin.source()["hp"], json!(10));
//! ```

pub mod collection;
pub mod fields;
pub mod model;
pub mod validation;

// Re-export commonly used types
pub use collection::{CollectionOptions, EmbeddedCollection, GetOptions, SetOptions};
pub use fields::{
    CleanOptions, CoercionFailure, Field, FieldKind, FieldPath, LiveObject, LiveValue, PathSegment,
    Record, SchemaField,
};
pub use model::{
    DataModel, ModelClass, ModelDefinition, ModelError, ModelOptions, ParentLink, UpdateOptions,
    ValidateOptions,
};
pub use validation::ValidationFailure;
