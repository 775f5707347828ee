//! Model classes and their instances
//!
//! A [`ModelClass`] pairs a name with a lazily built schema and optional
//! migration and joint-validation hooks. A [`DataModel`] is one instance:
//! its cleaned source record plus the live data derived from it.

pub mod class;
pub mod config;
pub mod data_model;
pub mod diff;
pub mod error;

pub use class::{ModelClass, ModelClassBuilder, ModelDefinition};
pub use config::{
    ModelOptions, ModelOptionsBuilder, UpdateOptions, UpdateOptionsBuilder, ValidateOptions,
    ValidateOptionsBuilder,
};
pub use data_model::{CollectionMut, DataModel, ParentLink};
pub use error::ModelError;
