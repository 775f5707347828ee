//! Validation results
//!
//! Field and model validation report a [`ValidationFailure`] tree that
//! mirrors the shape of the validated data.

pub mod failure;

pub use failure::{ElementFailure, ValidationFailure};
