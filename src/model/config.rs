//! Options for constructing, validating and updating data models

use serde::{Deserialize, Serialize};

use super::data_model::ParentLink;
use crate::fields::Record;

/// Options for constructing a data model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOptions {
    /// Document this model is embedded in, for lookup only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentLink>,

    /// Raise when validation fails instead of logging and keeping the data
    pub strict: bool,

    /// Replace invalid values with their declared initial value where possible
    pub fallback: bool,

    /// Missing keys are left missing instead of receiving initial values
    pub partial: bool,

    /// Raise on embedded collection records that fail to construct
    /// instead of quarantining them
    pub strict_embedded: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            parent: None,
            strict: true,
            fallback: false,
            partial: false,
            strict_embedded: false,
        }
    }
}

impl ModelOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for data read from a trusted store: non-strict, no fallback
    pub fn trusted() -> Self {
        Self {
            strict: false,
            ..Self::default()
        }
    }

    /// Create a builder for custom options
    pub fn builder() -> ModelOptionsBuilder {
        ModelOptionsBuilder::default()
    }
}

/// Builder for ModelOptions
#[derive(Debug, Default)]
pub struct ModelOptionsBuilder {
    options: ModelOptions,
}

impl ModelOptionsBuilder {
    pub fn parent(mut self, parent: ParentLink) -> Self {
        self.options.parent = Some(parent);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.options.strict = strict;
        self
    }

    pub fn fallback(mut self, fallback: bool) -> Self {
        self.options.fallback = fallback;
        self
    }

    pub fn partial(mut self, partial: bool) -> Self {
        self.options.partial = partial;
        self
    }

    pub fn strict_embedded(mut self, strict: bool) -> Self {
        self.options.strict_embedded = strict;
        self
    }

    pub fn build(self) -> ModelOptions {
        self.options
    }
}

/// Options for [`DataModel::validate`](super::DataModel::validate)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateOptions {
    /// Validate only this differential payload instead of the full source
    pub changes: Option<Record>,

    /// Clean the payload before validating it
    pub clean: bool,

    /// Replace invalid values with their initial value where possible
    pub fallback: bool,

    /// Return an error on failure instead of logging and returning `false`
    pub strict: bool,

    /// Run per-field validation
    pub fields: bool,

    /// Run joint validation. Defaults to on for full validation and off
    /// when `changes` is given.
    pub joint: Option<bool>,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            changes: None,
            clean: false,
            fallback: false,
            strict: true,
            fields: true,
            joint: None,
        }
    }
}

impl ValidateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ValidateOptionsBuilder {
        ValidateOptionsBuilder::default()
    }

    pub(crate) fn run_joint(&self) -> bool {
        self.joint.unwrap_or(self.changes.is_none())
    }
}

/// Builder for ValidateOptions
#[derive(Debug, Default)]
pub struct ValidateOptionsBuilder {
    options: ValidateOptions,
}

impl ValidateOptionsBuilder {
    pub fn changes(mut self, changes: Record) -> Self {
        self.options.changes = Some(changes);
        self
    }

    pub fn clean(mut self, clean: bool) -> Self {
        self.options.clean = clean;
        self
    }

    pub fn fallback(mut self, fallback: bool) -> Self {
        self.options.fallback = fallback;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.options.strict = strict;
        self
    }

    pub fn fields(mut self, fields: bool) -> Self {
        self.options.fields = fields;
        self
    }

    pub fn joint(mut self, joint: bool) -> Self {
        self.options.joint = Some(joint);
        self
    }

    pub fn build(self) -> ValidateOptions {
        self.options
    }
}

/// Options for [`DataModel::update_source`](super::DataModel::update_source)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOptions {
    /// Compute and return the diff without modifying the source
    pub dry_run: bool,

    /// Replace invalid values in the changes with their initial value
    pub fallback: bool,

    /// Deep-merge nested objects; when off, top-level values are replaced wholesale
    pub recursive: bool,

    /// Run joint validation against the merged record
    pub joint: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            fallback: false,
            recursive: true,
            joint: false,
        }
    }
}

impl UpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> UpdateOptionsBuilder {
        UpdateOptionsBuilder::default()
    }
}

/// Builder for UpdateOptions
#[derive(Debug, Default)]
pub struct UpdateOptionsBuilder {
    options: UpdateOptions,
}

impl UpdateOptionsBuilder {
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.options.dry_run = dry_run;
        self
    }

    pub fn fallback(mut self, fallback: bool) -> Self {
        self.options.fallback = fallback;
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.options.recursive = recursive;
        self
    }

    pub fn joint(mut self, joint: bool) -> Self {
        self.options.joint = joint;
        self
    }

    pub fn build(self) -> UpdateOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_model_options() {
        let options = ModelOptions::default();
        assert!(options.strict);
        assert!(!options.fallback);
        assert!(!ModelOptions::trusted().strict);
    }

    #[test]
    fn test_joint_defaults_follow_changes() {
        assert!(ValidateOptions::default().run_joint());
        let changes = json!({"hp": 1}).as_object().unwrap().clone();
        let options = ValidateOptions::builder().changes(changes.clone()).build();
        assert!(!options.run_joint());
        let forced = ValidateOptions::builder().changes(changes).joint(true).build();
        assert!(forced.run_joint());
    }

    #[test]
    fn test_update_builder() {
        let options = UpdateOptions::builder().dry_run(true).recursive(false).build();
        assert!(options.dry_run);
        assert!(!options.recursive);
        assert!(!options.joint);
    }

    #[test]
    fn test_options_serialize_camel_case() {
        let value = serde_json::to_value(ModelOptions::default()).unwrap();
        assert_eq!(value["strictEmbedded"], json!(false));
    }
}
