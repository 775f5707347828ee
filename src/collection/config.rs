//! Options for embedded collections

use serde::{Deserialize, Serialize};

/// Options for initializing an embedded collection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionOptions {
    /// Fail on the first record that cannot be constructed instead of
    /// quarantining it
    pub strict: bool,
}

impl CollectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> CollectionOptionsBuilder {
        CollectionOptionsBuilder::default()
    }
}

/// Builder for CollectionOptions
#[derive(Debug, Default)]
pub struct CollectionOptionsBuilder {
    options: CollectionOptions,
}

impl CollectionOptionsBuilder {
    pub fn strict(mut self, strict: bool) -> Self {
        self.options.strict = strict;
        self
    }

    pub fn build(self) -> CollectionOptions {
        self.options
    }
}

/// Options for [`EmbeddedCollection::get_with`](super::EmbeddedCollection::get_with)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetOptions {
    /// Return an error when the id is absent
    pub strict: bool,
    /// Also return quarantined documents
    pub invalid: bool,
}

/// Options for collection mutations
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetOptions {
    /// Mirror the change into the collection's source records
    pub modify_source: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self { modify_source: true }
    }
}
