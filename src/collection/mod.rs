//! Embedded collections
//!
//! An [`EmbeddedCollection`] holds the child documents of one collection
//! field, keyed by `_id`. Its source is the ordered list of backing records;
//! its live view maps each id to a constructed [`DataModel`].
//!
//! A record that cannot be constructed does not poison its siblings or the
//! parent document: it is quarantined, stays in the source, and remains
//! reachable through [`EmbeddedCollection::get_invalid`].

pub mod config;

pub use config::{CollectionOptions, GetOptions, SetOptions};

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::fields::Record;
use crate::model::diff::merge_records;
use crate::model::{DataModel, ModelClass, ModelError, ModelOptions, ParentLink, UpdateOptions};

pub const ID_KEY: &str = "_id";
pub const TOMBSTONE_KEY: &str = "_tombstone";

/// Length of generated document ids
pub const ID_LENGTH: usize = 16;

/// Non-empty `_id` of a record
pub fn record_id(record: &Record) -> Option<&str> {
    record
        .get(ID_KEY)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

pub fn is_tombstone(record: &Record) -> bool {
    record
        .get(TOMBSTONE_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Record marking `id` as deleted in a delta collection
pub fn tombstone(id: &str) -> Record {
    let mut record = Record::new();
    record.insert(ID_KEY.to_string(), Value::String(id.to_string()));
    record.insert(TOMBSTONE_KEY.to_string(), Value::Bool(true));
    record
}

/// Deterministic id for a record that arrived without one.
///
/// Derived from the model name, position and content so cleaning the same
/// input twice assigns the same id.
pub fn generate_id(model: &str, index: usize, record: &Record) -> String {
    let key = format!("{}:{}:{}", model, index, Value::Object(record.clone()));
    let mut id = Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).simple().to_string();
    id.truncate(ID_LENGTH);
    id
}

/// Return the record's id, assigning a generated one when it has none.
pub(crate) fn ensure_id(record: &mut Record, model: &str, index: usize) -> String {
    if let Some(id) = record_id(record) {
        return id.to_string();
    }
    let id = generate_id(model, index, record);
    record.insert(ID_KEY.to_string(), Value::String(id.clone()));
    id
}

/// Staged change produced by [`EmbeddedCollection::update`]
enum Staged {
    Upsert(DataModel),
    Delete,
}

/// Keyed collection of embedded documents
#[derive(Debug, Clone)]
pub struct EmbeddedCollection {
    model: ModelClass,
    field: String,
    parent: Option<ParentLink>,
    delta: bool,
    source: IndexMap<String, Record>,
    documents: IndexMap<String, DataModel>,
    invalid: IndexMap<String, DataModel>,
    tombstones: IndexSet<String>,
}

impl EmbeddedCollection {
    /// Build an uninitialized collection over `records`.
    ///
    /// Records without an id receive a generated one. When two records share
    /// an id the later one wins and takes the earlier one's position.
    pub fn new(
        model: ModelClass,
        field: impl Into<String>,
        records: Vec<Record>,
        delta: bool,
    ) -> Self {
        let field = field.into();
        let mut source = IndexMap::with_capacity(records.len());
        for (i, mut record) in records.into_iter().enumerate() {
            let id = ensure_id(&mut record, model.name(), i);
            if source.insert(id.clone(), record).is_some() {
                warn!("Duplicate id {} in collection {}; keeping the last record", id, field);
            }
        }
        Self {
            model,
            field,
            parent: None,
            delta,
            source,
            documents: IndexMap::new(),
            invalid: IndexMap::new(),
            tombstones: IndexSet::new(),
        }
    }

    pub fn with_parent(mut self, parent: Option<ParentLink>) -> Self {
        self.parent = parent;
        self
    }

    /// Construct a child document for every backing record.
    ///
    /// In strict mode the first failure is returned. Otherwise failing
    /// records are quarantined and their ids listed by
    /// [`invalid_document_ids`](Self::invalid_document_ids).
    pub fn initialize(&mut self, options: &CollectionOptions) -> Result<(), ModelError> {
        self.documents.clear();
        self.invalid.clear();
        self.tombstones.clear();

        for (id, record) in &self.source {
            if self.delta && is_tombstone(record) {
                self.tombstones.insert(id.clone());
                continue;
            }
            let constructed = construct_child(
                &self.model,
                record.clone(),
                self.parent.as_ref(),
                options.strict,
            );
            match constructed {
                Ok(document) => {
                    self.documents.insert(id.clone(), document);
                }
                Err(e) if options.strict => {
                    return Err(ModelError::Construction {
                        model: self.model.name().to_string(),
                        field: self.field.clone(),
                        id: id.clone(),
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        "Quarantining invalid {} {} in collection {}: {}",
                        self.model.name(),
                        id,
                        self.field,
                        e
                    );
                    let failure = e.failure().cloned();
                    let degraded = DataModel::quarantined(
                        self.model.clone(),
                        record.clone(),
                        self.parent.clone(),
                        failure,
                    );
                    self.invalid.insert(id.clone(), degraded);
                }
            }
        }
        debug!(
            "Initialized collection {} with {} documents, {} invalid",
            self.field,
            self.documents.len(),
            self.invalid.len()
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<&DataModel> {
        self.documents.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut DataModel> {
        self.documents.get_mut(id)
    }

    pub fn get_with(
        &self,
        id: &str,
        options: &GetOptions,
    ) -> Result<Option<&DataModel>, ModelError> {
        if let Some(document) = self.documents.get(id) {
            return Ok(Some(document));
        }
        if options.invalid
            && let Some(document) = self.invalid.get(id)
        {
            return Ok(Some(document));
        }
        if options.strict {
            return Err(ModelError::NotFound {
                field: self.field.clone(),
                id: id.to_string(),
            });
        }
        Ok(None)
    }

    /// Degraded instance of a quarantined record
    pub fn get_invalid(&self, id: &str) -> Option<&DataModel> {
        self.invalid.get(id)
    }

    pub fn invalid_document_ids(&self) -> Vec<&str> {
        self.invalid.keys().map(String::as_str).collect()
    }

    pub fn tombstone_ids(&self) -> Vec<&str> {
        self.tombstones.iter().map(String::as_str).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.documents.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataModel)> {
        self.documents.iter().map(|(id, doc)| (id.as_str(), doc))
    }

    /// Number of valid live documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn model(&self) -> &ModelClass {
        &self.model
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    pub fn is_delta(&self) -> bool {
        self.delta
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Insert or replace a live document.
    pub fn set(&mut self, id: &str, document: DataModel, options: &SetOptions) {
        if options.modify_source {
            let mut record = document.to_object(true);
            record.insert(ID_KEY.to_string(), Value::String(id.to_string()));
            self.source.insert(id.to_string(), record);
        }
        self.invalid.shift_remove(id);
        self.tombstones.shift_remove(id);
        if let Some(existing) = self.documents.get_mut(id) {
            *existing = document;
            return;
        }
        // Live order follows source order, also for ids that were
        // quarantined or tombstoned until now.
        match self.source.get_index_of(id) {
            Some(position) => {
                let index = self
                    .source
                    .keys()
                    .take(position)
                    .filter(|key| self.documents.contains_key(key.as_str()))
                    .count();
                self.documents.shift_insert(index, id.to_string(), document);
            }
            None => {
                self.documents.insert(id.to_string(), document);
            }
        }
    }

    /// Remove a document, valid or quarantined. Delta collections leave a
    /// tombstone in the source.
    pub fn delete(&mut self, id: &str, options: &SetOptions) -> Option<DataModel> {
        let removed = self
            .documents
            .shift_remove(id)
            .or_else(|| self.invalid.shift_remove(id));
        if options.modify_source {
            if self.delta {
                self.source.insert(id.to_string(), tombstone(id));
                self.tombstones.insert(id.to_string());
            } else {
                self.source.shift_remove(id);
            }
        }
        removed
    }

    /// Upsert child documents by id.
    ///
    /// Existing documents receive a differential update; unknown ids are
    /// constructed. In delta collections a tombstone change deletes. All
    /// changes are staged first, so any failure leaves the collection
    /// untouched. Returns the applied diff of each change, keyed by `_id`.
    pub fn update(
        &mut self,
        changes: Vec<Record>,
        options: &UpdateOptions,
    ) -> Result<Vec<Record>, ModelError> {
        let mut grouped: IndexMap<String, Record> = IndexMap::with_capacity(changes.len());
        for change in changes {
            let Some(id) = record_id(&change).map(str::to_string) else {
                return Err(ModelError::MissingId {
                    field: self.field.clone(),
                });
            };
            match grouped.get_mut(&id) {
                Some(existing) if !is_tombstone(&change) && !is_tombstone(existing) => {
                    merge_records(existing, &change, true)
                }
                _ => {
                    grouped.insert(id, change);
                }
            }
        }

        let mut staged = Vec::with_capacity(grouped.len());
        let mut diffs = Vec::with_capacity(grouped.len());
        for (id, change) in grouped {
            if is_tombstone(&change) {
                if self.delta || self.source.contains_key(&id) {
                    diffs.push(tombstone(&id));
                    staged.push((id, Staged::Delete));
                }
                continue;
            }

            let mut diff = if let Some(existing) = self.documents.get(&id) {
                let mut document = existing.clone();
                let update = UpdateOptions {
                    dry_run: false,
                    ..options.clone()
                };
                let diff = document.update_source(change, &update)?;
                staged.push((id.clone(), Staged::Upsert(document)));
                diff
            } else {
                let mut record = self
                    .invalid
                    .get(&id)
                    .map(|d| d.source().clone())
                    .unwrap_or_default();
                merge_records(&mut record, &change, true);
                let child_options = ModelOptions {
                    parent: self.parent.clone(),
                    fallback: options.fallback,
                    ..ModelOptions::default()
                };
                let document = DataModel::new(self.model.clone(), record, &child_options)?;
                let diff = document.to_object(true);
                staged.push((id.clone(), Staged::Upsert(document)));
                diff
            };
            if diff.is_empty() {
                continue;
            }
            diff.insert(ID_KEY.to_string(), Value::String(id));
            diffs.push(diff);
        }

        if options.dry_run {
            return Ok(diffs);
        }
        let set = SetOptions::default();
        for (id, change) in staged {
            match change {
                Staged::Upsert(document) => self.set(&id, document, &set),
                Staged::Delete => {
                    self.delete(&id, &set);
                }
            }
        }
        Ok(diffs)
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    /// Export from the backing source (`true`, including quarantined records
    /// and tombstones) or from the valid live documents (`false`).
    pub fn to_object(&self, source: bool) -> Vec<Record> {
        if source {
            self.source.values().cloned().collect()
        } else {
            self.documents.values().map(|d| d.to_object(false)).collect()
        }
    }

    /// The backing records as a JSON array value
    pub fn source_array(&self) -> Vec<Value> {
        self.source.values().cloned().map(Value::Object).collect()
    }
}

impl PartialEq for EmbeddedCollection {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model && self.field == other.field && self.source == other.source
    }
}

fn construct_child(
    model: &ModelClass,
    record: Record,
    parent: Option<&ParentLink>,
    strict_embedded: bool,
) -> Result<DataModel, ModelError> {
    let options = ModelOptions {
        parent: parent.cloned(),
        strict: true,
        fallback: false,
        partial: false,
        strict_embedded,
    };
    DataModel::new(model.clone(), record, &options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{Field, SchemaField};
    use serde_json::json;

    fn item() -> ModelClass {
        ModelClass::builder("Item")
            .schema(
                SchemaField::new()
                    .field("_id", Field::document_id())
                    .field("name", Field::string().blank(false).required())
                    .field("quantity", Field::number().integer().min(0.0).initial(1)),
            )
            .build()
    }

    fn records(value: Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    fn collection(value: Value) -> EmbeddedCollection {
        let mut collection = EmbeddedCollection::new(item(), "items", records(value), false);
        collection.initialize(&CollectionOptions::default()).unwrap();
        collection
    }

    #[test]
    fn test_generated_ids_are_stable() {
        let record = json!({"name": "Rope"}).as_object().unwrap().clone();
        let a = generate_id("Item", 0, &record);
        assert_eq!(a, generate_id("Item", 0, &record));
        assert_ne!(a, generate_id("Item", 1, &record));
        assert_eq!(a.len(), ID_LENGTH);
        assert!(crate::fields::is_valid_id(&a));
    }

    #[test]
    fn test_invalid_record_is_quarantined() {
        let collection = collection(json!([
            {"_id": "aaaaaaaaaaaaaaaa", "name": "Sword"},
            {"_id": "bbbbbbbbbbbbbbbb", "name": ""},
            {"_id": "cccccccccccccccc", "name": "Shield"}
        ]));
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.invalid_document_ids(), vec!["bbbbbbbbbbbbbbbb"]);
        assert!(collection.get("bbbbbbbbbbbbbbbb").is_none());
        assert!(collection.get_invalid("bbbbbbbbbbbbbbbb").is_some());
        assert_eq!(collection.to_object(true).len(), 3);
    }

    #[test]
    fn test_strict_initialize_fails() {
        let mut collection = EmbeddedCollection::new(
            item(),
            "items",
            records(json!([{"_id": "bbbbbbbbbbbbbbbb", "name": ""}])),
            false,
        );
        let err = collection
            .initialize(&CollectionOptions::builder().strict(true).build())
            .unwrap_err();
        assert!(matches!(err, ModelError::Construction { .. }));
    }

    #[test]
    fn test_duplicate_ids_keep_last_at_first_position() {
        let collection = collection(json!([
            {"_id": "aaaaaaaaaaaaaaaa", "name": "First"},
            {"_id": "cccccccccccccccc", "name": "Other"},
            {"_id": "aaaaaaaaaaaaaaaa", "name": "Second"}
        ]));
        assert_eq!(
            collection.ids().collect::<Vec<_>>(),
            vec!["aaaaaaaaaaaaaaaa", "cccccccccccccccc"]
        );
        assert_eq!(
            collection.get("aaaaaaaaaaaaaaaa").unwrap().source()["name"],
            json!("Second")
        );
    }

    #[test]
    fn test_get_with_options() {
        let collection = collection(json!([{"_id": "bbbbbbbbbbbbbbbb", "name": ""}]));
        assert!(collection.get_with("missing", &GetOptions::default()).unwrap().is_none());
        assert!(matches!(
            collection.get_with("missing", &GetOptions { strict: true, invalid: false }),
            Err(ModelError::NotFound { .. })
        ));
        let found = collection
            .get_with("bbbbbbbbbbbbbbbb", &GetOptions { strict: true, invalid: true })
            .unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_update_upserts_by_id() {
        let mut collection =
            collection(json!([{"_id": "aaaaaaaaaaaaaaaa", "name": "Sword", "quantity": 1}]));
        let diffs = collection
            .update(
                records(json!([
                    {"_id": "aaaaaaaaaaaaaaaa", "quantity": 3},
                    {"_id": "dddddddddddddddd", "name": "Torch"}
                ])),
                &UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(diffs.len(), 2);
        assert_eq!(
            Value::Object(diffs[0].clone()),
            json!({"quantity": 3, "_id": "aaaaaaaaaaaaaaaa"})
        );
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.get("aaaaaaaaaaaaaaaa").unwrap().source()["quantity"], json!(3));
        assert_eq!(collection.to_object(true).len(), 2);
    }

    #[test]
    fn test_update_is_all_or_nothing() {
        let mut collection = collection(json!([{"_id": "aaaaaaaaaaaaaaaa", "name": "Sword"}]));
        let before = collection.clone();
        let result = collection.update(
            records(json!([
                {"_id": "aaaaaaaaaaaaaaaa", "quantity": 5},
                {"_id": "dddddddddddddddd", "name": "Torch", "quantity": -1}
            ])),
            &UpdateOptions::default(),
        );
        assert!(result.is_err());
        assert_eq!(collection, before);
        assert_eq!(collection.get("aaaaaaaaaaaaaaaa").unwrap().source()["quantity"], json!(1));
    }

    #[test]
    fn test_update_requires_ids() {
        let mut collection = collection(json!([]));
        let err = collection
            .update(records(json!([{"name": "Torch"}])), &UpdateOptions::default())
            .unwrap_err();
        assert!(matches!(err, ModelError::MissingId { .. }));
    }

    fn source_ids(collection: &EmbeddedCollection) -> Vec<String> {
        collection
            .to_object(true)
            .iter()
            .filter_map(|record| record_id(record).map(str::to_string))
            .collect()
    }

    #[test]
    fn test_set_repairs_quarantined_first_record_in_place() {
        let mut collection = collection(json!([
            {"_id": "aaaaaaaaaaaaaaaa", "name": ""},
            {"_id": "bbbbbbbbbbbbbbbb", "name": "Sword"},
            {"_id": "cccccccccccccccc", "name": "Shield"}
        ]));
        let repaired = construct_child(
            &item(),
            json!({"_id": "aaaaaaaaaaaaaaaa", "name": "Axe"}).as_object().unwrap().clone(),
            None,
            false,
        )
        .unwrap();
        collection.set("aaaaaaaaaaaaaaaa", repaired, &SetOptions::default());
        assert!(collection.invalid_document_ids().is_empty());
        assert_eq!(
            collection.ids().collect::<Vec<_>>(),
            vec!["aaaaaaaaaaaaaaaa", "bbbbbbbbbbbbbbbb", "cccccccccccccccc"]
        );
        assert_eq!(collection.ids().collect::<Vec<_>>(), source_ids(&collection));
    }

    #[test]
    fn test_update_repairs_quarantined_middle_record_in_place() {
        let mut collection = collection(json!([
            {"_id": "aaaaaaaaaaaaaaaa", "name": "Sword"},
            {"_id": "bbbbbbbbbbbbbbbb", "name": "Bow", "quantity": -1},
            {"_id": "cccccccccccccccc", "name": "Shield"}
        ]));
        assert_eq!(collection.len(), 2);
        collection
            .update(
                records(json!([{"_id": "bbbbbbbbbbbbbbbb", "quantity": 2}])),
                &UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(
            collection.ids().collect::<Vec<_>>(),
            vec!["aaaaaaaaaaaaaaaa", "bbbbbbbbbbbbbbbb", "cccccccccccccccc"]
        );
        assert_eq!(collection.ids().collect::<Vec<_>>(), source_ids(&collection));
    }

    #[test]
    fn test_delta_delete_leaves_tombstone() {
        let mut collection = EmbeddedCollection::new(
            item(),
            "items",
            records(json!([{"_id": "aaaaaaaaaaaaaaaa", "name": "Sword"}])),
            true,
        );
        collection.initialize(&CollectionOptions::default()).unwrap();
        assert!(collection.delete("aaaaaaaaaaaaaaaa", &SetOptions::default()).is_some());
        assert!(collection.is_empty());
        assert_eq!(collection.tombstone_ids(), vec!["aaaaaaaaaaaaaaaa"]);
        assert_eq!(
            Value::Array(collection.source_array()),
            json!([{"_id": "aaaaaaaaaaaaaaaa", "_tombstone": true}])
        );
    }
}
