//! Type data: a sub-schema selected by a sibling discriminant

use indexmap::IndexMap;
use serde_json::Value;

use super::Record;
use crate::model::ModelClass;

pub const DEFAULT_DISCRIMINANT: &str = "type";

#[derive(Debug, Clone)]
pub struct TypeDataOptions {
    /// Sibling property naming the subtype
    pub discriminant: String,
    /// Registered subtype models, keyed by discriminant value
    pub models: IndexMap<String, ModelClass>,
}

/// Outcome of looking up the subtype for a type data value.
///
/// An unregistered or missing subtype is not an error: the value is kept as
/// an untyped record and receives no cleaning or validation.
#[derive(Debug, Clone, Copy)]
pub enum TypeDataResolution<'a> {
    Typed {
        subtype: &'a str,
        model: &'a ModelClass,
    },
    Untyped,
}

impl TypeDataOptions {
    pub fn new<K: Into<String>>(models: impl IntoIterator<Item = (K, ModelClass)>) -> Self {
        Self {
            discriminant: DEFAULT_DISCRIMINANT.to_string(),
            models: models.into_iter().map(|(k, m)| (k.into(), m)).collect(),
        }
    }

    pub fn resolve(&self, subtype: Option<&str>) -> TypeDataResolution<'_> {
        match subtype.and_then(|s| self.models.get_key_value(s)) {
            Some((subtype, model)) => TypeDataResolution::Typed { subtype, model },
            None => TypeDataResolution::Untyped,
        }
    }

    /// Read the discriminant from the enclosing record, falling back to the document root.
    pub(crate) fn discriminant_in<'r>(
        &self,
        siblings: Option<&'r Record>,
        root: Option<&'r Record>,
    ) -> Option<&'r str> {
        siblings
            .and_then(|s| s.get(&self.discriminant))
            .or_else(|| root.and_then(|r| r.get(&self.discriminant)))
            .and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve() {
        let options = TypeDataOptions::new([("weapon", ModelClass::builder("Weapon").build())]);
        assert!(matches!(
            options.resolve(Some("weapon")),
            TypeDataResolution::Typed { subtype: "weapon", .. }
        ));
        assert!(matches!(options.resolve(Some("spell")), TypeDataResolution::Untyped));
        assert!(matches!(options.resolve(None), TypeDataResolution::Untyped));
    }

    #[test]
    fn test_discriminant_prefers_siblings() {
        let options = TypeDataOptions::new([("weapon", ModelClass::builder("Weapon").build())]);
        let siblings = json!({"type": "weapon"}).as_object().unwrap().clone();
        let root = json!({"type": "spell"}).as_object().unwrap().clone();
        assert_eq!(options.discriminant_in(Some(&siblings), Some(&root)), Some("weapon"));
        assert_eq!(options.discriminant_in(None, Some(&root)), Some("spell"));
    }
}
