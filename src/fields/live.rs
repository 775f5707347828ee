//! Live (initialized) data
//!
//! The source of a document is plain JSON. Its live data is the same tree
//! with embedded records promoted to [`DataModel`]s, embedded collections
//! promoted to [`EmbeddedCollection`]s and JSON fields parsed.

use indexmap::IndexMap;
use serde_json::Value;

use crate::collection::EmbeddedCollection;
use crate::model::DataModel;

pub type LiveObject = IndexMap<String, LiveValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum LiveValue {
    Value(Value),
    Object(LiveObject),
    List(Vec<LiveValue>),
    Model(Box<DataModel>),
    Collection(Box<EmbeddedCollection>),
}

impl LiveValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_f64)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_i64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().and_then(Value::as_bool)
    }

    pub fn as_object(&self) -> Option<&LiveObject> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[LiveValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_model(&self) -> Option<&DataModel> {
        match self {
            Self::Model(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_model_mut(&mut self) -> Option<&mut DataModel> {
        match self {
            Self::Model(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&EmbeddedCollection> {
        match self {
            Self::Collection(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_collection_mut(&mut self) -> Option<&mut EmbeddedCollection> {
        match self {
            Self::Collection(c) => Some(c),
            _ => None,
        }
    }

    /// Child value by key or index; descends into embedded models.
    pub fn get(&self, key: &str) -> Option<&LiveValue> {
        match self {
            Self::Object(o) => o.get(key),
            Self::List(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            Self::Model(m) => m.get(key),
            _ => None,
        }
    }

    /// Plain JSON rendering without schema knowledge.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Object(o) => {
                Value::Object(o.iter().map(|(k, v)| (k.clone(), v.to_value())).collect())
            }
            Self::List(items) => Value::Array(items.iter().map(Self::to_value).collect()),
            Self::Model(m) => Value::Object(m.to_object(false)),
            Self::Collection(c) => {
                Value::Array(c.to_object(false).into_iter().map(Value::Object).collect())
            }
        }
    }
}

impl From<Value> for LiveValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}
