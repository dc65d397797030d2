//! Records flowing between sources and sinks

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// One structured record
///
/// Field order is preserved as produced by the source. The pipeline never
/// looks inside; only formatters and sinks do.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataItem(Map<String, Value>);

impl DataItem {
    /// Empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insert
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Field names in record order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Value of `field`
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Iterate fields and values
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the record has no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The underlying field map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into a JSON object
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Copy without top-level and nested `null` fields
    pub fn without_nulls(&self) -> DataItem {
        DataItem(strip_nulls(&self.0))
    }
}

fn strip_nulls(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let v = match v {
                Value::Object(inner) => Value::Object(strip_nulls(inner)),
                other => other.clone(),
            };
            (k.clone(), v)
        })
        .collect()
}

impl From<Map<String, Value>> for DataItem {
    fn from(map: Map<String, Value>) -> Self {
        DataItem(map)
    }
}

impl TryFrom<Value> for DataItem {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(DataItem(map)),
            other => Err(Error::InvalidRecord {
                message: format!("expected a JSON object, found {}", kind_of(&other)),
            }),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Single-pass, finite, non-restartable stream of records
pub type RecordStream = BoxStream<'static, Result<DataItem>>;
