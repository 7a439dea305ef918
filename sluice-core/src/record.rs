//! Rows handed to the sink and the broker records they are serialized into.

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Field layout of the rows written to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowType {
    field_names: Vec<String>,
}

impl RowType {
    pub fn new<I, S>(field_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            field_names: field_names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }

    pub fn arity(&self) -> usize {
        self.field_names.len()
    }

    fn index_of(&self, field: &str) -> Option<usize> {
        self.field_names.iter().position(|name| name == field)
    }
}

/// A single row, with one value per field of its [RowType].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub fields: Vec<Value>,
}

impl Row {
    pub fn new(fields: Vec<Value>) -> Self {
        Self { fields }
    }
}

/// A record bound for the sink's topic.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProducerRecord {
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

/// Serializes rows into JSON objects keyed by field name.
#[derive(Debug, Clone)]
pub struct RowSerializer {
    row_type: RowType,
    key_index: Option<usize>,
}

impl RowSerializer {
    /// `key_field` names the field whose value becomes the record key.
    pub fn new(row_type: RowType, key_field: Option<&str>) -> Result<Self> {
        let key_index = match key_field {
            Some(field) => Some(row_type.index_of(field).ok_or_else(|| {
                Error::Config(format!(
                    "partition key field '{field}' is not one of {:?}",
                    row_type.field_names()
                ))
            })?),
            None => None,
        };
        Ok(Self {
            row_type,
            key_index,
        })
    }

    pub fn serialize(&self, row: &Row) -> Result<ProducerRecord> {
        if row.fields.len() != self.row_type.arity() {
            return Err(Error::Serialize(format!(
                "row has {} fields, expected {}",
                row.fields.len(),
                self.row_type.arity()
            )));
        }

        let object: Map<String, Value> = self
            .row_type
            .field_names()
            .iter()
            .cloned()
            .zip(row.fields.iter().cloned())
            .collect();
        let payload = serde_json::to_vec(&Value::Object(object))
            .map_err(|e| Error::Serialize(format!("encoding row: {e}")))?;

        let key = self
            .key_index
            .and_then(|index| row.fields.get(index))
            .and_then(|value| match value {
                Value::Null => None,
                Value::String(s) => Some(Bytes::from(s.clone())),
                other => Some(Bytes::from(other.to_string())),
            });

        Ok(ProducerRecord {
            key,
            payload: Bytes::from(payload),
        })
    }
}
