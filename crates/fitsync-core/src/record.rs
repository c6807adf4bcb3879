// ABOUTME: Defines Record, the unit of storage, and RecordId, the temporary-or-persisted identity tag.
// ABOUTME: Records are JSON objects whose collection key field carries their identifier.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use ulid::Ulid;

use crate::collection::Collection;

/// Prefix reserved for client-assigned identifiers of records created offline.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Errors raised when a JSON value cannot be interpreted as a record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("{collection} record must be a JSON object")]
    NotAnObject { collection: Collection },

    #[error("{collection} record is missing key field '{field}'")]
    MissingKey {
        collection: Collection,
        field: &'static str,
    },

    #[error("{collection} record has a non-scalar key in field '{field}'")]
    InvalidKey {
        collection: Collection,
        field: &'static str,
    },
}

/// Identity of a record. Records created while offline carry a temporary id
/// until the server assigns a persisted one during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordId {
    Temporary(String),
    Persisted(String),
}

impl RecordId {
    /// Generate a fresh temporary id.
    pub fn temporary() -> Self {
        RecordId::Temporary(format!("{}{}", TEMP_ID_PREFIX, Ulid::new()))
    }

    /// Classify a raw identifier by its prefix.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.starts_with(TEMP_ID_PREFIX) {
            RecordId::Temporary(raw)
        } else {
            RecordId::Persisted(raw)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecordId::Temporary(s) | RecordId::Persisted(s) => s,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, RecordId::Temporary(_))
    }
}

impl From<String> for RecordId {
    fn from(raw: String) -> Self {
        RecordId::parse(raw)
    }
}

impl From<&str> for RecordId {
    fn from(raw: &str) -> Self {
        RecordId::parse(raw)
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        match id {
            RecordId::Temporary(s) | RecordId::Persisted(s) => s,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An application entity stored in exactly one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub collection: Collection,
    pub data: Value,
}

impl Record {
    /// Build a record under an explicit id. The id is written into the
    /// collection's key field so the stored payload is self-describing.
    pub fn new(collection: Collection, id: RecordId, data: Value) -> Result<Self, RecordError> {
        let mut object = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(RecordError::NotAnObject { collection }),
        };
        object.insert(
            collection.key_field().to_string(),
            Value::String(id.as_str().to_string()),
        );
        Ok(Self {
            id,
            collection,
            data: Value::Object(object),
        })
    }

    /// Interpret a JSON object (typically a server response) as a record,
    /// reading its id from the collection's key field. Numeric ids are
    /// normalized to their decimal string form.
    pub fn from_value(collection: Collection, data: Value) -> Result<Self, RecordError> {
        let field = collection.key_field();
        let object = data
            .as_object()
            .ok_or(RecordError::NotAnObject { collection })?;
        let raw = match object.get(field) {
            None | Some(Value::Null) => {
                return Err(RecordError::MissingKey { collection, field });
            }
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => return Err(RecordError::InvalidKey { collection, field }),
        };
        Ok(Self {
            id: RecordId::parse(raw),
            collection,
            data,
        })
    }

    /// Value of the collection's indexed field, rendered as a string for
    /// ordering and equality queries.
    pub fn index_value(&self) -> Option<String> {
        let field = self.collection.index_field()?;
        match self.data.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Shallow-merge the fields of `patch` into this record. The key field is
    /// never overwritten by a patch.
    pub fn merge(&mut self, patch: &Value) {
        let Some(patch) = patch.as_object() else {
            return;
        };
        let key_field = self.collection.key_field();
        if let Value::Object(object) = &mut self.data {
            for (k, v) in patch {
                if k == key_field {
                    continue;
                }
                object.insert(k.clone(), v.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn temporary_ids_carry_prefix() {
        let id = RecordId::temporary();
        assert!(id.is_temporary());
        assert!(id.as_str().starts_with(TEMP_ID_PREFIX));
        assert_ne!(RecordId::temporary(), RecordId::temporary());
    }

    #[test]
    fn parse_classifies_by_prefix() {
        assert!(RecordId::parse("tmp-01ABC").is_temporary());
        assert_eq!(RecordId::parse("42"), RecordId::Persisted("42".to_string()));
    }

    #[test]
    fn record_id_serializes_as_plain_string() {
        let id = RecordId::Persisted("abc".to_string());
        assert_eq!(serde_json::to_value(&id).unwrap(), json!("abc"));
        let back: RecordId = serde_json::from_value(json!("tmp-xyz")).unwrap();
        assert!(back.is_temporary());
    }

    #[test]
    fn new_writes_id_into_key_field() {
        let record = Record::new(
            Collection::Workouts,
            RecordId::Persisted("w1".to_string()),
            json!({"name": "legs"}),
        )
        .unwrap();
        assert_eq!(record.data["id"], "w1");
        assert_eq!(record.data["name"], "legs");
    }

    #[test]
    fn new_rejects_non_objects() {
        let result = Record::new(Collection::Foods, RecordId::temporary(), json!([1, 2]));
        assert!(matches!(result, Err(RecordError::NotAnObject { .. })));
    }

    #[test]
    fn from_value_normalizes_numeric_ids() {
        let record = Record::from_value(Collection::Progress, json!({"id": 17, "weight": 80})).unwrap();
        assert_eq!(record.id, RecordId::Persisted("17".to_string()));
    }

    #[test]
    fn from_value_requires_key_field() {
        let result = Record::from_value(Collection::Searches, json!({"id": "x"}));
        assert!(matches!(
            result,
            Err(RecordError::MissingKey { field: "query", .. })
        ));
    }

    #[test]
    fn index_value_reads_indexed_field() {
        let record = Record::from_value(
            Collection::MealEntries,
            json!({"id": "m1", "date": "2024-03-01"}),
        )
        .unwrap();
        assert_eq!(record.index_value().as_deref(), Some("2024-03-01"));

        let food = Record::from_value(Collection::Foods, json!({"id": "f1"})).unwrap();
        assert_eq!(food.index_value(), None);
    }

    #[test]
    fn merge_keeps_key_field() {
        let mut record = Record::from_value(
            Collection::Progress,
            json!({"id": "p1", "weight": 80, "note": "am"}),
        )
        .unwrap();
        record.merge(&json!({"id": "other", "weight": 79}));
        assert_eq!(record.data["id"], "p1");
        assert_eq!(record.data["weight"], 79);
        assert_eq!(record.data["note"], "am");
    }
}
