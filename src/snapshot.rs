//! Entity serialization and before/after diffing.
//!
//! A [`Snapshot`] is the ordered field-to-value mapping of one object at one
//! point in time. [`FieldDiff::between`] compares two snapshots over a
//! field set and keeps only what changed.

use indexmap::IndexMap;
use serde::ser::SerializeTuple;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::model::{label_key, Entity, ObjectId};

/// Ordered field values of one object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    model: String,
    pk: Option<ObjectId>,
    fields: IndexMap<String, Value>,
}

impl Snapshot {
    /// Serializes the given fields of a live instance.
    ///
    /// Fields the instance does not know are skipped; an unsaved instance
    /// yields an empty snapshot.
    pub fn capture(instance: &dyn Entity, fields: &[String]) -> Self {
        let pk = instance.id();
        if pk.is_none() {
            return Self::default();
        }
        let mut values = IndexMap::with_capacity(fields.len());
        for field in fields {
            if let Some(value) = instance.value(field) {
                values.insert(field.clone(), value);
            }
        }
        Self {
            model: label_key(instance.entity()),
            pk,
            fields: values,
        }
    }

    /// Returns true if no field was captured.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the captured field values.
    pub fn fields(&self) -> &IndexMap<String, Value> {
        &self.fields
    }

    /// Returns a captured value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Replaces a captured value, keeping its position.
    pub fn set(&mut self, field: &str, value: Value) {
        if let Some(slot) = self.fields.get_mut(field) {
            *slot = value;
        }
    }

    /// Renders the snapshot as the payload of an `add` trail:
    /// `__model` and `__pk` first, then every field.
    pub fn to_payload(&self) -> Value {
        let mut map = Map::new();
        map.insert("__model".to_string(), Value::from(self.model.as_str()));
        map.insert(
            "__pk".to_string(),
            self.pk.as_ref().map(ObjectId::to_value).unwrap_or(Value::Null),
        );
        for (field, value) in &self.fields {
            map.insert(field.clone(), value.clone());
        }
        Value::Object(map)
    }
}

/// Before and after value of one changed field.
///
/// A side is `None` when the field was absent from that snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    /// Value before the mutation
    pub before: Option<Value>,
    /// Value after the mutation
    pub after: Option<Value>,
}

impl FieldChange {
    /// Creates a change pair.
    pub fn new(before: Option<Value>, after: Option<Value>) -> Self {
        Self { before, after }
    }
}

impl Serialize for FieldChange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut pair = serializer.serialize_tuple(2)?;
        pair.serialize_element(&self.before)?;
        pair.serialize_element(&self.after)?;
        pair.end()
    }
}

/// Changed fields between two snapshots, in field-set order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldDiff {
    changes: IndexMap<String, FieldChange>,
}

impl FieldDiff {
    /// Compares `before` and `after` over `fields`.
    ///
    /// A field present on one side only yields `(value, None)` or
    /// `(None, value)`; a field present on both sides is kept only when the
    /// values differ. Fields outside `fields` are never considered.
    ///
    /// # Examples
    ///
    /// ```
    /// use trails_core::snapshot::{FieldDiff, Snapshot};
    ///
    /// let empty = Snapshot::default();
    /// let diff = FieldDiff::between(&empty, &empty, &["name".to_string()]);
    /// assert!(diff.is_empty());
    /// ```
    pub fn between(before: &Snapshot, after: &Snapshot, fields: &[String]) -> Self {
        let mut changes = IndexMap::new();
        for field in fields {
            let change = match (before.get(field), after.get(field)) {
                (Some(b), Some(a)) if b != a => FieldChange::new(Some(b.clone()), Some(a.clone())),
                (Some(_), Some(_)) => continue,
                (Some(b), None) => FieldChange::new(Some(b.clone()), None),
                (None, Some(a)) => FieldChange::new(None, Some(a.clone())),
                (None, None) => continue,
            };
            changes.insert(field.clone(), change);
        }
        Self { changes }
    }

    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns the number of changed fields.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns the change recorded for a field.
    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.changes.get(field)
    }

    /// Returns a mutable handle to the change recorded for a field.
    pub fn get_mut(&mut self, field: &str) -> Option<&mut FieldChange> {
        self.changes.get_mut(field)
    }

    /// Iterates over changed fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldChange)> {
        self.changes.iter()
    }

    /// Renders the diff as `{field: [before, after]}`.
    pub fn to_payload(&self) -> Value {
        let map = self
            .changes
            .iter()
            .map(|(field, change)| {
                let pair = Value::Array(vec![
                    change.before.clone().unwrap_or(Value::Null),
                    change.after.clone().unwrap_or(Value::Null),
                ]);
                (field.clone(), pair)
            })
            .collect::<Map<String, Value>>();
        Value::Object(map)
    }
}
