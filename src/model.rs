//! Entity and field descriptors, and the persistence collaborator interface.
//!
//! Trackers never inspect live objects beyond the [`Entity`] trait. The
//! shape of each entity type (its fields and relations) is declared once
//! with [`EntityMeta`] and handed to the registry.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LoadError;

/// Identity of a persisted object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectId {
    /// Integer primary key
    Int(i64),
    /// Any other primary key, rendered as text
    Str(String),
}

impl ObjectId {
    /// Interprets a field value as an object id. `null` yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(ObjectId::Int),
            Value::String(s) => Some(ObjectId::Str(s.clone())),
            _ => None,
        }
    }

    /// Converts the id back into a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            ObjectId::Int(n) => Value::from(*n),
            ObjectId::Str(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Int(n) => write!(f, "{}", n),
            ObjectId::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ObjectId {
    fn from(id: i64) -> Self {
        ObjectId::Int(id)
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        ObjectId::Str(id.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        ObjectId::Str(id)
    }
}

/// A live object managed by the persistence layer.
///
/// Implementors expose just enough for serialization: the entity label,
/// the identity, field values by name and a display text.
pub trait Entity {
    /// Entity label in `namespace.TypeName` form.
    fn entity(&self) -> &str;

    /// Persisted identity, `None` while the object is unsaved.
    fn id(&self) -> Option<ObjectId>;

    /// Current value of a field, `None` if the entity has no such field.
    ///
    /// Foreign keys are read through their id field (e.g. `user_id`).
    fn value(&self, field: &str) -> Option<Value>;

    /// Human readable rendering of the object.
    fn display(&self) -> String;
}

/// Normalizes an entity or field label for comparison.
pub fn label_key(label: &str) -> String {
    label.to_lowercase()
}

/// Type and identity of an object, usable after the object itself is gone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Normalized entity label
    pub entity: String,
    /// Object identity
    pub id: ObjectId,
}

impl ObjectKey {
    /// Creates a key, normalizing the entity label.
    pub fn new(entity: &str, id: impl Into<ObjectId>) -> Self {
        Self {
            entity: label_key(entity),
            id: id.into(),
        }
    }

    /// Returns the key of a live entity, if it has been persisted.
    pub fn of(instance: &dyn Entity) -> Option<Self> {
        instance.id().map(|id| Self::new(instance.entity(), id))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.id)
    }
}

/// An object descriptor carried by a trail: a nullable reference plus the
/// display text captured when the event happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Reference to the object, `None` when it has no identity
    pub key: Option<ObjectKey>,
    /// Display text fallback
    pub text: String,
}

impl ObjectRef {
    /// Describes a live entity.
    pub fn of(instance: &dyn Entity) -> Self {
        Self {
            key: ObjectKey::of(instance),
            text: instance.display(),
        }
    }

    /// Describes an object by key and text only.
    pub fn new(key: Option<ObjectKey>, text: impl Into<String>) -> Self {
        Self {
            key,
            text: text.into(),
        }
    }
}

/// Kind of a declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Plain value column
    Value,
    /// Many-to-one relation, stored through `id_field`
    ForeignKey {
        /// Label of the related entity type
        target: String,
        /// Name of the column holding the related id
        id_field: String,
    },
    /// One-to-one relation, stored through `id_field`
    OneToOne {
        /// Label of the related entity type
        target: String,
        /// Name of the column holding the related id
        id_field: String,
    },
    /// Many-to-many relation held in an association ("through") type
    ManyToMany {
        /// Label of the related entity type
        target: String,
        /// Label of the association type
        through: String,
    },
}

/// A declared field of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    /// Field name
    pub name: String,
    /// What the field holds
    pub kind: FieldKind,
}

/// Declared shape of an entity type.
///
/// # Examples
///
/// ```
/// use trails_core::EntityMeta;
///
/// let meta = EntityMeta::new("app", "UserEmail")
///     .field("email")
///     .foreign_key("user", "auth.User", "user_id");
///
/// assert_eq!(meta.label(), "app.UserEmail");
/// assert_eq!(meta.fields().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMeta {
    namespace: String,
    name: String,
    alt_namespace: Option<String>,
    fields: Vec<FieldMeta>,
}

impl EntityMeta {
    /// Starts a descriptor for `namespace.name`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            alt_namespace: None,
            fields: Vec::new(),
        }
    }

    /// Adds an alternate namespace (e.g. a full module path) also matched by patterns.
    pub fn alt_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.alt_namespace = Some(namespace.into());
        self
    }

    /// Adds a plain value field.
    pub fn field(self, name: impl Into<String>) -> Self {
        self.with(name, FieldKind::Value)
    }

    /// Adds a many-to-one relation stored in `id_field`.
    pub fn foreign_key(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        id_field: impl Into<String>,
    ) -> Self {
        self.with(
            name,
            FieldKind::ForeignKey {
                target: target.into(),
                id_field: id_field.into(),
            },
        )
    }

    /// Adds a one-to-one relation stored in `id_field`.
    pub fn one_to_one(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        id_field: impl Into<String>,
    ) -> Self {
        self.with(
            name,
            FieldKind::OneToOne {
                target: target.into(),
                id_field: id_field.into(),
            },
        )
    }

    /// Adds a many-to-many relation held by the `through` association type.
    ///
    /// Declaring the relation on one side is enough; the target type then
    /// reaches it through a `<type>_set` accessor, e.g. `team_set`.
    pub fn many_to_many(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        through: impl Into<String>,
    ) -> Self {
        self.with(
            name,
            FieldKind::ManyToMany {
                target: target.into(),
                through: through.into(),
            },
        )
    }

    fn with(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldMeta {
            name: name.into(),
            kind,
        });
        self
    }

    /// Returns the namespace the type belongs to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the `namespace.TypeName` label.
    pub fn label(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// Returns every normalized label the type answers to.
    pub fn labels(&self) -> Vec<String> {
        let mut labels = vec![label_key(&self.label())];
        if let Some(alt) = &self.alt_namespace {
            let alt_label = label_key(&format!("{}.{}", alt, self.name));
            if !labels.contains(&alt_label) {
                labels.push(alt_label);
            }
        }
        labels
    }

    /// Returns the declared fields in declaration order.
    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }
}

/// Read access to persisted state, provided by the persistence layer.
pub trait EntityLoader: Send + Sync {
    /// Re-fetches the currently persisted state of an object.
    ///
    /// Returns `Ok(None)` when the object does not exist (anymore).
    fn load(&self, entity: &str, id: &ObjectId) -> Result<Option<Box<dyn Entity>>, LoadError>;

    /// Loads every object of `entity` whose id is in `ids`; missing ids are skipped.
    fn load_many(&self, entity: &str, ids: &[ObjectId]) -> Result<Vec<Box<dyn Entity>>, LoadError> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(instance) = self.load(entity, id)? {
                found.push(instance);
            }
        }
        Ok(found)
    }

    /// Returns the ids currently linked to `instance` through a many-to-many field.
    fn linked_ids(&self, instance: &dyn Entity, field: &str) -> Result<Vec<ObjectId>, LoadError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_id_from_value() {
        assert_eq!(ObjectId::from_value(&json!(7)), Some(ObjectId::Int(7)));
        assert_eq!(
            ObjectId::from_value(&json!("abc")),
            Some(ObjectId::Str("abc".to_string()))
        );
        assert_eq!(ObjectId::from_value(&Value::Null), None);
        assert_eq!(ObjectId::from_value(&json!(true)), None);
    }

    #[test]
    fn object_id_serializes_untagged() {
        assert_eq!(serde_json::to_value(ObjectId::Int(3)).unwrap(), json!(3));
        assert_eq!(
            serde_json::to_value(ObjectId::from("k-1")).unwrap(),
            json!("k-1")
        );
    }

    #[test]
    fn object_key_normalizes_label() {
        let key = ObjectKey::new("App.User", 1);
        assert_eq!(key.entity, "app.user");
        assert_eq!(key.to_string(), "app.user#1");
    }

    #[test]
    fn entity_meta_labels_include_alternate_namespace() {
        let meta = EntityMeta::new("auth", "User").alt_namespace("accounts.models");
        assert_eq!(
            meta.labels(),
            vec!["auth.user".to_string(), "accounts.models.user".to_string()]
        );
    }

    #[test]
    fn entity_meta_keeps_declaration_order() {
        let meta = EntityMeta::new("app", "Team")
            .field("name")
            .many_to_many("users", "auth.User", "app.UserTeamAssociation");
        let names: Vec<_> = meta.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "users"]);
    }
}
