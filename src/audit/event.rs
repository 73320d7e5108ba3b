//! Audit record schema.
//!
//! `NewTrail` and `NewMarker` are what the pipeline hands to a store;
//! `Trail` and `TrailMarker` are what the store keeps. Persisted records
//! expose getters only.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::ObjectKey;

/// Kind of audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Object created
    Add,
    /// Object updated
    Change,
    /// Object deleted
    Delete,
    /// Objects linked through a many-to-many relation
    Associate,
    /// Objects unlinked from a many-to-many relation
    Disassociate,
    /// Successful login
    Login,
    /// Logout
    Logout,
    /// Rejected login attempt
    FailedLogin,
}

impl Action {
    /// Returns the stored name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Change => "change",
            Action::Delete => "delete",
            Action::Associate => "associate",
            Action::Disassociate => "disassociate",
            Action::Login => "login",
            Action::Logout => "logout",
            Action::FailedLogin => "failed-login",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a persisted trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrailId(pub u64);

impl fmt::Display for TrailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a persisted trail marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarkerId(pub u64);

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// A trail about to be persisted.
///
/// # Example
///
/// ```
/// use trails_core::audit::{Action, NewTrail};
/// use trails_core::ObjectKey;
///
/// let trail = NewTrail::new(Action::Login)
///     .with_actor(Some(ObjectKey::new("auth.User", 1)), "admin")
///     .with_request_text("[5b1c...] POST /login/");
///
/// assert_eq!(trail.action, Action::Login);
/// assert_eq!(trail.actor_text, "admin");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrail {
    /// Kind of event
    pub action: Action,
    /// Acting identity, `None` for anonymous or system activity
    pub actor: Option<ObjectKey>,
    /// Display text of the actor at the time of the event
    pub actor_text: String,
    /// True when the event was performed anonymously
    pub actor_is_anonymous: bool,
    /// Rendered request descriptor
    pub request_text: String,
    /// Rendered session descriptor
    pub session_text: String,
    /// Free-form payload, e.g. cleansed credentials of a failed login
    pub data: Value,
}

impl NewTrail {
    /// Starts a trail for `action` with empty texts and payload.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            actor: None,
            actor_text: String::new(),
            actor_is_anonymous: false,
            request_text: String::new(),
            session_text: String::new(),
            data: empty_object(),
        }
    }

    /// Sets the actor reference and display text.
    pub fn with_actor(mut self, actor: Option<ObjectKey>, text: impl Into<String>) -> Self {
        self.actor = actor;
        self.actor_text = text.into();
        self
    }

    /// Flags the trail as performed by the anonymous identity.
    pub fn with_anonymous(mut self, anonymous: bool) -> Self {
        self.actor_is_anonymous = anonymous;
        self
    }

    /// Sets the request descriptor.
    pub fn with_request_text(mut self, text: impl Into<String>) -> Self {
        self.request_text = text.into();
        self
    }

    /// Sets the session descriptor.
    pub fn with_session_text(mut self, text: impl Into<String>) -> Self {
        self.session_text = text.into();
        self
    }

    /// Sets the payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// A persisted audit event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trail {
    id: TrailId,
    created: DateTime<Utc>,
    #[serde(flatten)]
    fields: NewTrail,
}

impl Trail {
    /// Builds the persisted form of `fields`. Only stores call this.
    pub fn new(id: TrailId, created: DateTime<Utc>, fields: NewTrail) -> Self {
        Self { id, created, fields }
    }

    /// Returns the trail identity.
    pub fn id(&self) -> TrailId {
        self.id
    }

    /// Returns the creation timestamp.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Returns the action kind.
    pub fn action(&self) -> Action {
        self.fields.action
    }

    /// Returns the actor reference, if any.
    pub fn actor(&self) -> Option<&ObjectKey> {
        self.fields.actor.as_ref()
    }

    /// Returns the actor display text.
    pub fn actor_text(&self) -> &str {
        &self.fields.actor_text
    }

    /// Returns true if the actor was anonymous.
    pub fn actor_is_anonymous(&self) -> bool {
        self.fields.actor_is_anonymous
    }

    /// Returns the request descriptor.
    pub fn request_text(&self) -> &str {
        &self.fields.request_text
    }

    /// Returns the session descriptor.
    pub fn session_text(&self) -> &str {
        &self.fields.session_text
    }

    /// Returns the payload.
    pub fn data(&self) -> &Value {
        &self.fields.data
    }
}

impl fmt::Display for Trail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Trail[id={}, action={}, actor={}",
            self.id, self.fields.action, self.fields.actor_text
        )?;
        if !self.fields.request_text.is_empty() {
            write!(f, ", request={}", self.fields.request_text)?;
        }
        write!(f, "]")
    }
}

/// A trail marker about to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMarker {
    /// Owning trail
    pub trail: TrailId,
    /// Relation label, empty for the primary object
    pub rel: String,
    /// Reference to the object, `None` when it does not resolve
    pub object: Option<ObjectKey>,
    /// Display text fallback
    pub object_text: String,
    /// Field data scoped to the object
    pub data: Value,
}

impl NewMarker {
    /// Starts a primary marker for `trail`.
    pub fn new(trail: TrailId, object: Option<ObjectKey>, object_text: impl Into<String>) -> Self {
        Self {
            trail,
            rel: String::new(),
            object,
            object_text: object_text.into(),
            data: empty_object(),
        }
    }

    /// Sets the relation label.
    pub fn with_rel(mut self, rel: impl Into<String>) -> Self {
        self.rel = rel.into();
        self
    }

    /// Sets the field data.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// A persisted object descriptor attached to a trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailMarker {
    id: MarkerId,
    #[serde(flatten)]
    fields: NewMarker,
}

impl TrailMarker {
    /// Builds the persisted form of `fields`. Only stores call this.
    pub fn new(id: MarkerId, fields: NewMarker) -> Self {
        Self { id, fields }
    }

    /// Returns the marker identity.
    pub fn id(&self) -> MarkerId {
        self.id
    }

    /// Returns the owning trail.
    pub fn trail(&self) -> TrailId {
        self.fields.trail
    }

    /// Returns the relation label.
    pub fn rel(&self) -> &str {
        &self.fields.rel
    }

    /// Returns the object reference, if it resolved.
    pub fn object(&self) -> Option<&ObjectKey> {
        self.fields.object.as_ref()
    }

    /// Returns the object display text.
    pub fn object_text(&self) -> &str {
        &self.fields.object_text
    }

    /// Returns the field data.
    pub fn data(&self) -> &Value {
        &self.fields.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_names() {
        assert_eq!(Action::Add.to_string(), "add");
        assert_eq!(Action::Disassociate.as_str(), "disassociate");
        assert_eq!(Action::FailedLogin.to_string(), "failed-login");
    }

    #[test]
    fn action_serializes_as_stored_name() {
        assert_eq!(serde_json::to_value(Action::FailedLogin).unwrap(), json!("failed-login"));
        let parsed: Action = serde_json::from_value(json!("associate")).unwrap();
        assert_eq!(parsed, Action::Associate);
    }

    #[test]
    fn new_trail_defaults() {
        let trail = NewTrail::new(Action::Delete);
        assert!(trail.actor.is_none());
        assert!(trail.actor_text.is_empty());
        assert!(!trail.actor_is_anonymous);
        assert_eq!(trail.data, json!({}));
    }

    #[test]
    fn trail_display_is_compact() {
        let trail = Trail::new(
            TrailId(3),
            Utc::now(),
            NewTrail::new(Action::Change).with_actor(None, "(none)"),
        );
        assert_eq!(trail.to_string(), "Trail[id=3, action=change, actor=(none)]");
    }

    #[test]
    fn trail_serializes_flat() {
        let trail = Trail::new(
            TrailId(1),
            Utc::now(),
            NewTrail::new(Action::Login).with_actor(Some(ObjectKey::new("auth.User", 2)), "bob"),
        );
        let value = serde_json::to_value(&trail).unwrap();
        assert_eq!(value["id"], json!(1));
        assert_eq!(value["action"], json!("login"));
        assert_eq!(value["actor"], json!({"entity": "auth.user", "id": 2}));
    }

    #[test]
    fn marker_builder() {
        let marker = NewMarker::new(TrailId(1), None, "gone")
            .with_rel("-user")
            .with_data(json!({"a": 1}));
        let stored = TrailMarker::new(MarkerId(5), marker);
        assert_eq!(stored.rel(), "-user");
        assert!(stored.object().is_none());
        assert_eq!(stored.object_text(), "gone");
        assert_eq!(stored.data(), &json!({"a": 1}));
    }
}
