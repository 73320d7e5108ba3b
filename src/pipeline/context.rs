//! Pipeline input and the accumulating context.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

use crate::audit::{Action, MarkerId, TrailId};
use crate::model::ObjectRef;
use crate::request::{Actor, RequestInfo, SessionInfo};

/// An object involved in an event other than the primary object.
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedObject {
    /// Relation label (`field`, `+field`, `-field`, or empty)
    pub rel: String,
    /// The object
    pub object: ObjectRef,
    /// Field data scoped to the object
    pub data: Option<Value>,
}

impl RelatedObject {
    /// Creates a related object entry without data.
    pub fn new(rel: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            rel: rel.into(),
            object,
            data: None,
        }
    }
}

/// What a tracker hands to the pipeline.
///
/// Anything left unset is resolved by the pipeline steps, e.g. the actor
/// and request from the ambient identity source.
///
/// # Example
///
/// ```
/// use trails_core::audit::Action;
/// use trails_core::pipeline::TrailEvent;
/// use trails_core::ObjectRef;
///
/// let event = TrailEvent::new(Action::Delete)
///     .with_instance(ObjectRef::new(None, "Team Blue"));
/// assert_eq!(event.action, Some(Action::Delete));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TrailEvent {
    /// Kind of event; required by the pipeline
    pub action: Option<Action>,
    /// Acting identity, if known to the caller
    pub actor: Option<Actor>,
    /// Actor display text overriding the rendered one
    pub actor_text: Option<String>,
    /// Request the event happened in
    pub request: Option<Arc<RequestInfo>>,
    /// Session the event happened in
    pub session: Option<SessionInfo>,
    /// Primary object
    pub instance: Option<ObjectRef>,
    /// Field data of the primary object
    pub instance_data: Option<Value>,
    /// Other objects involved
    pub related: Vec<RelatedObject>,
    /// Free-form trail payload
    pub data: Option<Value>,
}

impl TrailEvent {
    /// Starts an event of the given kind.
    pub fn new(action: Action) -> Self {
        Self {
            action: Some(action),
            ..Self::default()
        }
    }

    /// Sets the acting identity.
    pub fn with_actor(mut self, actor: Option<Actor>) -> Self {
        self.actor = actor;
        self
    }

    /// Overrides the actor display text.
    pub fn with_actor_text(mut self, text: impl Into<String>) -> Self {
        self.actor_text = Some(text.into());
        self
    }

    /// Sets the request.
    pub fn with_request(mut self, request: Option<Arc<RequestInfo>>) -> Self {
        self.request = request;
        self
    }

    /// Sets the session.
    pub fn with_session(mut self, session: SessionInfo) -> Self {
        self.session = Some(session);
        self
    }

    /// Sets the primary object.
    pub fn with_instance(mut self, instance: ObjectRef) -> Self {
        self.instance = Some(instance);
        self
    }

    /// Sets the primary object's field data.
    pub fn with_instance_data(mut self, data: Value) -> Self {
        self.instance_data = Some(data);
        self
    }

    /// Sets the related objects.
    pub fn with_related(mut self, related: Vec<RelatedObject>) -> Self {
        self.related = related;
        self
    }

    /// Sets the trail payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// State threaded through the pipeline steps.
///
/// Steps read the context and describe modifications with a
/// [`ContextUpdate`]; only the pipeline applies them.
#[derive(Debug, Clone, Default)]
pub struct TrailContext {
    /// Kind of event
    pub action: Option<Action>,
    /// Request the event happened in
    pub request: Option<Arc<RequestInfo>>,
    /// Correlation id of the request
    pub request_uuid: Option<Uuid>,
    /// Session the event happened in
    pub session: Option<SessionInfo>,
    /// Acting identity, `None` after anonymous normalization
    pub actor: Option<Actor>,
    /// True when the actor was the anonymous identity
    pub actor_is_anonymous: bool,
    /// Rendered actor text
    pub actor_text: Option<String>,
    /// Rendered request text
    pub request_text: Option<String>,
    /// Rendered session text
    pub session_text: Option<String>,
    /// Primary object
    pub instance: Option<ObjectRef>,
    /// Field data of the primary object
    pub instance_data: Option<Value>,
    /// Other objects involved
    pub related: Vec<RelatedObject>,
    /// Free-form trail payload
    pub data: Option<Value>,
    /// Persisted trail
    pub trail: Option<TrailId>,
    /// Persisted primary marker
    pub primary_marker: Option<MarkerId>,
    /// Persisted related markers
    pub related_markers: Vec<MarkerId>,
    /// Values contributed by custom steps
    pub extra: IndexMap<String, Value>,
}

impl From<TrailEvent> for TrailContext {
    fn from(event: TrailEvent) -> Self {
        Self {
            action: event.action,
            request: event.request,
            session: event.session,
            actor: event.actor,
            actor_text: event.actor_text,
            instance: event.instance,
            instance_data: event.instance_data,
            related: event.related,
            data: event.data,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
enum ContextField {
    Request(Option<Arc<RequestInfo>>),
    RequestUuid(Uuid),
    Session(Option<SessionInfo>),
    Actor(Option<Actor>),
    ActorIsAnonymous(bool),
    ActorText(String),
    RequestText(String),
    SessionText(String),
    Trail(TrailId),
    PrimaryMarker(Option<MarkerId>),
    RelatedMarkers(Vec<MarkerId>),
    Extra(String, Value),
}

/// Keys a step sets or overrides, merged into the context in order.
#[derive(Debug, Clone, Default)]
pub struct ContextUpdate {
    fields: Vec<ContextField>,
}

impl ContextUpdate {
    /// Creates an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the update sets nothing.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn push(mut self, field: ContextField) -> Self {
        self.fields.push(field);
        self
    }

    /// Sets the request.
    pub fn request(self, request: Option<Arc<RequestInfo>>) -> Self {
        self.push(ContextField::Request(request))
    }

    /// Sets the request correlation id.
    pub fn request_uuid(self, uuid: Uuid) -> Self {
        self.push(ContextField::RequestUuid(uuid))
    }

    /// Sets the session.
    pub fn session(self, session: Option<SessionInfo>) -> Self {
        self.push(ContextField::Session(session))
    }

    /// Sets the actor.
    pub fn actor(self, actor: Option<Actor>) -> Self {
        self.push(ContextField::Actor(actor))
    }

    /// Sets the anonymous flag.
    pub fn actor_is_anonymous(self, anonymous: bool) -> Self {
        self.push(ContextField::ActorIsAnonymous(anonymous))
    }

    /// Sets the actor text.
    pub fn actor_text(self, text: impl Into<String>) -> Self {
        self.push(ContextField::ActorText(text.into()))
    }

    /// Sets the request text.
    pub fn request_text(self, text: impl Into<String>) -> Self {
        self.push(ContextField::RequestText(text.into()))
    }

    /// Sets the session text.
    pub fn session_text(self, text: impl Into<String>) -> Self {
        self.push(ContextField::SessionText(text.into()))
    }

    /// Sets the persisted trail.
    pub fn trail(self, trail: TrailId) -> Self {
        self.push(ContextField::Trail(trail))
    }

    /// Sets the persisted primary marker.
    pub fn primary_marker(self, marker: Option<MarkerId>) -> Self {
        self.push(ContextField::PrimaryMarker(marker))
    }

    /// Sets the persisted related markers.
    pub fn related_markers(self, markers: Vec<MarkerId>) -> Self {
        self.push(ContextField::RelatedMarkers(markers))
    }

    /// Sets a custom value.
    pub fn extra(self, key: impl Into<String>, value: Value) -> Self {
        self.push(ContextField::Extra(key.into(), value))
    }

    /// Merges the update into `ctx`.
    pub fn apply(self, ctx: &mut TrailContext) {
        for field in self.fields {
            match field {
                ContextField::Request(request) => ctx.request = request,
                ContextField::RequestUuid(uuid) => ctx.request_uuid = Some(uuid),
                ContextField::Session(session) => ctx.session = session,
                ContextField::Actor(actor) => ctx.actor = actor,
                ContextField::ActorIsAnonymous(anonymous) => ctx.actor_is_anonymous = anonymous,
                ContextField::ActorText(text) => ctx.actor_text = Some(text),
                ContextField::RequestText(text) => ctx.request_text = Some(text),
                ContextField::SessionText(text) => ctx.session_text = Some(text),
                ContextField::Trail(trail) => ctx.trail = Some(trail),
                ContextField::PrimaryMarker(marker) => ctx.primary_marker = marker,
                ContextField::RelatedMarkers(markers) => ctx.related_markers = markers,
                ContextField::Extra(key, value) => {
                    ctx.extra.insert(key, value);
                }
            }
        }
    }
}
