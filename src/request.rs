use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::ObjectKey;

/// Metadata about the request a change happened in.
///
/// The correlation id is assigned lazily, the first time a trail is
/// recorded for the request, and reused by every later trail so that
/// changes made within one request can be grouped.
#[derive(Debug, Default)]
pub struct RequestInfo {
    /// HTTP method, if any
    pub method: Option<String>,
    /// Full path including the query string
    pub path: Option<String>,
    /// Session the request belongs to
    pub session: Option<SessionInfo>,
    correlation_id: OnceLock<Uuid>,
}

impl RequestInfo {
    /// Creates request metadata from a method and a full path.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            path: Some(path.into()),
            session: None,
            correlation_id: OnceLock::new(),
        }
    }

    /// Attaches a session.
    pub fn with_session(mut self, session: SessionInfo) -> Self {
        self.session = Some(session);
        self
    }

    /// Returns the correlation id, assigning a fresh one on first use.
    pub fn correlation_id(&self) -> Uuid {
        *self.correlation_id.get_or_init(Uuid::new_v4)
    }

    /// Returns the correlation id if one was already assigned.
    pub fn assigned_correlation_id(&self) -> Option<Uuid> {
        self.correlation_id.get().copied()
    }
}

/// A user session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session key
    pub key: String,
}

impl SessionInfo {
    /// Creates a session descriptor.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// The identity performing a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Reference to the persisted identity, if any
    pub key: Option<ObjectKey>,
    /// Display name
    pub name: String,
    /// True for the anonymous identity
    pub anonymous: bool,
}

impl Actor {
    /// Creates an actor backed by a persisted identity.
    pub fn new(key: ObjectKey, name: impl Into<String>) -> Self {
        Self {
            key: Some(key),
            name: name.into(),
            anonymous: false,
        }
    }

    /// Creates the anonymous actor.
    pub fn anonymous() -> Self {
        Self {
            key: None,
            name: String::new(),
            anonymous: true,
        }
    }
}
