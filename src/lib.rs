//! Change tracking and audit trails for a persisted object graph.
//!
//! This crate records who created, changed, deleted, linked or unlinked
//! which objects, plus login, logout and failed login events:
//! - **Registry**: resolves from wildcard patterns which entity types and
//!   fields are tracked, ignored or redacted
//! - **Trackers**: turn lifecycle hooks into before/after diffs
//! - **Pipeline**: an ordered, short-circuitable list of steps that
//!   enriches each event and persists it as a trail with markers
//!
//! # Core Types
//!
//! - [`Trails`]: installs trackers for a declared entity catalog
//! - [`TrailsConfig`]: patterns, toggles and the pipeline step list
//! - [`Hook`](hooks::Hook): lifecycle and identity events delivered by the host
//! - [`TrailStore`](audit::TrailStore): insert-only storage for trails
//! - [`Secret<T>`]: wrapper that redacts sensitive values in logs/output
//!
//! Audit failures never reach the operation being audited: every error on
//! the recording path is logged through `tracing` and dropped.
//!
//! # Examples
//!
//! ```
//! use trails_core::{EntityMeta, Registry, TrailsConfig};
//!
//! let mut registry = Registry::new();
//! registry.register(
//!     EntityMeta::new("auth", "User")
//!         .field("username")
//!         .field("password")
//!         .field("last_login"),
//! );
//!
//! let resolved = registry.resolve(&TrailsConfig::default()).unwrap();
//! let policy = resolved.policy("auth.User").unwrap();
//!
//! assert!(policy.is_sensitive("password"));
//! assert_eq!(policy.discrete_fields(), vec!["username", "password"]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod ambient;
pub mod audit;
mod config;
pub mod error;
pub mod hooks;
mod logging;
mod model;
pub mod pattern;
pub mod pipeline;
pub mod registry;
mod request;
mod secret;
pub mod snapshot;
pub mod tracker;
mod trails;

pub use ambient::{ActorGuard, IdentitySource, RequestGuard, ThreadLocalIdentity};
pub use config::{TrailsConfig, DEFAULT_PIPELINE};
pub use error::{Error, Result};
pub use logging::{TrailLog, LOG_TARGET};
pub use model::{
    label_key, Entity, EntityLoader, EntityMeta, FieldKind, FieldMeta, ObjectId, ObjectKey, ObjectRef,
};
pub use registry::Registry;
pub use request::{Actor, RequestInfo, SessionInfo};
pub use secret::{Credentials, Secret, CLEANSED_SUBSTITUTE};
pub use trails::{Trails, TrailsBuilder};
