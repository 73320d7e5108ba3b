//! Persisted audit records and the storage write surface.
//!
//! This module provides:
//! - `Action`: kind of audited event
//! - `Trail` / `TrailMarker`: immutable persisted records
//! - `TrailStore`: insert-only storage interface
//! - `MemoryTrailStore`: in-memory store with query helpers
//!
//! Records are never updated once created. The store API offers inserts
//! only; retention is an external concern.

mod event;
mod trail;

pub use event::{Action, MarkerId, NewMarker, NewTrail, Trail, TrailId, TrailMarker};
pub use trail::{MemoryTrailStore, TrailStore};
