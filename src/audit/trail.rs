//! Storage write surface and the in-memory trail store.

use chrono::Utc;
use parking_lot::Mutex;

use super::{MarkerId, NewMarker, NewTrail, Trail, TrailId, TrailMarker};
use crate::error::{StorageError, StorageErrorKind};
use crate::model::ObjectKey;

/// Insert-only storage for trails and markers.
///
/// Implementations never need to update or delete records.
pub trait TrailStore: Send + Sync {
    /// Persists a trail, returning its identity.
    fn create_trail(&self, trail: NewTrail) -> Result<TrailId, StorageError>;

    /// Persists a marker attached to an existing trail.
    fn create_marker(&self, marker: NewMarker) -> Result<MarkerId, StorageError>;
}

#[derive(Default)]
struct Records {
    trails: Vec<Trail>,
    markers: Vec<TrailMarker>,
}

/// In-memory trail store.
///
/// Records are kept in insertion order. Useful for tests and for
/// integrations that forward trails elsewhere.
///
/// # Example
///
/// ```
/// use trails_core::audit::{Action, MemoryTrailStore, NewMarker, NewTrail, TrailStore};
///
/// let store = MemoryTrailStore::new();
/// let id = store.create_trail(NewTrail::new(Action::Logout)).unwrap();
/// store.create_marker(NewMarker::new(id, None, "session")).unwrap();
///
/// assert_eq!(store.len(), 1);
/// assert_eq!(store.markers_for(id).len(), 1);
/// ```
#[derive(Default)]
pub struct MemoryTrailStore {
    records: Mutex<Records>,
}

impl MemoryTrailStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every trail in insertion order.
    pub fn trails(&self) -> Vec<Trail> {
        self.records.lock().trails.clone()
    }

    /// Returns a copy of every marker in insertion order.
    pub fn markers(&self) -> Vec<TrailMarker> {
        self.records.lock().markers.clone()
    }

    /// Returns the markers attached to `trail`.
    pub fn markers_for(&self, trail: TrailId) -> Vec<TrailMarker> {
        self.records
            .lock()
            .markers
            .iter()
            .filter(|marker| marker.trail() == trail)
            .cloned()
            .collect()
    }

    /// Returns the trails with a marker referencing `object`.
    pub fn trails_for(&self, object: &ObjectKey) -> Vec<Trail> {
        let records = self.records.lock();
        records
            .trails
            .iter()
            .filter(|trail| {
                records
                    .markers
                    .iter()
                    .any(|marker| marker.trail() == trail.id() && marker.object() == Some(object))
            })
            .cloned()
            .collect()
    }

    /// Returns the number of trails.
    pub fn len(&self) -> usize {
        self.records.lock().trails.len()
    }

    /// Returns true if no trail has been stored.
    pub fn is_empty(&self) -> bool {
        self.records.lock().trails.is_empty()
    }
}

impl TrailStore for MemoryTrailStore {
    fn create_trail(&self, trail: NewTrail) -> Result<TrailId, StorageError> {
        let mut records = self.records.lock();
        let id = TrailId(records.trails.len() as u64 + 1);
        records.trails.push(Trail::new(id, Utc::now(), trail));
        Ok(id)
    }

    fn create_marker(&self, marker: NewMarker) -> Result<MarkerId, StorageError> {
        let mut records = self.records.lock();
        if !records.trails.iter().any(|trail| trail.id() == marker.trail) {
            return Err(StorageError::new(
                StorageErrorKind::UnknownTrail,
                format!("no trail with id {}", marker.trail),
            ));
        }
        let id = MarkerId(records.markers.len() as u64 + 1);
        records.markers.push(TrailMarker::new(id, marker));
        Ok(id)
    }
}
