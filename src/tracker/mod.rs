//! Hook handlers turning lifecycle and identity events into trail events.
//!
//! - [`EntityTracker`]: one per tracked entity type
//! - [`RelationTracker`]: one per tracked many-to-many association type
//! - [`IdentityTracker`]: login, logout and failed login
//!
//! Trackers read the active [`TrackingContext`] through a shared handle on
//! every hook, so a configuration reload reaches trackers that were kept.
//! State carried from a pre-hook to its post-hook lives in a [`Stash`]
//! keyed by the calling thread and the object.

mod entity;
mod identity;
mod relation;

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

pub use entity::EntityTracker;
pub use identity::{IdentityToggles, IdentityTracker};
pub use relation::RelationTracker;

use crate::config::TrailsConfig;
use crate::hooks::{HookHandler, HookPoint};
use crate::model::{EntityLoader, ObjectId, ObjectKey, ObjectRef};
use crate::pipeline::Pipeline;

/// Everything a tracker needs to record a trail.
pub struct TrackingContext {
    /// Active configuration
    pub config: Arc<TrailsConfig>,
    /// Pipeline built from the configuration
    pub pipeline: Arc<Pipeline>,
    /// Access to persisted entity state
    pub loader: Arc<dyn EntityLoader>,
}

/// Handle through which trackers read the current [`TrackingContext`].
pub type SharedContext = Arc<ArcSwap<TrackingContext>>;

/// A hook handler that knows where it subscribes.
pub trait Tracker: HookHandler {
    /// Subscriber id used with the dispatcher.
    fn subscriber_id(&self) -> String;

    /// Points the tracker subscribes to.
    fn hook_points(&self) -> Vec<HookPoint>;
}

/// Values handed from a pre-hook to the matching post-hook.
///
/// Entries are scoped to the calling thread, so concurrent mutations on
/// other threads never see them, and removed when read. A pre-hook that
/// finds nothing to hand over clears its key, so a mutation that failed
/// between its hooks leaves nothing for the next one to pick up.
pub(crate) struct Stash<K, V> {
    slots: Mutex<HashMap<(ThreadId, K), V>>,
}

impl<K: Eq + Hash, V> Stash<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Stores `value`, replacing an earlier entry for the same key on this thread.
    pub(crate) fn put(&self, key: K, value: V) {
        self.slots.lock().insert((thread::current().id(), key), value);
    }

    /// Removes and returns this thread's entry for `key`.
    pub(crate) fn take(&self, key: K) -> Option<V> {
        self.slots.lock().remove(&(thread::current().id(), key))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Per-thread "migration in progress" flag.
pub(crate) struct Migrating {
    threads: Mutex<HashSet<ThreadId>>,
}

impl Migrating {
    pub(crate) fn new() -> Self {
        Self {
            threads: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn start(&self) {
        self.threads.lock().insert(thread::current().id());
    }

    pub(crate) fn end(&self) {
        self.threads.lock().remove(&thread::current().id());
    }

    pub(crate) fn active(&self) -> bool {
        self.threads.lock().contains(&thread::current().id())
    }
}

/// Describes an object by key, loading it for its display text.
///
/// An object that cannot be loaded keeps its key; the key doubles as text.
pub(crate) fn describe(loader: &dyn EntityLoader, entity: &str, id: &ObjectId) -> ObjectRef {
    let key = ObjectKey::new(entity, id.clone());
    match loader.load(entity, id) {
        Ok(Some(instance)) => ObjectRef::new(Some(key), instance.display()),
        Ok(None) => {
            let text = key.to_string();
            ObjectRef::new(Some(key), text)
        }
        Err(e) => {
            tracing::warn!(entity, id = %id, error = %e, "could not load related object");
            let text = key.to_string();
            ObjectRef::new(Some(key), text)
        }
    }
}
