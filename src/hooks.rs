//! Lifecycle and identity hooks, and the dispatcher routing them to trackers.
//!
//! The persistence layer and the identity layer describe what is happening
//! with a [`Hook`] and hand it to [`Dispatcher::dispatch`]. Each hook maps to
//! a [`HookPoint`]; handlers subscribe to points under a subscriber id.
//!
//! The subscription table is an immutable snapshot behind an `ArcSwap`.
//! Connecting, disconnecting and bulk reconfiguration publish a new table
//! in one swap, so a dispatch sees either the old or the new table, never a
//! mix. Handlers run after the snapshot is taken and with no lock held.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use indexmap::IndexMap;

use crate::logging::trace_hook;
use crate::model::{label_key, Entity, ObjectId};
use crate::request::{Actor, RequestInfo};
use crate::secret::Credentials;

/// Stage of a many-to-many change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum M2mAction {
    /// Before links are added
    PreAdd,
    /// After links were added
    PostAdd,
    /// Before links are removed
    PreRemove,
    /// After links were removed
    PostRemove,
    /// Before every link is removed
    PreClear,
    /// After every link was removed
    PostClear,
}

/// A lifecycle or identity event.
pub enum Hook<'a> {
    /// An object is about to be written.
    PreSave {
        /// The object in its new, unsaved state
        instance: &'a dyn Entity,
        /// True for raw fixture/bulk loads
        raw: bool,
        /// Fields being written by a partial update
        update_fields: Option<&'a [String]>,
    },
    /// An object was written.
    PostSave {
        /// The object as written
        instance: &'a dyn Entity,
        /// True if the object was inserted
        created: bool,
        /// True for raw fixture/bulk loads
        raw: bool,
        /// Fields written by a partial update
        update_fields: Option<&'a [String]>,
    },
    /// An object is about to be deleted.
    PreDelete {
        /// The object being deleted
        instance: &'a dyn Entity,
    },
    /// An object was deleted.
    PostDelete {
        /// The instance passed to the matching `PreDelete`; its id may be gone
        instance: &'a dyn Entity,
    },
    /// A schema migration of a namespace starts on this thread.
    PreMigrate {
        /// Namespace being migrated
        namespace: &'a str,
    },
    /// A schema migration of a namespace ended on this thread.
    PostMigrate {
        /// Namespace that was migrated
        namespace: &'a str,
    },
    /// Links of a many-to-many relation change.
    M2mChanged {
        /// Label of the association type
        through: &'a str,
        /// Stage of the change
        action: M2mAction,
        /// Object whose relation accessor was used
        instance: &'a dyn Entity,
        /// Label of the entity type on the other end
        target: &'a str,
        /// Ids of the linked objects, empty for clears
        ids: &'a [ObjectId],
    },
    /// A user logged in.
    LoggedIn {
        /// The authenticated identity
        actor: Option<&'a Actor>,
        /// The login request
        request: Option<&'a Arc<RequestInfo>>,
    },
    /// A user logged out.
    LoggedOut {
        /// The identity that logged out, if a session existed
        actor: Option<&'a Actor>,
        /// The logout request
        request: Option<&'a Arc<RequestInfo>>,
    },
    /// A login attempt was rejected.
    LoginFailed {
        /// Submitted credentials
        credentials: &'a Credentials,
        /// The login request
        request: Option<&'a Arc<RequestInfo>>,
    },
}

impl Hook<'_> {
    /// Returns the subscription point this hook is delivered to.
    pub fn point(&self) -> HookPoint {
        match self {
            Hook::PreSave { instance, .. } => HookPoint::PreSave(label_key(instance.entity())),
            Hook::PostSave { instance, .. } => HookPoint::PostSave(label_key(instance.entity())),
            Hook::PreDelete { instance } => HookPoint::PreDelete(label_key(instance.entity())),
            Hook::PostDelete { instance } => HookPoint::PostDelete(label_key(instance.entity())),
            Hook::PreMigrate { namespace } => HookPoint::PreMigrate(label_key(namespace)),
            Hook::PostMigrate { namespace } => HookPoint::PostMigrate(label_key(namespace)),
            Hook::M2mChanged { through, .. } => HookPoint::M2mChanged(label_key(through)),
            Hook::LoggedIn { .. } => HookPoint::LoggedIn,
            Hook::LoggedOut { .. } => HookPoint::LoggedOut,
            Hook::LoginFailed { .. } => HookPoint::LoginFailed,
        }
    }
}

impl fmt::Debug for Hook<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::PreSave { instance, raw, update_fields } => f
                .debug_struct("PreSave")
                .field("instance", &instance.display())
                .field("raw", raw)
                .field("update_fields", update_fields)
                .finish(),
            Hook::PostSave {
                instance,
                created,
                raw,
                update_fields,
            } => f
                .debug_struct("PostSave")
                .field("instance", &instance.display())
                .field("created", created)
                .field("raw", raw)
                .field("update_fields", update_fields)
                .finish(),
            Hook::PreDelete { instance } => f
                .debug_struct("PreDelete")
                .field("instance", &instance.display())
                .finish(),
            Hook::PostDelete { instance } => f
                .debug_struct("PostDelete")
                .field("instance", &instance.display())
                .finish(),
            Hook::PreMigrate { namespace } => f.debug_struct("PreMigrate").field("namespace", namespace).finish(),
            Hook::PostMigrate { namespace } => f.debug_struct("PostMigrate").field("namespace", namespace).finish(),
            Hook::M2mChanged {
                through,
                action,
                instance,
                target,
                ids,
            } => f
                .debug_struct("M2mChanged")
                .field("through", through)
                .field("action", action)
                .field("instance", &instance.display())
                .field("target", target)
                .field("ids", ids)
                .finish(),
            Hook::LoggedIn { actor, .. } => f.debug_struct("LoggedIn").field("actor", actor).finish(),
            Hook::LoggedOut { actor, .. } => f.debug_struct("LoggedOut").field("actor", actor).finish(),
            Hook::LoginFailed { credentials, .. } => {
                f.debug_struct("LoginFailed").field("credentials", credentials).finish()
            }
        }
    }
}

/// Subscription key of a hook.
///
/// Entity hooks are keyed by normalized entity label, migration hooks by
/// normalized namespace, relation hooks by normalized association label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Before an entity of the type is written
    PreSave(String),
    /// After an entity of the type was written
    PostSave(String),
    /// Before an entity of the type is deleted
    PreDelete(String),
    /// After an entity of the type was deleted
    PostDelete(String),
    /// A namespace migration starts
    PreMigrate(String),
    /// A namespace migration ended
    PostMigrate(String),
    /// Links held by the association type change
    M2mChanged(String),
    /// Successful login
    LoggedIn,
    /// Logout
    LoggedOut,
    /// Rejected login
    LoginFailed,
}

/// Receiver of hooks.
///
/// Handlers must not fail: anything that goes wrong while handling a hook
/// is logged and dropped so the triggering operation proceeds.
pub trait HookHandler: Send + Sync {
    /// Handles one hook.
    fn handle(&self, hook: &Hook<'_>);
}

#[derive(Clone)]
struct Subscription {
    subscriber: String,
    handler: Arc<dyn HookHandler>,
}

/// Immutable set of subscriptions, edited through [`Dispatcher::update`].
#[derive(Clone, Default)]
pub struct SubscriptionTable {
    points: IndexMap<HookPoint, Vec<Subscription>>,
}

impl SubscriptionTable {
    /// Subscribes `handler` to `point` under `subscriber`.
    ///
    /// Connecting the same subscriber to the same point again replaces the
    /// earlier handler.
    pub fn connect(&mut self, point: HookPoint, subscriber: &str, handler: Arc<dyn HookHandler>) {
        trace_hook!(subscriber, point = ?point, "connect");
        let subscriptions = self.points.entry(point).or_default();
        subscriptions.retain(|s| s.subscriber != subscriber);
        subscriptions.push(Subscription {
            subscriber: subscriber.to_string(),
            handler,
        });
    }

    /// Removes every subscription held by `subscriber`.
    pub fn disconnect(&mut self, subscriber: &str) {
        for (point, subscriptions) in self.points.iter_mut() {
            let before = subscriptions.len();
            subscriptions.retain(|s| s.subscriber != subscriber);
            if subscriptions.len() != before {
                trace_hook!(subscriber, point = ?point, "disconnect");
            }
        }
        self.points.retain(|_, subscriptions| !subscriptions.is_empty());
    }

    /// Removes every subscription whose subscriber id starts with `prefix`.
    pub fn disconnect_prefix(&mut self, prefix: &str) {
        for subscriptions in self.points.values_mut() {
            subscriptions.retain(|s| !s.subscriber.starts_with(prefix));
        }
        self.points.retain(|_, subscriptions| !subscriptions.is_empty());
    }

    /// Returns true if anything is subscribed to `point`.
    pub fn is_connected(&self, point: &HookPoint) -> bool {
        self.points.get(point).is_some_and(|s| !s.is_empty())
    }

    /// Returns the subscriber ids connected to `point`, in connection order.
    pub fn subscribers(&self, point: &HookPoint) -> Vec<&str> {
        self.points
            .get(point)
            .map(|s| s.iter().map(|s| s.subscriber.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Routes hooks to subscribed handlers.
#[derive(Default)]
pub struct Dispatcher {
    table: ArcSwap<SubscriptionTable>,
}

impl Dispatcher {
    /// Creates a dispatcher with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes one handler to one point.
    pub fn connect(&self, point: HookPoint, subscriber: &str, handler: Arc<dyn HookHandler>) {
        self.update(|table| table.connect(point.clone(), subscriber, Arc::clone(&handler)));
    }

    /// Removes every subscription held by `subscriber`.
    pub fn disconnect(&self, subscriber: &str) {
        self.update(|table| table.disconnect(subscriber));
    }

    /// Applies `edit` to a copy of the table and publishes the result in
    /// one swap. `edit` may run more than once under contention.
    pub fn update<F>(&self, edit: F)
    where
        F: Fn(&mut SubscriptionTable),
    {
        self.table.rcu(|current| {
            let mut next = SubscriptionTable::clone(current);
            edit(&mut next);
            next
        });
    }

    /// Returns the current table snapshot.
    pub fn snapshot(&self) -> Arc<SubscriptionTable> {
        self.table.load_full()
    }

    /// Delivers `hook` to every handler subscribed to its point.
    pub fn dispatch(&self, hook: &Hook<'_>) {
        let point = hook.point();
        let handlers: Vec<Arc<dyn HookHandler>> = {
            let table = self.table.load();
            match table.points.get(&point) {
                Some(subscriptions) => subscriptions.iter().map(|s| Arc::clone(&s.handler)).collect(),
                None => return,
            }
        };
        trace_hook!(point = ?point, handlers = handlers.len(), "dispatch");
        for handler in handlers {
            handler.handle(hook);
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.load();
        f.debug_struct("Dispatcher")
            .field("points", &table.points.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::Value;

    struct Row;

    impl Entity for Row {
        fn entity(&self) -> &str {
            "App.Row"
        }
        fn id(&self) -> Option<ObjectId> {
            Some(ObjectId::Int(1))
        }
        fn value(&self, _field: &str) -> Option<Value> {
            None
        }
        fn display(&self) -> String {
            "row 1".to_string()
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl HookHandler for Recorder {
        fn handle(&self, hook: &Hook<'_>) {
            self.seen.lock().push(format!("{:?}", hook.point()));
        }
    }

    #[test]
    fn hook_points_are_normalized() {
        let row = Row;
        let hook = Hook::PreDelete { instance: &row };
        assert_eq!(hook.point(), HookPoint::PreDelete("app.row".to_string()));
        let hook = Hook::PreMigrate { namespace: "App" };
        assert_eq!(hook.point(), HookPoint::PreMigrate("app".to_string()));
    }

    #[test]
    fn dispatch_reaches_only_subscribed_point() {
        let dispatcher = Dispatcher::new();
        let recorder = Arc::new(Recorder::default());
        dispatcher.connect(HookPoint::PostDelete("app.row".to_string()), "r", recorder.clone());

        let row = Row;
        dispatcher.dispatch(&Hook::PreDelete { instance: &row });
        dispatcher.dispatch(&Hook::PostDelete { instance: &row });

        assert_eq!(recorder.seen.lock().len(), 1);
    }

    #[test]
    fn connect_is_idempotent_per_subscriber() {
        let dispatcher = Dispatcher::new();
        let recorder = Arc::new(Recorder::default());
        dispatcher.connect(HookPoint::LoggedIn, "r", recorder.clone());
        dispatcher.connect(HookPoint::LoggedIn, "r", recorder.clone());

        dispatcher.dispatch(&Hook::LoggedIn {
            actor: None,
            request: None,
        });
        assert_eq!(recorder.seen.lock().len(), 1);
    }

    #[test]
    fn disconnect_removes_all_points_of_subscriber() {
        let dispatcher = Dispatcher::new();
        let recorder = Arc::new(Recorder::default());
        dispatcher.connect(HookPoint::LoggedIn, "r", recorder.clone());
        dispatcher.connect(HookPoint::LoggedOut, "r", recorder.clone());
        dispatcher.connect(HookPoint::LoggedOut, "other", recorder.clone());
        dispatcher.disconnect("r");

        let table = dispatcher.snapshot();
        assert!(!table.is_connected(&HookPoint::LoggedIn));
        assert_eq!(table.subscribers(&HookPoint::LoggedOut), vec!["other"]);
    }

    #[test]
    fn update_swaps_in_one_step() {
        let dispatcher = Dispatcher::new();
        let recorder = Arc::new(Recorder::default());
        dispatcher.connect(HookPoint::LoggedIn, "trails:identity", recorder.clone());
        dispatcher.connect(HookPoint::LoggedIn, "app:audit", recorder.clone());

        let before = dispatcher.snapshot();
        let handler: Arc<dyn HookHandler> = recorder.clone();
        dispatcher.update(|table| {
            table.disconnect_prefix("trails:");
            table.connect(HookPoint::LoginFailed, "trails:identity", Arc::clone(&handler));
        });

        assert_eq!(before.subscribers(&HookPoint::LoggedIn).len(), 2);
        let after = dispatcher.snapshot();
        assert_eq!(after.subscribers(&HookPoint::LoggedIn), vec!["app:audit"]);
        assert!(after.is_connected(&HookPoint::LoginFailed));
    }

    #[test]
    fn debug_of_failed_login_hides_credentials() {
        let credentials = Credentials::new().with("password", "hunter2");
        let hook = Hook::LoginFailed {
            credentials: &credentials,
            request: None,
        };
        assert!(!format!("{:?}", hook).contains("hunter2"));
    }
}
