//! The `Trails` facade: owns the tracking context, installs trackers and
//! applies configuration reloads.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::ambient::{IdentitySource, ThreadLocalIdentity};
use crate::audit::TrailStore;
use crate::config::TrailsConfig;
use crate::error::Result;
use crate::hooks::{Dispatcher, Hook, HookHandler, HookPoint};
use crate::model::{EntityLoader, EntityMeta};
use crate::pipeline::{Pipeline, PipelineStep, StepRegistry, TrailContext, TrailEvent};
use crate::registry::{Registry, ResolvedRegistry};
use crate::tracker::{
    EntityTracker, IdentityToggles, IdentityTracker, RelationTracker, SharedContext, Tracker,
    TrackingContext,
};

const SUBSCRIBER_PREFIX: &str = "trails:";

#[derive(Default)]
struct Installed {
    entities: IndexMap<String, Arc<EntityTracker>>,
    relations: IndexMap<String, Arc<RelationTracker>>,
    identity: Option<Arc<IdentityTracker>>,
}

/// Builder for [`Trails`].
pub struct TrailsBuilder {
    registry: Registry,
    config: TrailsConfig,
    steps: StepRegistry,
    loader: Arc<dyn EntityLoader>,
    store: Arc<dyn TrailStore>,
    identity: Arc<dyn IdentitySource>,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl TrailsBuilder {
    /// Declares an entity type.
    pub fn entity(mut self, meta: EntityMeta) -> Self {
        self.registry.register(meta);
        self
    }

    /// Sets the configuration; defaults to [`TrailsConfig::default`].
    pub fn config(mut self, config: TrailsConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a custom pipeline step.
    pub fn step(mut self, step: Arc<dyn PipelineStep>) -> Self {
        self.steps.register(step);
        self
    }

    /// Sets the ambient identity source; defaults to [`ThreadLocalIdentity`].
    pub fn identity(mut self, identity: Arc<dyn IdentitySource>) -> Self {
        self.identity = identity;
        self
    }

    /// Uses an existing dispatcher instead of a private one.
    pub fn dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Resolves the registry, builds the pipeline and installs trackers.
    pub fn build(self) -> Result<Trails> {
        let config = Arc::new(self.config);
        let pipeline = Pipeline::build(
            Arc::clone(&config),
            &self.steps,
            Arc::clone(&self.store),
            Arc::clone(&self.identity),
        )?;
        let resolved = self.registry.resolve(&config)?;
        let context: SharedContext = Arc::new(ArcSwap::from_pointee(TrackingContext {
            config,
            pipeline: Arc::new(pipeline),
            loader: self.loader,
        }));

        let trails = Trails {
            registry: self.registry,
            steps: self.steps,
            store: self.store,
            identity: self.identity,
            dispatcher: self.dispatcher.unwrap_or_default(),
            context,
            resolved: ArcSwap::from_pointee(ResolvedRegistry::default()),
            installed: Mutex::new(Installed::default()),
        };
        trails.install(&mut trails.installed.lock(), resolved);
        Ok(trails)
    }
}

/// Change tracking for a declared entity catalog.
///
/// `Trails` resolves which entity types and fields are tracked, installs
/// one tracker per tracked entity type, one per tracked association type
/// and one for identity events, and subscribes them to its [`Dispatcher`].
/// The persistence and identity layers deliver hooks through
/// [`dispatch`](Self::dispatch).
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use trails_core::audit::MemoryTrailStore;
/// use trails_core::error::LoadError;
/// use trails_core::{Entity, EntityLoader, EntityMeta, ObjectId, Trails, TrailsConfig};
///
/// struct Nothing;
///
/// impl EntityLoader for Nothing {
///     fn load(&self, _: &str, _: &ObjectId) -> Result<Option<Box<dyn Entity>>, LoadError> {
///         Ok(None)
///     }
///     fn linked_ids(&self, _: &dyn Entity, _: &str) -> Result<Vec<ObjectId>, LoadError> {
///         Ok(Vec::new())
///     }
/// }
///
/// let store = Arc::new(MemoryTrailStore::new());
/// let trails = Trails::builder(Arc::new(Nothing), store.clone())
///     .entity(EntityMeta::new("app", "Team").field("name"))
///     .config(TrailsConfig {
///         include_models: vec!["app.*".to_string()],
///         ..TrailsConfig::default()
///     })
///     .build()
///     .unwrap();
///
/// assert!(trails.resolved().is_tracked("app.Team"));
/// ```
pub struct Trails {
    registry: Registry,
    steps: StepRegistry,
    store: Arc<dyn TrailStore>,
    identity: Arc<dyn IdentitySource>,
    dispatcher: Arc<Dispatcher>,
    context: SharedContext,
    resolved: ArcSwap<ResolvedRegistry>,
    installed: Mutex<Installed>,
}

impl Trails {
    /// Starts a builder with the two required collaborators.
    pub fn builder(loader: Arc<dyn EntityLoader>, store: Arc<dyn TrailStore>) -> TrailsBuilder {
        TrailsBuilder {
            registry: Registry::new(),
            config: TrailsConfig::default(),
            steps: StepRegistry::with_builtins(),
            loader,
            store,
            identity: Arc::new(ThreadLocalIdentity),
            dispatcher: None,
        }
    }

    /// Returns the dispatcher trackers are subscribed to.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Delivers a hook to the subscribed trackers.
    pub fn dispatch(&self, hook: &Hook<'_>) {
        self.dispatcher.dispatch(hook);
    }

    /// Returns the active configuration.
    pub fn config(&self) -> Arc<TrailsConfig> {
        Arc::clone(&self.context.load().config)
    }

    /// Returns the active tracking policies.
    pub fn resolved(&self) -> Arc<ResolvedRegistry> {
        self.resolved.load_full()
    }

    /// Records a trail that did not come from a hook, e.g. a custom action
    /// performed by the application.
    pub fn record(&self, event: TrailEvent) -> Option<TrailContext> {
        self.context.load().pipeline.record(event)
    }

    /// Applies a new configuration.
    ///
    /// The pipeline and the tracking policies are rebuilt first; if either
    /// fails the active configuration stays in place and the error is
    /// returned. Policies are only re-resolved when a setting that shapes
    /// them changed, and trackers whose policy did not change are kept along
    /// with any state they carry between a pre-hook and its post-hook.
    pub fn reload(&self, config: TrailsConfig) -> Result<()> {
        let config = Arc::new(config);
        let pipeline = Pipeline::build(
            Arc::clone(&config),
            &self.steps,
            Arc::clone(&self.store),
            Arc::clone(&self.identity),
        )?;
        let mut installed = self.installed.lock();
        let current = self.context.load_full();
        let resolved = if current.config.registry_differs(&config) {
            Some(self.registry.resolve(&config)?)
        } else {
            None
        };
        self.context.store(Arc::new(TrackingContext {
            config,
            pipeline: Arc::new(pipeline),
            loader: Arc::clone(&current.loader),
        }));
        match resolved {
            Some(resolved) => self.install(&mut installed, resolved),
            None => tracing::debug!("tracking policies unchanged, keeping every tracker"),
        }
        tracing::info!("trails configuration reloaded");
        Ok(())
    }

    /// Reconciles installed trackers with `resolved` and publishes the
    /// resulting subscriptions in one dispatcher swap.
    fn install(&self, installed: &mut Installed, resolved: ResolvedRegistry) {
        let mut next = Installed::default();

        for (label, policy) in &resolved.entities {
            let tracker = match installed.entities.get(label) {
                Some(existing) if existing.policy() == policy => Arc::clone(existing),
                _ => Arc::new(EntityTracker::new(Arc::clone(policy), Arc::clone(&self.context))),
            };
            next.entities.insert(label.clone(), tracker);
        }

        for (through, policy) in &resolved.relations {
            let tracker = match installed.relations.get(through) {
                Some(existing) if existing.policy() == policy => Arc::clone(existing),
                _ => Arc::new(RelationTracker::new(Arc::clone(policy), Arc::clone(&self.context))),
            };
            next.relations.insert(through.clone(), tracker);
        }

        let toggles = IdentityToggles::from_config(&self.context.load().config);
        next.identity = Some(match &installed.identity {
            Some(existing) if existing.toggles() == toggles => Arc::clone(existing),
            _ => Arc::new(IdentityTracker::new(toggles, Arc::clone(&self.context))),
        });

        for label in installed.entities.keys().filter(|l| !next.entities.contains_key(*l)) {
            tracing::debug!(entity = %label, "entity no longer tracked");
        }

        let mut subscriptions: Vec<(String, Vec<HookPoint>, Arc<dyn HookHandler>)> = Vec::new();
        for tracker in next.entities.values() {
            subscriptions.push(subscription(tracker));
        }
        for tracker in next.relations.values() {
            subscriptions.push(subscription(tracker));
        }
        if let Some(tracker) = &next.identity {
            subscriptions.push(subscription(tracker));
        }

        self.dispatcher.update(|table| {
            table.disconnect_prefix(SUBSCRIBER_PREFIX);
            for (subscriber, points, handler) in &subscriptions {
                for point in points {
                    table.connect(point.clone(), subscriber, Arc::clone(handler));
                }
            }
        });

        tracing::debug!(
            entities = next.entities.len(),
            relations = next.relations.len(),
            excluded = resolved.excluded.len(),
            "trackers installed"
        );
        *installed = next;
        self.resolved.store(Arc::new(resolved));
    }
}

fn subscription<T>(tracker: &Arc<T>) -> (String, Vec<HookPoint>, Arc<dyn HookHandler>)
where
    T: Tracker + 'static,
{
    let handler: Arc<dyn HookHandler> = Arc::clone(tracker) as Arc<dyn HookHandler>;
    (tracker.subscriber_id(), tracker.hook_points(), handler)
}

impl fmt::Debug for Trails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolved = self.resolved.load();
        f.debug_struct("Trails")
            .field("tracked", &resolved.entities.keys().collect::<Vec<_>>())
            .field("relations", &resolved.relations.keys().collect::<Vec<_>>())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
