//! The trail pipeline: an ordered, short-circuitable list of named steps.
//!
//! Each step reads the accumulated [`TrailContext`] and returns a
//! [`StepOutcome`]: leave the context alone, merge a [`ContextUpdate`], or
//! stop. Stopping discards the event; nothing is persisted by later steps.
//!
//! The step list is configured by name. [`StepRegistry::with_builtins`]
//! knows every built-in step; integrators can register their own.

mod context;
pub mod steps;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

pub use context::{ContextUpdate, RelatedObject, TrailContext, TrailEvent};

use crate::ambient::IdentitySource;
use crate::audit::TrailStore;
use crate::config::TrailsConfig;
use crate::error::{Error, Result};

/// Result of one step.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Context unchanged
    Unchanged,
    /// Merge these keys into the context
    Update(ContextUpdate),
    /// Skip every remaining step and discard the event
    Stop,
}

/// External collaborators available to steps.
pub struct StepEnv<'a> {
    /// Active configuration
    pub config: &'a TrailsConfig,
    /// Trail storage
    pub store: &'a dyn TrailStore,
    /// Ambient actor/request accessor
    pub identity: &'a dyn IdentitySource,
}

/// One named pipeline step.
pub trait PipelineStep: Send + Sync {
    /// Name used in the configured step list.
    fn name(&self) -> &str;

    /// Runs the step. An `Err` aborts the pipeline for this event.
    fn run(&self, ctx: &TrailContext, env: &StepEnv<'_>) -> Result<StepOutcome>;
}

type StepFn = dyn Fn(&TrailContext, &StepEnv<'_>) -> Result<StepOutcome> + Send + Sync;

/// A step backed by a function or closure.
pub struct FnStep {
    name: String,
    run: Box<StepFn>,
}

impl FnStep {
    /// Wraps `run` as a step called `name`.
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&TrailContext, &StepEnv<'_>) -> Result<StepOutcome> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }
}

impl PipelineStep for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &TrailContext, env: &StepEnv<'_>) -> Result<StepOutcome> {
        (self.run)(ctx, env)
    }
}

impl fmt::Debug for FnStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep").field("name", &self.name).finish()
    }
}

/// Steps known by name.
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: IndexMap<String, Arc<dyn PipelineStep>>,
}

impl StepRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in step.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for step in steps::builtins() {
            registry.register(step);
        }
        registry
    }

    /// Registers a step, replacing any step with the same name.
    pub fn register(&mut self, step: Arc<dyn PipelineStep>) {
        self.steps.insert(step.name().to_string(), step);
    }

    /// Looks up a step.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn PipelineStep>> {
        self.steps.get(name)
    }

    /// Returns the registered names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.steps.keys().map(String::as_str).collect()
    }

    /// Resolves a configured step list.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<dyn PipelineStep>>> {
        names
            .iter()
            .map(|name| {
                self.steps
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::UnknownStep(name.clone()))
            })
            .collect()
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry").field("steps", &self.names()).finish()
    }
}

/// A built pipeline: resolved steps plus the collaborators they use.
pub struct Pipeline {
    steps: Vec<Arc<dyn PipelineStep>>,
    config: Arc<TrailsConfig>,
    store: Arc<dyn TrailStore>,
    identity: Arc<dyn IdentitySource>,
}

impl Pipeline {
    /// Builds the pipeline named by `config.pipeline`.
    ///
    /// Fails with [`Error::UnknownStep`] if a name is not registered.
    pub fn build(
        config: Arc<TrailsConfig>,
        registry: &StepRegistry,
        store: Arc<dyn TrailStore>,
        identity: Arc<dyn IdentitySource>,
    ) -> Result<Self> {
        let steps = registry.resolve(&config.pipeline)?;
        Ok(Self {
            steps,
            config,
            store,
            identity,
        })
    }

    /// Returns the configuration the pipeline was built with.
    pub fn config(&self) -> &Arc<TrailsConfig> {
        &self.config
    }

    /// Returns the step names in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Runs every step over `event`.
    ///
    /// Returns `Ok(None)` if a step stopped the pipeline and the final
    /// context otherwise. The first failing step aborts the run.
    pub fn run(&self, event: TrailEvent) -> Result<Option<TrailContext>> {
        let env = StepEnv {
            config: &self.config,
            store: self.store.as_ref(),
            identity: self.identity.as_ref(),
        };
        let mut ctx = TrailContext::from(event);
        for step in &self.steps {
            tracing::trace!(step = step.name(), action = ?ctx.action, "running pipeline step");
            match step.run(&ctx, &env) {
                Ok(StepOutcome::Unchanged) => {}
                Ok(StepOutcome::Update(update)) => update.apply(&mut ctx),
                Ok(StepOutcome::Stop) => {
                    tracing::debug!(step = step.name(), action = ?ctx.action, "pipeline stopped");
                    return Ok(None);
                }
                Err(e) => {
                    tracing::debug!(step = step.name(), error = %e, "pipeline step failed");
                    return Err(e);
                }
            }
        }
        Ok(Some(ctx))
    }

    /// Runs the pipeline, logging and swallowing any failure.
    ///
    /// This is what trackers call: an audit failure never reaches the
    /// operation that triggered it.
    pub fn record(&self, event: TrailEvent) -> Option<TrailContext> {
        let action = event.action;
        match self.run(event) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::error!(action = ?action, error = %e, "failed to record trail");
                None
            }
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("steps", &self.step_names()).finish()
    }
}
