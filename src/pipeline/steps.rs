//! Built-in pipeline steps.
//!
//! The default pipeline runs them in the order of
//! [`DEFAULT_PIPELINE`](crate::config::DEFAULT_PIPELINE). `debug` is not part
//! of the default list and can be inserted anywhere to dump the context.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::{ContextUpdate, FnStep, PipelineStep, StepEnv, StepOutcome, TrailContext};
use crate::audit::{NewMarker, NewTrail};
use crate::error::{Error, Result};
use crate::logging::TrailLog;

/// Returns every built-in step.
pub fn builtins() -> Vec<Arc<dyn PipelineStep>> {
    let table: [(&str, fn(&TrailContext, &StepEnv<'_>) -> Result<StepOutcome>); 16] = [
        ("debug", debug),
        ("assert_action", assert_action),
        ("add_request", add_request),
        ("add_request_uuid", add_request_uuid),
        ("add_session", add_session),
        ("add_user", add_user),
        ("check_no_user", check_no_user),
        ("add_user_is_anonymous", add_user_is_anonymous),
        ("check_anonymous_user", check_anonymous_user),
        ("add_request_text", add_request_text),
        ("add_session_text", add_session_text),
        ("add_user_text", add_user_text),
        ("log_trail", log_trail),
        ("create_database_trail", create_database_trail),
        ("create_primary_database_trail_marker", create_primary_database_trail_marker),
        ("create_related_database_trail_markers", create_related_database_trail_markers),
    ];
    table
        .into_iter()
        .map(|(name, run)| Arc::new(FnStep::new(name, run)) as Arc<dyn PipelineStep>)
        .collect()
}

/// Dumps the context at debug level.
pub fn debug(ctx: &TrailContext, env: &StepEnv<'_>) -> Result<StepOutcome> {
    TrailLog::new(&env.config.logger).context(ctx);
    Ok(StepOutcome::Unchanged)
}

/// Fails if the event has no action kind.
pub fn assert_action(ctx: &TrailContext, _env: &StepEnv<'_>) -> Result<StepOutcome> {
    match ctx.action {
        Some(_) => Ok(StepOutcome::Unchanged),
        None => Err(Error::MissingAction),
    }
}

/// Falls back to the ambient request.
pub fn add_request(ctx: &TrailContext, env: &StepEnv<'_>) -> Result<StepOutcome> {
    let request = ctx.request.clone().or_else(|| env.identity.current_request());
    Ok(StepOutcome::Update(ContextUpdate::new().request(request)))
}

/// Assigns the request its correlation id, or reuses the one it has.
pub fn add_request_uuid(ctx: &TrailContext, _env: &StepEnv<'_>) -> Result<StepOutcome> {
    Ok(match &ctx.request {
        Some(request) => StepOutcome::Update(ContextUpdate::new().request_uuid(request.correlation_id())),
        None => StepOutcome::Unchanged,
    })
}

/// Falls back to the request's session.
pub fn add_session(ctx: &TrailContext, _env: &StepEnv<'_>) -> Result<StepOutcome> {
    let session = ctx
        .session
        .clone()
        .or_else(|| ctx.request.as_ref().and_then(|r| r.session.clone()));
    Ok(StepOutcome::Update(ContextUpdate::new().session(session)))
}

/// Falls back to the ambient actor.
pub fn add_user(ctx: &TrailContext, env: &StepEnv<'_>) -> Result<StepOutcome> {
    let actor = ctx.actor.clone().or_else(|| env.identity.current_actor());
    Ok(StepOutcome::Update(ContextUpdate::new().actor(actor)))
}

/// Stops events without an actor unless `track_no_user` is set.
pub fn check_no_user(ctx: &TrailContext, env: &StepEnv<'_>) -> Result<StepOutcome> {
    if ctx.actor.is_none() && !env.config.track_no_user {
        return Ok(StepOutcome::Stop);
    }
    Ok(StepOutcome::Unchanged)
}

/// Flags anonymous actors and clears the actor reference for them.
pub fn add_user_is_anonymous(ctx: &TrailContext, _env: &StepEnv<'_>) -> Result<StepOutcome> {
    let update = match &ctx.actor {
        Some(actor) if actor.anonymous => ContextUpdate::new().actor(None).actor_is_anonymous(true),
        _ => ContextUpdate::new().actor_is_anonymous(false),
    };
    Ok(StepOutcome::Update(update))
}

/// Stops anonymous events unless `track_anon_user` is set.
pub fn check_anonymous_user(ctx: &TrailContext, env: &StepEnv<'_>) -> Result<StepOutcome> {
    if ctx.actor_is_anonymous && !env.config.track_anon_user {
        return Ok(StepOutcome::Stop);
    }
    Ok(StepOutcome::Unchanged)
}

/// Renders the request as `[uuid] METHOD /full/path`, omitting missing parts.
pub fn add_request_text(ctx: &TrailContext, _env: &StepEnv<'_>) -> Result<StepOutcome> {
    let Some(request) = &ctx.request else {
        return Ok(StepOutcome::Unchanged);
    };
    let mut parts = Vec::with_capacity(3);
    if let Some(uuid) = ctx.request_uuid.or_else(|| request.assigned_correlation_id()) {
        parts.push(format!("[{}]", uuid));
    }
    if let Some(method) = request.method.as_deref().filter(|m| !m.is_empty()) {
        parts.push(method.to_string());
    }
    if let Some(path) = request.path.as_deref().filter(|p| !p.is_empty()) {
        parts.push(path.to_string());
    }
    Ok(StepOutcome::Update(ContextUpdate::new().request_text(parts.join(" "))))
}

/// Renders the session as its key, empty without a session.
pub fn add_session_text(ctx: &TrailContext, _env: &StepEnv<'_>) -> Result<StepOutcome> {
    let text = ctx.session.as_ref().map(|s| s.key.clone()).unwrap_or_default();
    Ok(StepOutcome::Update(ContextUpdate::new().session_text(text)))
}

/// Renders the actor, keeping an explicit text from the event.
pub fn add_user_text(ctx: &TrailContext, env: &StepEnv<'_>) -> Result<StepOutcome> {
    if ctx.actor_text.is_some() {
        return Ok(StepOutcome::Unchanged);
    }
    let text = if ctx.actor_is_anonymous {
        env.config.anon_user_text.clone()
    } else {
        match &ctx.actor {
            Some(actor) => actor.name.clone(),
            None => env.config.no_user_text.clone(),
        }
    };
    Ok(StepOutcome::Update(ContextUpdate::new().actor_text(text)))
}

/// Emits the trail through `tracing` when `use_logger` is set.
pub fn log_trail(ctx: &TrailContext, env: &StepEnv<'_>) -> Result<StepOutcome> {
    if env.config.use_logger {
        TrailLog::new(&env.config.logger).trail(ctx);
    }
    Ok(StepOutcome::Unchanged)
}

/// Persists the trail when `use_database` is set.
pub fn create_database_trail(ctx: &TrailContext, env: &StepEnv<'_>) -> Result<StepOutcome> {
    if !env.config.use_database {
        return Ok(StepOutcome::Unchanged);
    }
    let action = ctx.action.ok_or(Error::MissingAction)?;
    let actor = ctx.actor.as_ref().and_then(|a| a.key.clone());
    let trail = NewTrail::new(action)
        .with_actor(actor, ctx.actor_text.clone().unwrap_or_default())
        .with_anonymous(ctx.actor_is_anonymous)
        .with_request_text(ctx.request_text.clone().unwrap_or_default())
        .with_session_text(ctx.session_text.clone().unwrap_or_default())
        .with_data(ctx.data.clone().unwrap_or_else(|| Value::Object(Map::new())));
    let id = env.store.create_trail(trail)?;
    tracing::debug!(trail_id = %id, action = %action, "trail created");
    Ok(StepOutcome::Update(ContextUpdate::new().trail(id)))
}

/// Persists the marker of the primary object, if there is one.
pub fn create_primary_database_trail_marker(ctx: &TrailContext, env: &StepEnv<'_>) -> Result<StepOutcome> {
    if !env.config.use_database {
        return Ok(StepOutcome::Unchanged);
    }
    let (Some(trail), Some(instance)) = (ctx.trail, &ctx.instance) else {
        return Ok(StepOutcome::Update(ContextUpdate::new().primary_marker(None)));
    };
    let mut marker = NewMarker::new(trail, instance.key.clone(), instance.text.clone());
    if let Some(data) = &ctx.instance_data {
        marker = marker.with_data(data.clone());
    }
    let id = env.store.create_marker(marker)?;
    Ok(StepOutcome::Update(ContextUpdate::new().primary_marker(Some(id))))
}

/// Persists one marker per related object.
pub fn create_related_database_trail_markers(ctx: &TrailContext, env: &StepEnv<'_>) -> Result<StepOutcome> {
    if !env.config.use_database {
        return Ok(StepOutcome::Unchanged);
    }
    let Some(trail) = ctx.trail else {
        return Ok(StepOutcome::Update(ContextUpdate::new().related_markers(Vec::new())));
    };
    let mut ids = Vec::with_capacity(ctx.related.len());
    for related in &ctx.related {
        let mut marker = NewMarker::new(trail, related.object.key.clone(), related.object.text.clone())
            .with_rel(related.rel.clone());
        if let Some(data) = &related.data {
            marker = marker.with_data(data.clone());
        }
        ids.push(env.store.create_marker(marker)?);
    }
    Ok(StepOutcome::Update(ContextUpdate::new().related_markers(ids)))
}
