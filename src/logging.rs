use crate::pipeline::TrailContext;

/// Target every trail log event is emitted under.
pub const LOG_TARGET: &str = "trails";

/// Structured log emission of finished trails.
///
/// `TrailLog` is created by the `log_trail` pipeline step with the
/// configured logger name, which is attached to every event as the
/// `logger` field so subscribers can route trail events separately.
///
/// Only rendered texts and identities are logged. Field payloads are left
/// out; sensitive values are redacted before they reach the context anyway.
#[derive(Debug, Clone, Copy)]
pub struct TrailLog<'a> {
    logger: &'a str,
}

impl<'a> TrailLog<'a> {
    /// Creates a logger bound to a configured logger name.
    pub fn new(logger: &'a str) -> Self {
        Self { logger }
    }

    /// Returns the configured logger name.
    pub fn logger(&self) -> &str {
        self.logger
    }

    /// Logs a trail at info level.
    pub fn trail(&self, ctx: &TrailContext) {
        let action = ctx.action.map(|a| a.as_str()).unwrap_or("");
        let object = ctx.instance.as_ref().map(|o| o.text.as_str()).unwrap_or("");
        tracing::info!(
            target: LOG_TARGET,
            logger = %self.logger,
            action,
            actor = ctx.actor_text.as_deref().unwrap_or(""),
            request = ctx.request_text.as_deref().unwrap_or(""),
            session = ctx.session_text.as_deref().unwrap_or(""),
            object,
            related = ctx.related.len(),
            "{} {}",
            action,
            object
        );
    }

    /// Dumps the whole context at debug level.
    pub fn context(&self, ctx: &TrailContext) {
        tracing::debug!(target: LOG_TARGET, logger = %self.logger, context = ?ctx, "trail context");
    }
}

/// Traces a hook call or a connect/disconnect.
macro_rules! trace_hook {
    ($($arg:tt)*) => {
        tracing::trace!(target: $crate::logging::LOG_TARGET, $($arg)*)
    };
}

pub(crate) use trace_hook;
