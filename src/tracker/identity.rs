use std::sync::Arc;

use super::{SharedContext, Tracker};
use crate::audit::Action;
use crate::config::TrailsConfig;
use crate::hooks::{Hook, HookHandler, HookPoint};
use crate::logging::trace_hook;
use crate::pipeline::TrailEvent;
use crate::request::{Actor, RequestInfo};

/// Which identity events are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityToggles {
    /// Record successful logins
    pub login: bool,
    /// Record logouts
    pub logout: bool,
    /// Record rejected logins
    pub failed_login: bool,
}

impl IdentityToggles {
    /// Reads the toggles from a configuration.
    pub fn from_config(config: &TrailsConfig) -> Self {
        Self {
            login: config.track_login,
            logout: config.track_logout,
            failed_login: config.track_failed_login,
        }
    }
}

/// Records login, logout and failed-login trails.
///
/// A disabled event is not subscribed to at all.
pub struct IdentityTracker {
    toggles: IdentityToggles,
    context: SharedContext,
}

impl IdentityTracker {
    /// Creates a tracker for the enabled identity events.
    pub fn new(toggles: IdentityToggles, context: SharedContext) -> Self {
        trace_hook!(toggles = ?toggles, "identity tracker created");
        Self { toggles, context }
    }

    /// Returns the enabled events.
    pub fn toggles(&self) -> IdentityToggles {
        self.toggles
    }

    fn session_event(
        &self,
        action: Action,
        actor: Option<&Actor>,
        request: Option<&Arc<RequestInfo>>,
    ) -> TrailEvent {
        TrailEvent::new(action)
            .with_actor(actor.cloned())
            .with_request(request.cloned())
    }
}

impl HookHandler for IdentityTracker {
    fn handle(&self, hook: &Hook<'_>) {
        trace_hook!(hook = ?hook, "identity tracker hook");
        let event = match hook {
            Hook::LoggedIn { actor, request } if self.toggles.login => {
                self.session_event(Action::Login, *actor, *request)
            }
            Hook::LoggedOut { actor, request } if self.toggles.logout => {
                self.session_event(Action::Logout, *actor, *request)
            }
            Hook::LoginFailed { credentials, request } if self.toggles.failed_login => {
                TrailEvent::new(Action::FailedLogin)
                    .with_request(request.cloned())
                    .with_data(credentials.cleansed())
            }
            _ => return,
        };
        self.context.load().pipeline.record(event);
    }
}

impl Tracker for IdentityTracker {
    fn subscriber_id(&self) -> String {
        "trails:identity".to_string()
    }

    fn hook_points(&self) -> Vec<HookPoint> {
        let mut points = Vec::with_capacity(3);
        if self.toggles.login {
            points.push(HookPoint::LoggedIn);
        }
        if self.toggles.logout {
            points.push(HookPoint::LoggedOut);
        }
        if self.toggles.failed_login {
            points.push(HookPoint::LoginFailed);
        }
        points
    }
}
