//! Configuration surface consumed by the registry, trackers and pipeline.
//!
//! Every value has a default, so a partial TOML document (or none at all)
//! yields a usable configuration.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Names of the built-in pipeline steps, in their required relative order.
pub const DEFAULT_PIPELINE: [&str; 15] = [
    "assert_action",
    "add_request",
    "add_request_uuid",
    "add_session",
    "add_user",
    "check_no_user",
    "add_user_is_anonymous",
    "check_anonymous_user",
    "add_request_text",
    "add_session_text",
    "add_user_text",
    "log_trail",
    "create_database_trail",
    "create_primary_database_trail_marker",
    "create_related_database_trail_markers",
];

/// Runtime configuration for change tracking.
///
/// Entity patterns use the `namespace.TypeName` label format and field
/// patterns use `namespace.TypeName.field_name`. Shell-style wildcards
/// (`*`, `?`, `[...]`) are supported and matching is case-insensitive.
///
/// # Examples
///
/// ```
/// use trails_core::TrailsConfig;
///
/// let config = TrailsConfig::from_toml_str(r#"
///     include_models = ["app.*"]
///     sensitive_fields = ["app.User.password"]
///     track_no_user = true
/// "#).unwrap();
///
/// assert_eq!(config.include_models, vec!["app.*".to_string()]);
/// assert!(config.track_no_user);
/// assert_eq!(config.sensitive_text, "(hidden)");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailsConfig {
    /// Entity labels to include.
    pub include_models: Vec<String>,
    /// Entity labels to exclude; evaluated after includes and always wins.
    pub exclude_models: Vec<String>,
    /// Field labels never tracked.
    pub exclude_fields: Vec<String>,
    /// Field labels tracked with their value replaced by `sensitive_text`.
    pub sensitive_fields: Vec<String>,
    /// Replacement text for sensitive values.
    pub sensitive_text: String,
    /// Leave empty sensitive values visible instead of redacting them.
    pub sensitive_show_empty: bool,
    /// Actor text used when there is no actor.
    pub no_user_text: String,
    /// Record trails with no acting identity (background jobs, scripts).
    pub track_no_user: bool,
    /// Actor text used for the anonymous identity.
    pub anon_user_text: String,
    /// Record trails produced by the anonymous identity.
    pub track_anon_user: bool,
    /// Record successful logins.
    pub track_login: bool,
    /// Record logouts.
    pub track_logout: bool,
    /// Record failed logins.
    pub track_failed_login: bool,
    /// Record changes made while a migration is running.
    pub track_migrations: bool,
    /// Record changes made by raw loads (fixtures, bulk imports).
    pub track_raw: bool,
    /// Persist trails through the trail store.
    pub use_database: bool,
    /// Emit each trail through `tracing`.
    pub use_logger: bool,
    /// Name attached as the `logger` field of each trail event. Events are
    /// always emitted under the [`LOG_TARGET`](crate::LOG_TARGET) target.
    pub logger: String,
    /// Ordered pipeline step names.
    pub pipeline: Vec<String>,
}

impl Default for TrailsConfig {
    fn default() -> Self {
        Self {
            include_models: strings(&["*"]),
            exclude_models: strings(&[
                "sessions.Session",
                "contenttypes.ContentType",
                "auth.Permission",
                "admin.LogEntry",
            ]),
            exclude_fields: strings(&["auth.User.last_login"]),
            sensitive_fields: strings(&["auth.User.password"]),
            sensitive_text: "(hidden)".to_string(),
            sensitive_show_empty: true,
            no_user_text: "(none)".to_string(),
            track_no_user: false,
            anon_user_text: "(anonymous)".to_string(),
            track_anon_user: true,
            track_login: true,
            track_logout: true,
            track_failed_login: true,
            track_migrations: false,
            track_raw: false,
            use_database: true,
            use_logger: true,
            logger: "trails".to_string(),
            pipeline: strings(&DEFAULT_PIPELINE),
        }
    }
}

impl TrailsConfig {
    /// Parses a configuration from TOML, filling missing keys with defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Returns true if `other` differs in a setting that affects which
    /// entities, fields or identity events are tracked.
    pub fn registry_differs(&self, other: &TrailsConfig) -> bool {
        self.include_models != other.include_models
            || self.exclude_models != other.exclude_models
            || self.exclude_fields != other.exclude_fields
            || self.sensitive_fields != other.sensitive_fields
            || self.track_login != other.track_login
            || self.track_logout != other.track_logout
            || self.track_failed_login != other.track_failed_login
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = TrailsConfig::default();
        assert_eq!(config.include_models, vec!["*"]);
        assert!(config.exclude_models.contains(&"auth.Permission".to_string()));
        assert_eq!(config.sensitive_fields, vec!["auth.User.password"]);
        assert!(!config.track_no_user);
        assert!(config.track_anon_user);
        assert!(!config.track_migrations);
        assert!(!config.track_raw);
        assert_eq!(config.pipeline.len(), DEFAULT_PIPELINE.len());
        assert_eq!(config.pipeline[0], "assert_action");
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config = TrailsConfig::from_toml_str("").unwrap();
        assert_eq!(config, TrailsConfig::default());
    }

    #[test]
    fn toml_overrides_selected_keys() {
        let config = TrailsConfig::from_toml_str(
            r#"
            include_models = ["app.User"]
            exclude_models = []
            use_logger = false
            pipeline = ["assert_action", "create_database_trail"]
            "#,
        )
        .unwrap();
        assert_eq!(config.include_models, vec!["app.User"]);
        assert!(config.exclude_models.is_empty());
        assert!(!config.use_logger);
        assert_eq!(config.pipeline.len(), 2);
        assert_eq!(config.no_user_text, "(none)");
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(TrailsConfig::from_toml_str("include_models = 3").is_err());
    }

    #[test]
    fn registry_differs_ignores_texts() {
        let base = TrailsConfig::default();
        let mut texts = base.clone();
        texts.sensitive_text = "***".to_string();
        assert!(!base.registry_differs(&texts));

        let mut patterns = base.clone();
        patterns.exclude_fields.push("app.User.email".to_string());
        assert!(base.registry_differs(&patterns));
    }
}
