use std::fmt;

use indexmap::IndexMap;
use serde_json::Value;

/// Mask substituted for password-like credential values.
pub const CLEANSED_SUBSTITUTE: &str = "********************";

const SENSITIVE_CREDENTIAL_MARKERS: [&str; 6] = ["api", "token", "key", "secret", "pass", "signature"];

/// A wrapper that prevents accidental exposure of sensitive values.
///
/// `Secret<T>` keeps submitted credentials and similar material out of
/// `Debug`/`Display` output. The wrapped value can only be read through
/// [`expose_secret`](Self::expose_secret).
///
/// # Examples
///
/// ```
/// use trails_core::Secret;
///
/// let password = Secret::new("hunter2".to_string());
/// assert_eq!(format!("{:?}", password), "[REDACTED]");
/// assert_eq!(password.expose_secret(), "hunter2");
/// ```
// Do NOT derive Clone, Copy or Default: secrets must not be duplicated carelessly.
pub struct Secret<T> {
    inner: T,
}

impl<T> Secret<T> {
    /// Wraps a sensitive value.
    pub fn new(value: T) -> Self {
        Self { inner: value }
    }

    /// Explicitly exposes the secret value.
    pub fn expose_secret(&self) -> &T {
        &self.inner
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Credentials submitted with a failed login attempt.
///
/// Every value is held as a [`Secret`]; the only way to get a loggable
/// view is [`cleansed`](Self::cleansed), which masks password-like keys.
#[derive(Debug, Default)]
pub struct Credentials {
    values: IndexMap<String, Secret<String>>,
}

impl Credentials {
    /// Creates an empty credential set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a submitted credential.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), Secret::new(value.into()));
        self
    }

    /// Returns true if no credential was submitted.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the credentials as a JSON object with sensitive values masked.
    pub fn cleansed(&self) -> Value {
        let map = self
            .values
            .iter()
            .map(|(key, value)| {
                let shown = if is_sensitive_credential(key) {
                    CLEANSED_SUBSTITUTE.to_string()
                } else {
                    value.expose_secret().clone()
                };
                (key.clone(), Value::String(shown))
            })
            .collect::<serde_json::Map<String, Value>>();
        Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Credentials {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Credentials::new(), |creds, (k, v)| creds.with(k, v))
    }
}

fn is_sensitive_credential(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_CREDENTIAL_MARKERS
        .iter()
        .any(|marker| key.contains(marker))
}

/// Returns true for values treated as "empty" by the show-empty policy.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Redacts one side of a sensitive field.
///
/// With `show_empty`, an empty value is kept so readers can tell that the
/// field was blank; anything else becomes `text`.
pub fn redact(value: &Value, text: &str, show_empty: bool) -> Value {
    if show_empty && is_empty_value(value) {
        value.clone()
    } else {
        Value::String(text.to_string())
    }
}
