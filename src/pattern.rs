//! Shell-style wildcard patterns over entity and field labels.

use globset::{GlobBuilder, GlobMatcher};

use crate::error::{Error, Result};

/// A compiled, case-insensitive label pattern.
///
/// `*` and `?` match any character including the `.` separating label
/// parts, so `app.*` matches both `app.User` and `app.User.email`.
/// `[...]` matches one character from a class.
///
/// # Examples
///
/// ```
/// use trails_core::pattern::LabelPattern;
///
/// let pattern = LabelPattern::new("APP.user*").unwrap();
/// assert!(pattern.is_match("app.User"));
/// assert!(pattern.is_match("app.UserEmail"));
/// assert!(!pattern.is_match("auth.User"));
/// ```
#[derive(Debug, Clone)]
pub struct LabelPattern {
    source: String,
    matcher: GlobMatcher,
}

impl LabelPattern {
    /// Compiles a pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        let glob = GlobBuilder::new(&pattern.to_lowercase())
            .case_insensitive(true)
            .literal_separator(false)
            .backslash_escape(true)
            .build()
            .map_err(|e| Error::Pattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            source: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    /// Compiles every pattern in order.
    pub fn compile_all(patterns: &[String]) -> Result<Vec<Self>> {
        patterns.iter().map(|p| Self::new(p)).collect()
    }

    /// Returns the pattern as configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Tests a label.
    pub fn is_match(&self, label: &str) -> bool {
        self.matcher.is_match(label.to_lowercase())
    }

    /// Returns the labels matched by this pattern, in input order.
    pub fn filter<'a, I>(&self, labels: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        labels.into_iter().filter(|label| self.is_match(label)).collect()
    }
}
