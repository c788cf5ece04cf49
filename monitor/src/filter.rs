//! File name filtering for watch events.
//!
//! A [`NameFilter`] is a single glob matched against the *file name* of an
//! event path, never against its directories. Matching is case-insensitive,
//! and `*.*` is treated as "every file" so filters written for
//! Windows-style watchers keep matching names without an extension.

use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use thiserror::Error;

/// Pattern treated as an alias for `*`.
const ALL_FILES_ALIAS: &str = "*.*";

/// Errors that can occur while building a filter.
#[derive(Error, Debug)]
pub enum FilterError {
    /// The pattern is not a valid glob.
    #[error("invalid filter pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// Glob-based file name filter.
#[derive(Debug, Clone)]
pub struct NameFilter {
    pattern: String,
    matcher: GlobMatcher,
}

impl NameFilter {
    /// Compiles `pattern` into a filter.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::InvalidPattern`] if the glob does not parse.
    pub fn new(pattern: &str) -> Result<Self, FilterError> {
        let effective = match pattern.trim() {
            "" | ALL_FILES_ALIAS => "*",
            other => other,
        };

        let glob = GlobBuilder::new(effective)
            .case_insensitive(true)
            .literal_separator(true)
            .build()
            .map_err(|source| FilterError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;

        Ok(Self {
            pattern: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    /// The pattern as configured.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns `true` if the file name of `path` matches.
    ///
    /// Paths without a file name component (e.g. `/`) never match.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.matcher.is_match(Path::new(name)))
    }
}
