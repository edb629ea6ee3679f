// Copyright (c) The stagehand Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixture filtering over fully qualified test names.

use crate::errors::{GlobConstructError, RunSettingsError};

/// A glob selecting tests by fully qualified name, `{suite_label}.{test}`.
///
/// We do not use `globset::GlobMatcher` directly because it has path-like semantics, so we match
/// against the glob's regex instead.
#[derive(Clone, Debug)]
pub struct FixtureFilter {
    pattern: String,
    regex: regex::bytes::Regex,
}

impl FixtureFilter {
    /// Creates a new fixture filter from a glob.
    pub fn new(pattern: impl Into<String>) -> Result<Self, RunSettingsError> {
        let pattern = pattern.into();
        match Self::build_regex(&pattern) {
            Ok(regex) => Ok(Self { pattern, regex }),
            Err(err) => Err(RunSettingsError::InvalidFixture { pattern, err }),
        }
    }

    fn build_regex(pattern: &str) -> Result<regex::bytes::Regex, GlobConstructError> {
        let glob = globset::GlobBuilder::new(pattern)
            // Test names contain brackets and dots; only escape via [].
            .backslash_escape(false)
            .empty_alternates(true)
            .build()
            .map_err(GlobConstructError::InvalidGlob)?;
        regex::bytes::Regex::new(glob.regex())
            .map_err(|error| GlobConstructError::RegexError(error.to_string()))
    }

    /// Returns the pattern as provided.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Returns true if the fully qualified test name matches.
    pub fn is_match(&self, qualified_name: &str) -> bool {
        self.regex.is_match(qualified_name.as_bytes())
    }
}
