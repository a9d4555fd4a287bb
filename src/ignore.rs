//! Glob-based path exclusion
//!
//! Patterns use shell-glob semantics (`*`, `?`, `[...]`) against the full
//! path string. `*` also crosses `/`, so `*.tmp` excludes temp files at any
//! depth.

use std::path::Path;

use glob::{MatchOptions, Pattern};

use crate::error::{Result, SyncError};

/// Case sensitivity follows the host filesystem's usual convention
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: !cfg!(any(windows, target_os = "macos")),
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Set of ignore patterns; any match excludes a path
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    patterns: Vec<Pattern>,
}

impl IgnoreMatcher {
    /// Matcher that ignores nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load from an optional pattern file. No file means no patterns.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::empty());
        };

        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!(
                "cannot read ignore file {}: {}",
                path.display(),
                e
            ))
        })?;

        let matcher = Self::parse(&content)?;
        tracing::debug!(
            "Loaded {} ignore patterns from {}",
            matcher.len(),
            path.display()
        );
        Ok(matcher)
    }

    /// Parse newline-delimited patterns. Blank lines and `#` comments are skipped.
    pub fn parse(content: &str) -> Result<Self> {
        let mut patterns = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let pattern = Pattern::new(&collapse_stars(line)).map_err(|e| {
                SyncError::Config(format!(
                    "invalid ignore pattern on line {}: {:?} ({})",
                    idx + 1,
                    line,
                    e.msg
                ))
            })?;
            patterns.push(pattern);
        }

        Ok(Self { patterns })
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.patterns
            .iter()
            .any(|p| p.matches_with(&path, MATCH_OPTIONS))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Rewrite runs of `*` that `glob` would reject as a single `*`.
///
/// `glob` only accepts `**` as a whole path component. Since `*` already
/// crosses `/` here, any other run of stars matches the same as one star.
fn collapse_stars(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '*' {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let start = i;
        while i < chars.len() && chars[i] == '*' {
            i += 1;
        }
        let run = i - start;
        let bounded_before = start == 0 || chars[start - 1] == '/';
        let bounded_after = i == chars.len() || chars[i] == '/';

        if run == 2 && bounded_before && bounded_after {
            out.push_str("**");
        } else {
            out.push('*');
        }
    }

    out
}
