//! Compiled patterns keyed by their source text.
//!
//! Directive values keep plain pattern strings; the engine looks the compiled
//! [`Regex`] up here so each pattern is compiled once per run.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{DirectiveError, DirectiveResult};

static GROUP_REFERENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\(\d+)").expect("valid group reference pattern"));

#[derive(Debug, Clone, Default)]
pub struct RegexCache {
    patterns: HashMap<String, Regex>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `pattern` unless it is already cached.
    pub fn compile(&mut self, pattern: &str) -> DirectiveResult<&Regex> {
        if !self.patterns.contains_key(pattern) {
            let regex = Regex::new(pattern).map_err(|e| DirectiveError::BadPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
            self.patterns.insert(pattern.to_string(), regex);
        }
        self.get(pattern).ok_or_else(|| DirectiveError::BadPattern {
            pattern: pattern.to_string(),
            message: "pattern missing from cache".to_string(),
        })
    }

    pub fn get(&self, pattern: &str) -> Option<&Regex> {
        self.patterns.get(pattern)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Rewrite `\1`-style group references to the `${1}` syntax of `regex`.
pub fn normalize_replacement(replacement: &str) -> String {
    GROUP_REFERENCE.replace_all(replacement, "$${${1}}").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_compile_once() {
        let mut cache = RegexCache::new();
        assert!(cache.compile("^S(\\d+)$").unwrap().is_match("S12"));
        cache.compile("^S(\\d+)$").unwrap();
        assert_eq!(cache.len(), 1);
        assert!(matches!(cache.compile("("), Err(DirectiveError::BadPattern { .. })));
    }

    #[test]
    fn test_normalize_replacement() {
        assert_eq!(normalize_replacement(r"sample-\1"), "sample-${1}");
        assert_eq!(normalize_replacement(r"\2\1x"), "${2}${1}x");
        assert_eq!(normalize_replacement("$1"), "$1");
    }
}
