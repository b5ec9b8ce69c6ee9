// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Key exclusion rules

use regex::Regex;

use crate::config::ExcludePaths;

/// Ordered key patterns for copy and remove events.
///
/// Patterns are unanchored and case-sensitive; the first match wins.
#[derive(Clone, Debug, Default)]
pub struct ExclusionRules {
    copy: Vec<Regex>,
    remove: Vec<Regex>,
}

impl ExclusionRules {
    pub fn new(paths: &ExcludePaths) -> Result<Self, regex::Error> {
        Ok(Self {
            copy: compile(&paths.copy_object)?,
            remove: compile(&paths.remove_object)?,
        })
    }

    /// The first copy pattern matching `key`, if any.
    pub fn copy_match(&self, key: &str) -> Option<&str> {
        first_match(&self.copy, key)
    }

    /// The first remove pattern matching `key`, if any.
    pub fn remove_match(&self, key: &str) -> Option<&str> {
        first_match(&self.remove, key)
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| Regex::new(p)).collect()
}

fn first_match<'a>(patterns: &'a [Regex], key: &str) -> Option<&'a str> {
    patterns
        .iter()
        .find(|pattern| pattern.is_match(key))
        .map(Regex::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(copy: &[&str], remove: &[&str]) -> ExclusionRules {
        ExclusionRules::new(&ExcludePaths {
            copy_object: copy.iter().map(|s| s.to_string()).collect(),
            remove_object: remove.iter().map(|s| s.to_string()).collect(),
        })
        .unwrap()
    }

    #[test]
    fn test_first_match_wins() {
        let rules = rules(&["tmp/", "^tmp/scratch"], &[]);
        assert_eq!(rules.copy_match("tmp/scratch/a"), Some("tmp/"));
        assert_eq!(rules.copy_match("photos/a.jpg"), None);
    }

    #[test]
    fn test_unanchored_and_case_sensitive() {
        let rules = rules(&["\\.part$"], &["cache"]);
        assert_eq!(rules.copy_match("dir/upload.part"), Some("\\.part$"));
        assert_eq!(rules.copy_match("dir/upload.PART"), None);
        assert_eq!(rules.remove_match("a/cache/b"), Some("cache"));
        assert_eq!(rules.remove_match("a/Cache/b"), None);
    }

    #[test]
    fn test_lists_are_independent() {
        let rules = rules(&["^logs/"], &[]);
        assert!(rules.copy_match("logs/x").is_some());
        assert!(rules.remove_match("logs/x").is_none());
    }

    #[test]
    fn test_invalid_pattern() {
        let paths = ExcludePaths {
            copy_object: vec!["[".to_string()],
            remove_object: vec![],
        };
        assert!(ExclusionRules::new(&paths).is_err());
    }
}
