//! Per-rule author and content filters.
//!
//! A filter combines an optional allow list, an optional deny list and an
//! optional regex over the message text. Patterns are compiled once when the
//! rule is built and never per message.

use std::collections::HashSet;

use fancy_regex::Regex;
use tracing::warn;

/// A compiled regex pattern with its original string for debugging.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    original: String,
    regex: Regex,
}

impl CompiledPattern {
    /// Compile `pattern`, returning the regex error message on failure.
    pub fn new(pattern: &str) -> Result<Self, String> {
        Regex::new(pattern)
            .map(|regex| Self {
                original: pattern.to_string(),
                regex,
            })
            .map_err(|e| e.to_string())
    }

    /// Unanchored search of the pattern in `text`.
    ///
    /// Match errors (e.g. backtrack limit exceeded) count as no match.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text).unwrap_or_else(|e| {
            warn!("Regex match error for pattern '{}': {}", self.original, e);
            false
        })
    }
}

/// Why a filter rejected a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Author is not on the allow list.
    NotAllowed,
    /// Author is on the deny list.
    Denied,
    /// Text does not match the pattern.
    PatternMismatch,
}

/// Author/content filter of a single rule.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    allow_nicknames: Option<HashSet<String>>,
    deny_nicknames: Option<HashSet<String>>,
    pattern: Option<CompiledPattern>,
}

impl MessageFilter {
    pub fn new(
        allow_nicknames: Option<Vec<String>>,
        deny_nicknames: Option<Vec<String>>,
        pattern: Option<CompiledPattern>,
    ) -> Self {
        Self {
            allow_nicknames: allow_nicknames.map(|n| n.into_iter().collect()),
            deny_nicknames: deny_nicknames.map(|n| n.into_iter().collect()),
            pattern,
        }
    }

    /// Check a message, in order: allow list, deny list, pattern.
    pub fn check(&self, author: &str, text: &str) -> Result<(), Rejection> {
        if let Some(ref allow) = self.allow_nicknames {
            if !allow.contains(author) {
                return Err(Rejection::NotAllowed);
            }
        }
        if let Some(ref deny) = self.deny_nicknames {
            if deny.contains(author) {
                return Err(Rejection::Denied);
            }
        }
        if let Some(ref pattern) = self.pattern {
            if !pattern.is_match(text) {
                return Err(Rejection::PatternMismatch);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Option<Vec<String>> {
        Some(list.iter().map(|s| s.to_string()).collect())
    }

    fn pattern(p: &str) -> Option<CompiledPattern> {
        Some(CompiledPattern::new(p).unwrap())
    }

    #[test]
    fn test_empty_filter_allows_all() {
        let filter = MessageFilter::default();
        assert!(filter.check("anyone", "any message").is_ok());
        assert!(filter.check("", "").is_ok());
    }

    #[test]
    fn test_allow_list() {
        let filter = MessageFilter::new(names(&["gerrit"]), None, None);
        assert!(filter.check("gerrit", "change merged").is_ok());
        assert_eq!(filter.check("alice", "hi"), Err(Rejection::NotAllowed));
    }

    #[test]
    fn test_empty_allow_list_rejects_everyone() {
        let filter = MessageFilter::new(Some(Vec::new()), None, None);
        assert_eq!(filter.check("alice", "hi"), Err(Rejection::NotAllowed));
    }

    #[test]
    fn test_deny_list() {
        let filter = MessageFilter::new(None, names(&["bot2"]), None);
        assert_eq!(filter.check("bot2", "hi"), Err(Rejection::Denied));
        assert!(filter.check("alice", "hi").is_ok());
    }

    #[test]
    fn test_nicknames_are_case_sensitive() {
        let filter = MessageFilter::new(None, names(&["Bot2"]), None);
        assert!(filter.check("bot2", "hi").is_ok());
    }

    #[test]
    fn test_pattern_is_unanchored_search() {
        let filter = MessageFilter::new(None, None, pattern("deploy"));
        assert!(filter.check("alice", "deploy done").is_ok());
        assert!(filter.check("alice", "the deploy failed").is_ok());
        assert_eq!(filter.check("alice", "nothing"), Err(Rejection::PatternMismatch));
    }

    #[test]
    fn test_anchored_pattern() {
        let filter = MessageFilter::new(None, None, pattern("^!relay "));
        assert!(filter.check("alice", "!relay hello").is_ok());
        assert!(filter.check("alice", "say !relay hello").is_err());
    }

    #[test]
    fn test_pattern_against_text_not_author() {
        let filter = MessageFilter::new(None, None, pattern("alice"));
        assert!(filter.check("alice", "hello").is_err());
    }

    #[test]
    fn test_combined_filters() {
        let filter = MessageFilter::new(names(&["alice", "bob"]), names(&["bob"]), pattern("(?i)release"));

        assert!(filter.check("alice", "Release 1.2 is out").is_ok());
        // Allow list is checked before the deny list
        assert_eq!(filter.check("carol", "release"), Err(Rejection::NotAllowed));
        assert_eq!(filter.check("bob", "release"), Err(Rejection::Denied));
        assert_eq!(filter.check("alice", "lunch?"), Err(Rejection::PatternMismatch));
    }

    #[test]
    fn test_lookaround_pattern() {
        let filter = MessageFilter::new(None, None, pattern("^(?!bot:).*"));
        assert!(filter.check("alice", "hello").is_ok());
        assert!(filter.check("alice", "bot: ignored").is_err());
    }

    #[test]
    fn test_invalid_pattern() {
        let err = CompiledPattern::new("[invalid").unwrap_err();
        assert!(!err.is_empty());
    }
}
