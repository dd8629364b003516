use std::fs;
use std::path::Path;

use parking_lot::RwLock;

use crate::error::{ProxyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Added,
    AlreadyBlocked,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnblockOutcome {
    Removed,
    NotBlocked,
}

/// Operator-maintained set of host/URL patterns.
///
/// A candidate matches a pattern when either one contains the other, so
/// `example.com` blocks every URL on that host while `example.com/ads`
/// only blocks that path prefix (and the bare host itself).
#[derive(Debug, Default)]
pub struct Blocklist {
    patterns: RwLock<Vec<String>>,
}

impl Blocklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = Self::new();
        for pattern in patterns {
            list.block(&pattern.into());
        }
        list
    }

    /// Seed the list from a file with one pattern per line.
    /// Blank lines and lines starting with `#` are skipped.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!("failed to read blocklist {}: {}", path.display(), e))
        })?;

        let mut added = 0;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if self.block(line) == BlockOutcome::Added {
                added += 1;
            }
        }

        tracing::info!("Loaded {} blocklist patterns from {}", added, path.display());
        Ok(added)
    }

    pub fn is_blocked(&self, candidate: &str) -> bool {
        let patterns = self.patterns.read();
        patterns.iter().any(|p| pattern_matches(p, candidate))
    }

    /// Add `pattern` unless an identical one is present.
    /// An empty pattern would match every candidate and is rejected.
    pub fn block(&self, pattern: &str) -> BlockOutcome {
        if pattern.is_empty() {
            return BlockOutcome::Rejected;
        }
        let mut patterns = self.patterns.write();
        if patterns.iter().any(|p| p == pattern) {
            return BlockOutcome::AlreadyBlocked;
        }
        patterns.push(pattern.to_string());
        BlockOutcome::Added
    }

    pub fn unblock(&self, pattern: &str) -> UnblockOutcome {
        let mut patterns = self.patterns.write();
        let before = patterns.len();
        patterns.retain(|p| p != pattern);
        if patterns.len() < before {
            UnblockOutcome::Removed
        } else {
            UnblockOutcome::NotBlocked
        }
    }

    /// Patterns in insertion order.
    pub fn list(&self) -> Vec<String> {
        self.patterns.read().clone()
    }

    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }
}

fn pattern_matches(pattern: &str, candidate: &str) -> bool {
    candidate.contains(pattern) || pattern.contains(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_list_blocks_nothing() {
        let list = Blocklist::new();
        assert!(!list.is_blocked("http://example.com/"));
        assert!(!list.is_blocked(""));
    }

    #[test]
    fn test_pattern_inside_candidate() {
        let list = Blocklist::from_patterns(["ads.example.com"]);
        assert!(list.is_blocked("http://ads.example.com/banner"));
        assert!(!list.is_blocked("http://example.com/"));
    }

    #[test]
    fn test_candidate_inside_pattern() {
        let list = Blocklist::from_patterns(["example.com/ads"]);
        assert!(list.is_blocked("example.com"));
        assert!(list.is_blocked("http://example.com/ads/1.png"));
        assert!(!list.is_blocked("http://example.com/news"));
    }

    #[test]
    fn test_coincidental_substring_matches() {
        let list = Blocklist::from_patterns(["bad"]);
        assert!(list.is_blocked("http://notbad.org/"));
    }

    #[test]
    fn test_block_is_idempotent() {
        let list = Blocklist::new();
        assert_eq!(list.block("example.com"), BlockOutcome::Added);
        assert_eq!(list.block("example.com"), BlockOutcome::AlreadyBlocked);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_overlapping_patterns_are_kept_distinct() {
        let list = Blocklist::new();
        assert_eq!(list.block("example.com"), BlockOutcome::Added);
        assert_eq!(list.block("example.com/ads"), BlockOutcome::Added);
        assert_eq!(list.list(), vec!["example.com", "example.com/ads"]);
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let list = Blocklist::new();
        assert_eq!(list.block(""), BlockOutcome::Rejected);
        assert!(list.is_empty());
    }

    #[test]
    fn test_unblock_round_trip() {
        let list = Blocklist::from_patterns(["other.net"]);
        let candidate = "tracker.io";
        let before = list.is_blocked(candidate);

        assert_eq!(list.block(candidate), BlockOutcome::Added);
        assert!(list.is_blocked(candidate));
        assert_eq!(list.unblock(candidate), UnblockOutcome::Removed);
        assert_eq!(list.is_blocked(candidate), before);
        assert_eq!(list.unblock(candidate), UnblockOutcome::NotBlocked);
    }

    #[test]
    fn test_unblock_requires_exact_pattern() {
        let list = Blocklist::from_patterns(["example.com"]);
        assert_eq!(list.unblock("example"), UnblockOutcome::NotBlocked);
        assert!(list.is_blocked("example.com"));
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let list = Blocklist::from_patterns(["c.com", "a.com", "b.com"]);
        list.unblock("a.com");
        list.block("a.com");
        assert_eq!(list.list(), vec!["c.com", "b.com", "a.com"]);
    }

    #[test]
    fn test_load_file_skips_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# ad networks").unwrap();
        writeln!(file, "ads.example.com").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  tracker.io  ").unwrap();
        writeln!(file, "ads.example.com").unwrap();

        let list = Blocklist::new();
        let added = list.load_file(file.path()).unwrap();
        assert_eq!(added, 2);
        assert_eq!(list.list(), vec!["ads.example.com", "tracker.io"]);
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let list = Blocklist::new();
        let err = list.load_file("/nonexistent/blocklist.txt").unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }
}
