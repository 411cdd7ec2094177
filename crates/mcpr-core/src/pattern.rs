//! Glob pattern matching shared by the policy engine and the token
//! validator.
//!
//! Semantics:
//! - exact string equality always matches;
//! - `*` and `**` alone match everything;
//! - otherwise the glob is compiled to an anchored regex where `**`
//!   crosses `/` boundaries (`.*`), `*` does not (`[^/]*`), and `?`
//!   matches a single character.
//!
//! Compiled regexes are cached process-wide: rule and server-access
//! patterns are evaluated on every request, and the set of distinct
//! patterns is small.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Upper bound on cached compiled patterns. Rules and token access maps
/// stay far below this; crossing it flushes the table wholesale.
const CACHE_CAPACITY: usize = 512;

/// Match `candidate` against a glob `pattern`.
pub fn matches_pattern(pattern: &str, candidate: &str) -> bool {
    if pattern == candidate {
        return true;
    }
    if pattern == "*" || pattern == "**" {
        return true;
    }

    match compiled(pattern) {
        Some(re) => re.is_match(candidate),
        None => false,
    }
}

/// Fetch (or compile and cache) the regex for a glob pattern.
fn compiled(pattern: &str) -> Option<Regex> {
    static CACHE: OnceLock<Mutex<HashMap<String, Regex>>> = OnceLock::new();
    let mut cache = CACHE
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);

    if let Some(re) = cache.get(pattern) {
        return Some(re.clone());
    }

    match Regex::new(&glob_to_regex(pattern)) {
        Ok(re) => {
            if cache.len() >= CACHE_CAPACITY {
                cache.clear();
            }
            cache.insert(pattern.to_string(), re.clone());
            Some(re)
        }
        Err(error) => {
            tracing::warn!(pattern = %pattern, error = %error, "unmatchable glob pattern");
            None
        }
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    regex.push_str(".*");
                } else {
                    regex.push_str("[^/]*");
                }
            }
            '?' => regex.push('.'),
            // Escape regex metacharacters verbatim.
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                regex.push('\\');
                regex.push(ch);
            }
            other => regex.push(other),
        }
    }

    regex.push('$');
    regex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches_pattern("read_file", "read_file"));
        assert!(!matches_pattern("read_file", "write_file"));
    }

    #[test]
    fn test_star_matches_everything() {
        assert!(matches_pattern("*", "anything"));
        assert!(matches_pattern("*", ""));
        assert!(matches_pattern("**", "deep/nested/name"));
    }

    #[test]
    fn test_prefix_glob() {
        assert!(matches_pattern("dangerous-*", "dangerous-delete-all"));
        assert!(!matches_pattern("dangerous-*", "delete_file"));
    }

    #[test]
    fn test_star_does_not_cross_slash() {
        assert!(matches_pattern("srv/*", "srv/tool"));
        assert!(!matches_pattern("srv/*", "srv/sub/tool"));
        assert!(matches_pattern("srv/**", "srv/sub/tool"));
    }

    #[test]
    fn test_question_mark_single_char() {
        assert!(matches_pattern("tool-?", "tool-a"));
        assert!(!matches_pattern("tool-?", "tool-ab"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        assert!(matches_pattern("a.b", "a.b"));
        assert!(!matches_pattern("a.b", "axb"));
        assert!(matches_pattern("fn(x)", "fn(x)"));
    }

    #[test]
    fn test_anchored_both_ends() {
        assert!(!matches_pattern("admin-*", "not-admin-reset"));
        assert!(!matches_pattern("*-admin", "admin-reset"));
    }

    #[test]
    fn test_repeated_matches_hit_the_cache() {
        // Same pattern, many candidates: the second and later calls read
        // the cached regex and must agree with the first.
        for _ in 0..3 {
            assert!(matches_pattern("cache-*", "cache-hit"));
            assert!(!matches_pattern("cache-*", "miss"));
        }
    }

    #[test]
    fn test_cache_overflow_keeps_matching_correct() {
        for n in 0..(CACHE_CAPACITY + 10) {
            let pattern = format!("bulk-{n}-*");
            assert!(matches_pattern(&pattern, &format!("bulk-{n}-x")));
        }
        // The flushed entry recompiles transparently.
        assert!(matches_pattern("bulk-0-*", "bulk-0-y"));
    }
}
