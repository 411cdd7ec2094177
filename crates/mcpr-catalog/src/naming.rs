//! Exposed tool names: `slug(serverName)__rawToolName`.
//!
//! The slug is stable under re-slugging, so the exposed name always parses
//! back to the originating pair.

use regex::Regex;
use std::sync::OnceLock;

/// Lowercase; every non-alphanumeric char becomes `_`.
pub fn slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

pub fn exposed_tool_name(server_name: &str, tool_name: &str) -> String {
    format!("{}__{}", slug(server_name), tool_name)
}

fn exposed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-z0-9_]+?)__(.+)$").expect("static regex"))
}

/// Recover `(server_slug, raw_tool_name)` from an exposed name.
pub fn parse_exposed_name(exposed: &str) -> Option<(String, String)> {
    let captures = exposed_regex().captures(exposed)?;
    Some((captures[1].to_string(), captures[2].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_lowercases_and_replaces() {
        assert_eq!(slug("My Server"), "my_server");
        assert_eq!(slug("fs-local"), "fs_local");
        assert_eq!(slug("GitHub2"), "github2");
    }

    #[test]
    fn test_slug_is_idempotent() {
        for name in ["My Server", "fs-local", "already_slugged", "Ünïcode!"] {
            assert_eq!(slug(&slug(name)), slug(name));
        }
    }

    #[test]
    fn test_round_trip() {
        for (server, tool) in [
            ("filesystem", "read_file"),
            ("My Server", "tool-with-dash"),
            ("a b", "x__y"),
        ] {
            let exposed = exposed_tool_name(server, tool);
            let (parsed_slug, parsed_tool) = parse_exposed_name(&exposed).unwrap();
            assert_eq!(parsed_slug, slug(server));
            assert_eq!(parsed_tool, tool);
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_exposed_name("no_separator").is_none());
        assert!(parse_exposed_name("__tool").is_none());
        assert!(parse_exposed_name("server__").is_none());
        assert!(parse_exposed_name("UPPER__tool").is_none());
    }
}
