//! Risk classification derived from the raw tool name.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Read,
    Write,
    Exec,
}

fn exec_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)shell|spawn|eval|exec").expect("static regex"))
}

fn write_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)create|delete|write|send|put|patch").expect("static regex"))
}

impl RiskLevel {
    /// `exec` beats `write`; everything else reads.
    pub fn derive(tool_name: &str) -> Self {
        if exec_regex().is_match(tool_name) {
            Self::Exec
        } else if write_regex().is_match(tool_name) {
            Self::Write
        } else {
            Self::Read
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Exec => "exec",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_tools() {
        assert_eq!(RiskLevel::derive("run_shell_command"), RiskLevel::Exec);
        assert_eq!(RiskLevel::derive("spawn_process"), RiskLevel::Exec);
        assert_eq!(RiskLevel::derive("eval_js"), RiskLevel::Exec);
    }

    #[test]
    fn test_write_tools() {
        assert_eq!(RiskLevel::derive("write_file"), RiskLevel::Write);
        assert_eq!(RiskLevel::derive("delete_row"), RiskLevel::Write);
        assert_eq!(RiskLevel::derive("send_email"), RiskLevel::Write);
        assert_eq!(RiskLevel::derive("http_put"), RiskLevel::Write);
    }

    #[test]
    fn test_exec_beats_write() {
        // Both "create" and "exec" present: exec wins.
        assert_eq!(RiskLevel::derive("create_and_exec"), RiskLevel::Exec);
    }

    #[test]
    fn test_default_is_read() {
        assert_eq!(RiskLevel::derive("search_notes"), RiskLevel::Read);
        assert_eq!(RiskLevel::derive("list_files"), RiskLevel::Read);
    }
}
