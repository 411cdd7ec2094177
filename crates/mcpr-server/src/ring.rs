//! Bounded ring of recent child stderr lines, kept for diagnostics.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const STDERR_RING_CAPACITY: usize = 100;

/// Last-N stderr lines from a child process. Clones share the buffer.
#[derive(Clone, Debug, Default)]
pub struct StderrRing {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: String) {
        let mut lines = self
            .lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if lines.len() == STDERR_RING_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_last_n_lines() {
        let ring = StderrRing::new();
        for n in 0..(STDERR_RING_CAPACITY + 10) {
            ring.push(format!("line {n}"));
        }
        let lines = ring.snapshot();
        assert_eq!(lines.len(), STDERR_RING_CAPACITY);
        assert_eq!(lines[0], "line 10");
        assert_eq!(lines.last().unwrap(), &format!("line {}", STDERR_RING_CAPACITY + 9));
    }

    #[test]
    fn test_clones_share_buffer() {
        let ring = StderrRing::new();
        let clone = ring.clone();
        clone.push("from clone".to_string());
        assert_eq!(ring.snapshot(), vec!["from clone".to_string()]);
    }
}
