//! Human-readable output channel.
//!
//! Every state transition and failure is reported as one line of text.
//! [`OutputLog`] forwards each line to `tracing` and keeps a bounded
//! history that `replmux-ctl output` can fetch.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::info;

/// Sink for user-facing status lines.
pub trait OutputChannel: Send + Sync {
    /// Append one line.
    fn append_line(&self, line: &str);
}

/// Output channel that logs and remembers the most recent lines.
#[derive(Debug)]
pub struct OutputLog {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl OutputLog {
    /// Create a log retaining at most `capacity` lines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Snapshot of the retained lines, oldest first.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// Whether any retained line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl OutputChannel for OutputLog {
    fn append_line(&self, line: &str) {
        info!(target: "replmux::output", "{line}");
        let mut lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.to_owned());
    }
}
