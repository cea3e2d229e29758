use std::io::{self, Write};
use std::path::Path;
use std::time::Instant;

use crate::ir::DocumentStatus;

/// Elapsed-time prefixed status lines on stderr, one per finished document.
pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
    total: usize,
}

impl ConsoleProgress {
    pub fn new(enabled: bool, total: usize) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
            total,
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.line(msg.as_ref());
    }

    pub fn document_done(&self, index: usize, path: &Path, status: DocumentStatus) {
        let total = self.total.max(1);
        let current = (index + 1).min(total);
        let label = match status {
            DocumentStatus::Clean => "ok",
            DocumentStatus::CompletedWithWarnings => "warnings",
            DocumentStatus::Failed => "FAILED",
        };
        self.line(&format!(
            "{current}/{total} {label:<8} {}",
            path.display()
        ));
    }

    fn line(&self, msg: &str) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {msg}");
    }
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_formatting() {
        assert_eq!(fmt_elapsed(-1.0), "00:00");
        assert_eq!(fmt_elapsed(75.9), "01:15");
        assert_eq!(fmt_elapsed(3725.0), "01:02:05");
    }
}
