//! Indexing progress reporting.
//!
//! Per-item outcomes and periodic run counters are emitted through a
//! [`ProgressReporter`] handle that is created once in `main` and injected
//! into the pipeline. Output goes to **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

/// Point-in-time counters for one pipeline run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunSnapshot {
    pub admitted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl RunSnapshot {
    pub fn in_flight(&self) -> u64 {
        self.admitted
            .saturating_sub(self.succeeded)
            .saturating_sub(self.failed)
    }
}

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A work item was hashed and written.
    Indexed {
        name: String,
        commit: String,
        files: usize,
        pages: usize,
    },
    /// A work item failed; siblings are unaffected.
    Failed {
        name: String,
        commit: String,
        error: String,
    },
    /// Periodic counters, plus once more when the run ends.
    Summary(RunSnapshot),
}

/// Receives progress events from the pipeline.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly lines on stderr: "indexed zlib@cacf7f1d  12 files  1 page".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Indexed {
                name,
                commit,
                files,
                pages,
            } => format!(
                "indexed {}@{}  {} files  {} {}\n",
                name,
                short(commit),
                format_number(*files as u64),
                pages,
                if *pages == 1 { "page" } else { "pages" }
            ),
            ProgressEvent::Failed {
                name,
                commit,
                error,
            } => format!("failed  {}@{}  {}\n", name, short(commit), error),
            ProgressEvent::Summary(s) => format!(
                "progress  {} admitted  {} indexed  {} failed  {} in flight\n",
                format_number(s.admitted),
                format_number(s.succeeded),
                format_number(s.failed),
                format_number(s.in_flight())
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Indexed {
                name,
                commit,
                files,
                pages,
            } => serde_json::json!({
                "event": "indexed",
                "name": name,
                "commit": commit,
                "files": files,
                "pages": pages
            }),
            ProgressEvent::Failed {
                name,
                commit,
                error,
            } => serde_json::json!({
                "event": "failed",
                "name": name,
                "commit": commit,
                "error": error
            }),
            ProgressEvent::Summary(s) => serde_json::json!({
                "event": "progress",
                "admitted": s.admitted,
                "succeeded": s.succeeded,
                "failed": s.failed,
                "in_flight": s.in_flight()
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn short(commit: &str) -> &str {
    commit.get(..12).unwrap_or(commit)
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> std::sync::Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => std::sync::Arc::new(NoProgress),
            ProgressMode::Human => std::sync::Arc::new(StderrProgress),
            ProgressMode::Json => std::sync::Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn in_flight_never_underflows() {
        let s = RunSnapshot {
            admitted: 3,
            succeeded: 2,
            failed: 1,
        };
        assert_eq!(s.in_flight(), 0);
        let odd = RunSnapshot {
            admitted: 1,
            succeeded: 2,
            failed: 0,
        };
        assert_eq!(odd.in_flight(), 0);
    }

    #[test]
    fn short_commit_handles_short_input() {
        assert_eq!(short("abcdef"), "abcdef");
        assert_eq!(short("cacf7f1d4e3d44d871b6"), "cacf7f1d4e3d");
    }
}
