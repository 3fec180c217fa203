//! Deployment log sinks.
//!
//! The log file is the complete record of a deployment: every command issued
//! and every line it printed is appended verbatim, whatever the verbosity.
//! Verbosity only decides whether output lines are echoed on the terminal.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::policy::Severity;

/// Line-oriented log collaborator used by the executor and the error policy.
pub trait LogSink: Send + Sync {
    /// Record a line without echoing it (commands, prompt answers).
    fn command(&self, line: &str);

    /// Record a line produced by a command; echoed when verbose.
    fn output(&self, line: &str);

    /// Show an operator-facing message and record it.
    fn report(&self, severity: Severity, message: &str);

    /// Where the complete record can be read.
    fn location(&self) -> String;

    /// Toggle terminal echo of output lines.
    fn set_verbose(&self, verbose: bool);
}

fn emit_report(severity: Severity, message: &str) {
    match severity {
        Severity::Ignore => tracing::debug!(target: "deploy", "{message}"),
        Severity::Notice => tracing::info!(target: "deploy", "{message}"),
        Severity::Warning => tracing::warn!(target: "deploy", "{message}"),
        Severity::Error => tracing::error!(target: "deploy", "{message}"),
    }
}

/// Append-only log file.
pub struct FileLog {
    path: PathBuf,
    file: Mutex<File>,
    verbose: AtomicBool,
}

impl FileLog {
    /// Open (or create) the log file for appending, creating parent directories.
    pub fn open(path: impl Into<PathBuf>, verbose: bool) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let log = Self {
            path,
            file: Mutex::new(file),
            verbose: AtomicBool::new(verbose),
        };
        log.append(&format!(
            "# deployment session started {}",
            chrono::Local::now().to_rfc3339()
        ));
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) {
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = writeln!(file, "{line}") {
            tracing::warn!(path = %self.path.display(), %err, "failed to write deployment log");
        }
    }
}

impl LogSink for FileLog {
    fn command(&self, line: &str) {
        self.append(line);
    }

    fn output(&self, line: &str) {
        self.append(line);
        if self.verbose.load(Ordering::Relaxed) {
            tracing::info!(target: "deploy::output", "{line}");
        }
    }

    fn report(&self, severity: Severity, message: &str) {
        self.append(message);
        emit_report(severity, message);
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }
}

/// A recorded line and whether it would have been echoed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub echoed: bool,
}

/// In-memory sink, used by tests.
#[derive(Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<LogLine>>,
    reports: Mutex<Vec<(Severity, String)>>,
    verbose: AtomicBool,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries().into_iter().map(|l| l.text).collect()
    }

    pub fn entries(&self) -> Vec<LogLine> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn reports(&self) -> Vec<(Severity, String)> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn push(&self, text: &str, echoed: bool) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(LogLine {
                text: text.to_string(),
                echoed,
            });
        }
    }
}

impl LogSink for MemoryLog {
    fn command(&self, line: &str) {
        self.push(line, false);
    }

    fn output(&self, line: &str) {
        self.push(line, self.verbose.load(Ordering::Relaxed));
    }

    fn report(&self, severity: Severity, message: &str) {
        self.push(message, true);
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((severity, message.to_string()));
        }
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }

    fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }
}
