//! Build progress reporting.
//!
//! Provides a flexible progress reporting system for build operations.
//! Supports console output (with colors) and JSON lines.
//!
//! # Example
//!
//! ```ignore
//! use snuff::build::progress::{ConsoleProgress, FileStatus, ProgressEvent, ProgressReporter};
//!
//! let reporter = ConsoleProgress::new();
//! reporter.report(ProgressEvent::BuildStarted { total_files: 2, up_to_date: 5 });
//! reporter.report(ProgressEvent::FileStarted { path: "scripts/main.js".to_string() });
//! reporter.report(ProgressEvent::FileCompleted {
//!     path: "scripts/main.js".to_string(),
//!     status: FileStatus::Success,
//!     duration_ms: 3,
//! });
//! reporter.report(ProgressEvent::BuildCompleted {
//!     success: true,
//!     duration_ms: 40,
//!     compiled: 2,
//!     up_to_date: 5,
//!     failed: 0,
//! });
//! ```

use parking_lot::Mutex;
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Outcome of one file in progress events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// Compiled and written
    Success,
    /// Compile failed
    Failed(String),
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Success => write!(f, "success"),
            FileStatus::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Events that can be reported during a build.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Build process started
    BuildStarted {
        /// Files queued for compilation
        total_files: usize,
        /// Files already current
        up_to_date: usize,
    },
    /// A file was handed to a worker
    FileStarted {
        /// Path relative to the source root
        path: String,
    },
    /// A file finished compiling
    FileCompleted {
        path: String,
        status: FileStatus,
        /// Duration in milliseconds
        duration_ms: u64,
    },
    /// Build process completed
    BuildCompleted {
        /// Whether every file compiled
        success: bool,
        /// Total duration in milliseconds
        duration_ms: u64,
        compiled: usize,
        up_to_date: usize,
        failed: usize,
    },
    /// A warning was generated
    Warning {
        /// File that generated the warning (if applicable)
        path: Option<String>,
        message: String,
    },
    /// An error occurred
    Error {
        /// File that generated the error (if applicable)
        path: Option<String>,
        message: String,
    },
}

/// Trait for progress reporters.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event.
    fn report(&self, event: ProgressEvent);

    /// Check if this reporter wants verbose output.
    fn is_verbose(&self) -> bool {
        false
    }
}

/// A progress reporter that discards all events.
#[derive(Debug, Default)]
pub struct NullProgress;

impl NullProgress {
    pub fn new() -> Self {
        Self
    }
}

impl ProgressReporter for NullProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Console progress reporter with optional colors.
pub struct ConsoleProgress {
    use_colors: bool,
    verbose: bool,
    /// Files finished in the current build
    current: AtomicUsize,
    /// Files queued in the current build
    total: AtomicUsize,
    /// Output writer (for testing)
    output: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for ConsoleProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleProgress")
            .field("use_colors", &self.use_colors)
            .field("verbose", &self.verbose)
            .field("current", &self.current)
            .field("total", &self.total)
            .finish()
    }
}

impl ConsoleProgress {
    /// Create a console reporter writing to stderr.
    pub fn new() -> Self {
        Self {
            use_colors: true,
            verbose: false,
            current: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            output: Mutex::new(Box::new(std::io::stderr())),
        }
    }

    /// Create a console progress reporter that writes to a custom output.
    pub fn with_output<W: Write + Send + 'static>(output: W) -> Self {
        Self {
            use_colors: false, // Disable colors for custom output
            verbose: false,
            current: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            output: Mutex::new(Box::new(output)),
        }
    }

    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn color(&self, text: &str, color: &str) -> String {
        if self.use_colors {
            format!("{}{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    fn green(&self, text: &str) -> String {
        self.color(text, "\x1b[32m")
    }

    fn yellow(&self, text: &str) -> String {
        self.color(text, "\x1b[33m")
    }

    fn red(&self, text: &str) -> String {
        self.color(text, "\x1b[31m")
    }

    fn cyan(&self, text: &str) -> String {
        self.color(text, "\x1b[36m")
    }

    fn bold(&self, text: &str) -> String {
        self.color(text, "\x1b[1m")
    }

    fn writeln(&self, line: &str) {
        let _ = writeln!(self.output.lock(), "{}", line);
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for ConsoleProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::BuildStarted { total_files, up_to_date } => {
                self.total.store(total_files, Ordering::SeqCst);
                self.current.store(0, Ordering::SeqCst);
                if total_files > 0 {
                    self.writeln(&format!(
                        "{} Compiling {} file{} ({} up to date)...",
                        self.cyan("[build]"),
                        total_files,
                        if total_files == 1 { "" } else { "s" },
                        up_to_date
                    ));
                } else if self.verbose {
                    self.writeln(&format!("{} Nothing to compile", self.cyan("[build]")));
                }
            }
            ProgressEvent::FileStarted { path } => {
                if self.verbose {
                    let current = self.current.load(Ordering::SeqCst) + 1;
                    let total = self.total.load(Ordering::SeqCst);
                    self.writeln(&format!(
                        "{} [{}/{}] Compiling {}...",
                        self.cyan("[build]"),
                        current,
                        total,
                        path
                    ));
                }
            }
            ProgressEvent::FileCompleted { path, status, duration_ms } => {
                let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                let total = self.total.load(Ordering::SeqCst);

                let status_str = match &status {
                    FileStatus::Success => self.green("ok"),
                    FileStatus::Failed(_) => self.red("FAILED"),
                };

                self.writeln(&format!(
                    "{} [{}/{}] {} {} ({})",
                    self.cyan("[build]"),
                    current,
                    total,
                    status_str,
                    path,
                    format_duration(duration_ms)
                ));

                if let FileStatus::Failed(err) = status {
                    for line in err.lines() {
                        self.writeln(&format!("        {}", self.red(line)));
                    }
                }
            }
            ProgressEvent::BuildCompleted { success, duration_ms, compiled, up_to_date, failed } => {
                let duration_str = format_duration(duration_ms);

                if success {
                    self.writeln(&format!(
                        "\n{} {} {} compiled, {} up to date in {}",
                        self.green("[done]"),
                        self.bold(&compiled.to_string()),
                        if compiled == 1 { "file" } else { "files" },
                        up_to_date,
                        duration_str
                    ));
                } else {
                    self.writeln(&format!(
                        "\n{} Build failed: {} compiled, {} up to date, {} {} in {}",
                        self.red("[error]"),
                        compiled,
                        up_to_date,
                        failed,
                        if failed == 1 { "failure" } else { "failures" },
                        duration_str
                    ));
                }
            }
            ProgressEvent::Warning { path, message } => {
                let prefix = path.map(|p| format!("{}: ", p)).unwrap_or_default();
                self.writeln(&format!("{} {}{}", self.yellow("[warn]"), prefix, message));
            }
            ProgressEvent::Error { path, message } => {
                let prefix = path.map(|p| format!("{}: ", p)).unwrap_or_default();
                self.writeln(&format!("{} {}{}", self.red("[error]"), prefix, message));
            }
        }
    }

    fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// JSON lines progress reporter for machine-readable output.
pub struct JsonProgress {
    output: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for JsonProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonProgress").finish()
    }
}

impl JsonProgress {
    /// Create a JSON reporter writing to stderr.
    pub fn new() -> Self {
        Self { output: Mutex::new(Box::new(std::io::stderr())) }
    }

    /// Create a JSON progress reporter that writes to a custom output.
    pub fn with_output<W: Write + Send + 'static>(output: W) -> Self {
        Self { output: Mutex::new(Box::new(output)) }
    }
}

impl Default for JsonProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let value = match event {
            ProgressEvent::BuildStarted { total_files, up_to_date } => json!({
                "event": "build_started",
                "total_files": total_files,
                "up_to_date": up_to_date,
            }),
            ProgressEvent::FileStarted { path } => json!({
                "event": "file_started",
                "path": path,
            }),
            ProgressEvent::FileCompleted { path, status, duration_ms } => {
                let mut value = json!({
                    "event": "file_completed",
                    "path": path,
                    "status": match &status {
                        FileStatus::Success => "success",
                        FileStatus::Failed(_) => "failed",
                    },
                    "duration_ms": duration_ms,
                });
                if let FileStatus::Failed(error) = status {
                    value["error"] = error.into();
                }
                value
            }
            ProgressEvent::BuildCompleted { success, duration_ms, compiled, up_to_date, failed } => {
                json!({
                    "event": "build_completed",
                    "success": success,
                    "duration_ms": duration_ms,
                    "compiled": compiled,
                    "up_to_date": up_to_date,
                    "failed": failed,
                })
            }
            ProgressEvent::Warning { path, message } => {
                json!({ "event": "warning", "path": path, "message": message })
            }
            ProgressEvent::Error { path, message } => {
                json!({ "event": "error", "path": path, "message": message })
            }
        };
        let _ = writeln!(self.output.lock(), "{}", value);
    }
}

/// Progress tracker for aggregating build statistics.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    start_time: Option<Instant>,
    /// Files queued
    total: usize,
    completed: usize,
    succeeded: usize,
    failed: usize,
    /// Files already current when the build started
    up_to_date: usize,
    in_progress: Vec<String>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a build.
    pub fn start(&mut self, total_files: usize, up_to_date: usize) {
        *self = Self {
            start_time: Some(Instant::now()),
            total: total_files,
            up_to_date,
            ..Self::default()
        };
    }

    pub fn file_started(&mut self, path: &str) {
        self.in_progress.push(path.to_string());
    }

    pub fn file_completed(&mut self, path: &str, status: &FileStatus) {
        self.in_progress.retain(|p| p != path);
        self.completed += 1;
        match status {
            FileStatus::Success => self.succeeded += 1,
            FileStatus::Failed(_) => self.failed += 1,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Completion percentage of the queued files.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Files currently compiling.
    pub fn in_progress(&self) -> &[String] {
        &self.in_progress
    }

    /// Generate a BuildCompleted event from current state.
    pub fn build_completed_event(&self) -> ProgressEvent {
        ProgressEvent::BuildCompleted {
            success: self.is_success(),
            duration_ms: self.elapsed_ms(),
            compiled: self.succeeded,
            up_to_date: self.up_to_date,
            failed: self.failed,
        }
    }
}

/// Format a duration in milliseconds to a human-readable string.
pub(crate) fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        let minutes = ms / 60_000;
        let seconds = (ms % 60_000) / 1000;
        format!("{}m {}s", minutes, seconds)
    }
}
