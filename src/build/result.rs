//! Build result types.
//!
//! Contains types for representing the outcome of build operations.

use std::path::PathBuf;
use std::time::Duration;

use super::progress::FileStatus;
use super::worker::Completion;
use crate::compiler::FileType;

/// Result of compiling a single file.
#[derive(Debug, Clone)]
pub struct FileResult {
    /// Path relative to the source root
    pub path: String,
    pub file_type: FileType,
    pub status: FileStatus,
    /// Artifact written, if the compile succeeded
    pub output: Option<PathBuf>,
    pub duration: Duration,
}

impl FileResult {
    pub fn success(path: String, file_type: FileType, output: PathBuf, duration: Duration) -> Self {
        Self { path, file_type, status: FileStatus::Success, output: Some(output), duration }
    }

    pub fn failed(path: String, file_type: FileType, error: String, duration: Duration) -> Self {
        Self { path, file_type, status: FileStatus::Failed(error), output: None, duration }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, FileStatus::Success)
    }
}

impl From<&Completion> for FileResult {
    fn from(completion: &Completion) -> Self {
        let command = &completion.command;
        match &completion.outcome {
            Ok(()) => Self::success(
                command.relative_path.clone(),
                command.file_type,
                command.build_path.clone(),
                completion.duration,
            ),
            Err(e) => Self::failed(
                command.relative_path.clone(),
                command.file_type,
                e.to_string(),
                completion.duration,
            ),
        }
    }
}

/// Result of one build pass.
#[derive(Debug, Default)]
pub struct BuildResult {
    /// Files compiled in this pass, in completion order
    pub files: Vec<FileResult>,
    /// Compilable files that were already current
    pub up_to_date: usize,
    pub total_duration: Duration,
}

impl BuildResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_result(&mut self, result: FileResult) {
        self.files.push(result);
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.total_duration = duration;
        self
    }

    pub fn with_up_to_date(mut self, up_to_date: usize) -> Self {
        self.up_to_date = up_to_date;
        self
    }

    pub fn success_count(&self) -> usize {
        self.files.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.files.len() - self.success_count()
    }

    /// Check if the overall build succeeded (no failures).
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    /// Artifacts written in this pass.
    pub fn outputs(&self) -> Vec<&PathBuf> {
        self.files.iter().filter_map(|r| r.output.as_ref()).collect()
    }

    pub fn failures(&self) -> Vec<&FileResult> {
        self.files.iter().filter(|r| !r.is_success()).collect()
    }

    /// Format a summary of the build result.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        let success = self.success_count();
        let failed = self.failed_count();

        if failed > 0 {
            lines.push(format!(
                "Build failed: {} compiled, {} failed, {} up to date",
                success, failed, self.up_to_date
            ));
            for file in self.failures() {
                lines.push(format!("  - {}: {}", file.path, file.status));
            }
        } else {
            lines.push(format!(
                "Build succeeded: {} compiled, {} up to date in {:?}",
                success, self.up_to_date, self.total_duration
            ));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::worker::{BuildCommand, WorkerError};
    use std::path::Path;

    fn completion(path: &str, outcome: Result<(), WorkerError>) -> Completion {
        Completion {
            command: BuildCommand::new(Path::new("src"), Path::new("bin"), path, FileType::Script),
            outcome,
            duration: Duration::from_millis(4),
            worker: 0,
        }
    }

    #[test]
    fn test_file_result_from_completion() {
        let ok = FileResult::from(&completion("a.js", Ok(())));
        assert!(ok.is_success());
        assert_eq!(ok.output, Some(PathBuf::from("bin/a.js")));

        let err = WorkerError::Open { path: PathBuf::from("src/b.js"), message: "gone".into() };
        let failed = FileResult::from(&completion("b.js", Err(err)));
        assert!(!failed.is_success());
        assert!(failed.output.is_none());
        assert_eq!(failed.status, FileStatus::Failed("could not open 'src/b.js': gone".into()));
    }

    #[test]
    fn test_build_result_counts() {
        let mut result = BuildResult::new().with_up_to_date(3);
        result.add_result(FileResult::from(&completion("a.js", Ok(()))));
        result.add_result(FileResult::failed(
            "b.js".to_string(),
            FileType::Script,
            "error".to_string(),
            Duration::ZERO,
        ));

        assert_eq!(result.success_count(), 1);
        assert_eq!(result.failed_count(), 1);
        assert!(!result.is_success());
        assert_eq!(result.outputs(), [&PathBuf::from("bin/a.js")]);

        let summary = result.summary();
        assert!(summary.contains("Build failed: 1 compiled, 1 failed, 3 up to date"));
        assert!(summary.contains("  - b.js: failed: error"));
    }

    #[test]
    fn test_empty_build_result_succeeds() {
        let result = BuildResult::new().with_duration(Duration::from_millis(100));
        assert!(result.is_success());
        assert!(result.summary().contains("Build succeeded: 0 compiled"));
    }
}
