//! Configuration schema types for `snuff.toml`
//!
//! Defines the structure and validation rules for a snuff project.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Name of the project configuration file.
pub const CONFIG_FILENAME: &str = "snuff.toml";

/// Project metadata section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (required)
    pub name: String,
    /// Source root holding scripts and shaders
    #[serde(default = "default_src")]
    pub src: PathBuf,
    /// Build root receiving compiled containers and the ledger
    #[serde(default = "default_out")]
    pub out: PathBuf,
}

fn default_src() -> PathBuf {
    PathBuf::from("assets")
}

fn default_out() -> PathBuf {
    PathBuf::from("build")
}

/// Build execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Worker count; 0 uses the hardware concurrency
    #[serde(default)]
    pub jobs: usize,
    /// Refuse to build a source root without a `.snuff` marker
    #[serde(default = "default_true")]
    pub require_marker: bool,
}

fn default_true() -> bool {
    true
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { jobs: 0, require_marker: true }
    }
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Idle re-scan interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { poll_interval_ms: default_poll_interval_ms() }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Complete snuff.toml configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnuffConfig {
    /// Project metadata (required)
    pub project: ProjectConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    /// Path to the invalid field (e.g., "watch.poll_interval_ms")
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "snuff.toml: '{}' {}", self.field, self.message)
    }
}

impl SnuffConfig {
    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();

        if self.project.name.trim().is_empty() {
            errors.push(ConfigValidationError {
                field: "project.name".to_string(),
                message: "must be a non-empty string".to_string(),
            });
        }

        if self.watch.poll_interval_ms == 0 {
            errors.push(ConfigValidationError {
                field: "watch.poll_interval_ms".to_string(),
                message: "must be a positive integer".to_string(),
            });
        }

        // The ledger lives in the build root; sharing it with the sources
        // would make every artifact a build candidate.
        if self.project.src == self.project.out {
            errors.push(ConfigValidationError {
                field: "project.out".to_string(),
                message: "must differ from project.src".to_string(),
            });
        }

        errors
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parse() {
        let toml = r#"
[project]
name = "test-project"
"#;
        let config: SnuffConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.project.name, "test-project");
        assert_eq!(config.project.src, PathBuf::from("assets"));
        assert_eq!(config.project.out, PathBuf::from("build"));
        assert_eq!(config.build.jobs, 0);
        assert!(config.build.require_marker);
        assert_eq!(config.watch.poll_interval_ms, 1000);
        assert!(config.is_valid());
    }

    #[test]
    fn test_full_config_parse() {
        let toml = r#"
[project]
name = "full-project"
src = "content"
out = "bin"

[build]
jobs = 4
require_marker = false

[watch]
poll_interval_ms = 250
"#;
        let config: SnuffConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.project.src, PathBuf::from("content"));
        assert_eq!(config.project.out, PathBuf::from("bin"));
        assert_eq!(config.build.jobs, 4);
        assert!(!config.build.require_marker);
        assert_eq!(config.watch.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_missing_project_fails() {
        let result: Result<SnuffConfig, _> = toml::from_str("[build]\njobs = 2\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_empty_name() {
        let config: SnuffConfig = toml::from_str("[project]\nname = \"  \"\n").unwrap();
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "project.name");
    }

    #[test]
    fn test_validation_zero_interval() {
        let toml = r#"
[project]
name = "p"

[watch]
poll_interval_ms = 0
"#;
        let config: SnuffConfig = toml::from_str(toml).unwrap();
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "watch.poll_interval_ms");
        assert_eq!(
            errors[0].to_string(),
            "snuff.toml: 'watch.poll_interval_ms' must be a positive integer"
        );
    }

    #[test]
    fn test_validation_src_equals_out() {
        let toml = r#"
[project]
name = "p"
src = "same"
out = "same"
"#;
        let config: SnuffConfig = toml::from_str(toml).unwrap();
        assert!(!config.is_valid());
        assert_eq!(config.validate()[0].field, "project.out");
    }
}
