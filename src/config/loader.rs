//! Configuration loading and discovery for `snuff.toml`
//!
//! Provides functions to find, load, merge and create configuration.

use super::schema::{BuildConfig, ProjectConfig, SnuffConfig, WatchConfig, CONFIG_FILENAME};
use crate::build::promote_source_root;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// File I/O error
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error
    #[error("Failed to parse snuff.toml: {0}")]
    Parse(#[from] toml::de::Error),
    /// TOML serialization error
    #[error("Failed to write snuff.toml: {0}")]
    Serialize(#[from] toml::ser::Error),
    /// Validation error
    #[error("Config validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
    /// `init` target already holds a project
    #[error("A snuff project already exists at {}", .0.display())]
    AlreadyInitialized(PathBuf),
}

/// CLI arguments that can override config values
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Override source root
    pub src: Option<PathBuf>,
    /// Override build root
    pub out: Option<PathBuf>,
    /// Number of parallel jobs
    pub jobs: Option<usize>,
    /// Override the idle poll interval
    pub poll_interval_ms: Option<u64>,
    /// Override the source-root marker requirement
    pub require_marker: Option<bool>,
}

/// Find snuff.toml by walking up from the current working directory.
///
/// # Returns
/// - `Some(path)` if a snuff.toml file is found
/// - `None` if no config file is found
pub fn find_config() -> Option<PathBuf> {
    env::current_dir().ok().and_then(find_config_from)
}

/// Find snuff.toml by walking up from a specific directory.
pub fn find_config_from(start: PathBuf) -> Option<PathBuf> {
    let mut current = start;

    loop {
        let config_path = current.join(CONFIG_FILENAME);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Load configuration from a snuff.toml file.
///
/// If a path is provided, loads from that file. Otherwise, uses `find_config()`
/// to locate the config file. If no config file is found, returns a default
/// configuration.
///
/// # Example
/// ```ignore
/// let config = load_config(None)?;
/// let config = load_config(Some(Path::new("game/snuff.toml")))?;
/// ```
pub fn load_config(path: Option<&Path>) -> Result<SnuffConfig, ConfigError> {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => find_config(),
    };

    match config_path {
        Some(p) => load_config_file(&p),
        None => Ok(default_config()),
    }
}

fn load_config_file(path: &Path) -> Result<SnuffConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    let config: SnuffConfig = toml::from_str(&contents)?;
    check(&config)?;
    log::debug!("loaded config from {}", path.display());
    Ok(config)
}

/// Turn validation errors into a [`ConfigError::Validation`].
pub fn check(config: &SnuffConfig) -> Result<(), ConfigError> {
    let errors = config.validate();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.into_iter().map(|e| e.to_string()).collect()))
    }
}

/// Create a default configuration when no snuff.toml is found.
///
/// The project name is taken from the current directory.
pub fn default_config() -> SnuffConfig {
    let project_name = env::current_dir()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unnamed".to_string());
    config_named(project_name)
}

fn config_named(name: String) -> SnuffConfig {
    SnuffConfig {
        project: ProjectConfig {
            name,
            src: PathBuf::from("assets"),
            out: PathBuf::from("build"),
        },
        build: BuildConfig::default(),
        watch: WatchConfig::default(),
    }
}

/// Merge CLI overrides into a configuration.
///
/// CLI arguments take precedence over config file values.
pub fn merge_cli_overrides(config: &mut SnuffConfig, overrides: &CliOverrides) {
    if let Some(ref src) = overrides.src {
        config.project.src = src.clone();
    }
    if let Some(ref out) = overrides.out {
        config.project.out = out.clone();
    }
    if let Some(jobs) = overrides.jobs {
        config.build.jobs = jobs;
    }
    if let Some(ms) = overrides.poll_interval_ms {
        config.watch.poll_interval_ms = ms;
    }
    if let Some(require) = overrides.require_marker {
        config.build.require_marker = require;
    }
}

/// Get the project root directory from a config file path.
pub fn project_root(config_path: &Path) -> Option<&Path> {
    config_path.parent()
}

/// Resolve a path relative to the project root.
///
/// If the path is absolute, returns it unchanged.
/// If relative, joins it with the project root.
pub fn resolve_path(project_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    }
}

/// Create a new project in `dir`.
///
/// Writes `snuff.toml`, creates the source root with `scripts/` and
/// `shaders/` subdirectories and promotes it with a `.snuff` marker. Returns
/// the path of the written config.
pub fn init_project(dir: &Path, name: &str) -> Result<PathBuf, ConfigError> {
    let config_path = dir.join(CONFIG_FILENAME);
    if config_path.exists() {
        return Err(ConfigError::AlreadyInitialized(dir.to_path_buf()));
    }

    let config = config_named(name.to_string());
    check(&config)?;

    let src = resolve_path(dir, &config.project.src);
    for sub in ["scripts", "shaders"] {
        fs::create_dir_all(src.join(sub))?;
    }
    fs::create_dir_all(resolve_path(dir, &config.project.out))?;
    promote_source_root(&src)?;

    fs::write(&config_path, toml::to_string_pretty(&config)?)?;
    log::info!("initialized project '{}' at {}", name, dir.display());
    Ok(config_path)
}
