//! Source tree enumeration.
//!
//! [`FileSystemScanner`] walks a source root and records every regular file
//! grouped by its directory, plus the list of subdirectories so the output
//! tree can mirror the source layout.

use glob::glob;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Marker file that designates a directory as a source root.
pub const MARKER_FILENAME: &str = ".snuff";

/// Error during a scan.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ScanError {
    /// The root directory could not be opened
    #[error("cannot read source root '{}': {source}", path.display())]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The root path produced an invalid glob pattern
    #[error("invalid scan pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Recursive directory lister.
///
/// Directory keys and file paths are relative to the scanned root and use `/`
/// as separator; the root itself is the empty string.
#[derive(Debug, Default)]
pub struct FileSystemScanner {
    root: PathBuf,
    /// Directory -> sorted file names
    directories: BTreeMap<String, Vec<String>>,
    /// Subdirectories of the root, parents before children
    subdirectories: Vec<String>,
}

impl FileSystemScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerate `root`, replacing the result of any previous scan.
    pub fn list(&mut self, root: &Path) -> Result<(), ScanError> {
        self.root = root.to_path_buf();
        self.directories.clear();
        self.subdirectories.clear();

        fs::read_dir(root)
            .map_err(|source| ScanError::RootUnreadable { path: root.to_path_buf(), source })?;

        self.directories.insert(String::new(), Vec::new());

        let pattern = format!("{}/**/*", glob::Pattern::escape(&root.to_string_lossy()));
        for entry in glob(&pattern)? {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    log::warn!("skipping unreadable path: {}", e);
                    continue;
                }
            };
            let Some(relative) = relative_key(root, &path) else {
                continue;
            };

            if path.is_dir() {
                self.directories.entry(relative.clone()).or_default();
                self.subdirectories.push(relative);
            } else if path.is_file() {
                let (dir, name) = match relative.rsplit_once('/') {
                    Some((dir, name)) => (dir.to_string(), name.to_string()),
                    None => (String::new(), relative.clone()),
                };
                if dir.is_empty() && name == MARKER_FILENAME {
                    continue;
                }
                self.directories.entry(dir).or_default().push(name);
            }
        }

        for names in self.directories.values_mut() {
            names.sort();
        }
        self.subdirectories.sort();

        log::debug!(
            "scanned {}: {} files in {} directories",
            root.display(),
            self.file_count(),
            self.directories.len()
        );
        Ok(())
    }

    /// Root of the last scan.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory -> file names map of the last scan.
    pub fn directories(&self) -> &BTreeMap<String, Vec<String>> {
        &self.directories
    }

    /// Subdirectories of the last scan, relative to the root.
    pub fn subdirectories(&self) -> &[String] {
        &self.subdirectories
    }

    /// Relative paths of every file found, in sorted order.
    pub fn files(&self) -> impl Iterator<Item = String> + '_ {
        self.directories.iter().flat_map(|(dir, names)| {
            names.iter().map(move |name| {
                if dir.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", dir, name)
                }
            })
        })
    }

    pub fn file_count(&self) -> usize {
        self.directories.values().map(Vec::len).sum()
    }

    /// Create `output_root` and every scanned subdirectory beneath it.
    ///
    /// Failures are logged and counted, never returned.
    pub fn create_mirrored_directories(&self, output_root: &Path) -> usize {
        let mut failures = 0;
        let targets = std::iter::once(output_root.to_path_buf())
            .chain(self.subdirectories.iter().map(|d| output_root.join(d)));

        for dir in targets {
            if dir.is_dir() {
                continue;
            }
            if let Err(e) = fs::create_dir_all(&dir) {
                log::warn!("cannot create output directory '{}': {}", dir.display(), e);
                failures += 1;
            }
        }
        failures
    }
}

/// `/`-separated path of `path` relative to `root`.
fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative.components().map(|c| c.as_os_str().to_string_lossy()).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Whether `dir` carries the source-root marker.
pub fn is_source_root(dir: &Path) -> bool {
    dir.join(MARKER_FILENAME).is_file()
}

/// Mark `dir` as a source root.
pub fn promote_source_root(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(
        dir.join(MARKER_FILENAME),
        format!("promoted {}\n", chrono::Utc::now().to_rfc3339()),
    )
}
