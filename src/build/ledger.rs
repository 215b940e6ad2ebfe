//! Build ledger: the persisted record of what has been compiled.
//!
//! The ledger maps every file under the source root (by relative path) to a
//! [`BuildEntry`] holding its last seen modification time and whether the
//! current version has been compiled. A file is *stale* when it has no entry,
//! its modification time moved forward, or its artifact disappeared from the
//! build root.
//!
//! All operations take one ledger-wide lock, so a sync never interleaves with
//! a completion report. The ledger remembers the modification time each
//! queued command was cut from; a completion for a version that has since
//! changed leaves the entry stale.
//!
//! # Example
//!
//! ```ignore
//! use snuff::build::{BuildLedger, BuildThreadPool};
//!
//! let ledger = BuildLedger::load(&build_root);
//! let report = ledger.fill_queue(&pool, &src_root, &build_root);
//! println!("{} of {} files queued", report.to_compile, report.not_built);
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::ledger_format::{self, FormatError, MAX_PATH_BYTES};
use super::scanner::FileSystemScanner;
use super::worker::BuildCommand;
use crate::compiler::FileType;

/// Ledger file name inside the build root.
pub const LEDGER_FILENAME: &str = ".build_graph";

/// Staleness record for one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEntry {
    /// Path relative to the source root, `/`-separated
    pub path: String,
    /// Whether a compiler handles this file
    pub is_content: bool,
    /// Whether the current version has been compiled
    pub was_built: bool,
    /// Source modification time at the last sync
    pub last_modified: DateTime<Utc>,
    /// When the artifact was last written (Unix epoch if never)
    pub last_built: DateTime<Utc>,
}

impl BuildEntry {
    fn discovered(path: String, modified: DateTime<Utc>) -> Self {
        let is_content = FileType::from_path(Path::new(&path)).is_some();
        Self {
            path,
            is_content,
            was_built: false,
            last_modified: modified,
            last_built: DateTime::<Utc>::default(),
        }
    }

    /// Whether the entry is compilable and out of date.
    pub fn needs_build(&self) -> bool {
        self.is_content && !self.was_built
    }
}

/// Outcome of [`BuildLedger::sync`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Entries after the sync
    pub total: usize,
    /// Entries whose current version is compiled
    pub built: usize,
    /// Compilable entries still waiting for a compile
    pub not_built: usize,
    /// Files seen for the first time
    pub added: usize,
    /// Entries whose source moved forward or whose artifact vanished
    pub modified: usize,
    /// Entries pruned because their file disappeared
    pub removed: usize,
}

/// Outcome of [`BuildLedger::fill_queue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueReport {
    /// Commands submitted
    pub to_compile: usize,
    /// Stale entries found by the sync
    pub not_built: usize,
}

/// Error while persisting the ledger.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LedgerError {
    #[error("cannot write ledger '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("path '{path}' is {len} bytes, longer than the {MAX_PATH_BYTES}-byte ledger limit")]
    PathTooLong { path: String, len: usize },
    #[error("corrupt ledger: {0}")]
    Format(#[from] FormatError),
}

/// Receiver of build commands.
pub trait CommandSink {
    fn submit(&self, command: BuildCommand);
}

/// Collects commands for later submission.
impl CommandSink for Mutex<Vec<BuildCommand>> {
    fn submit(&self, command: BuildCommand) {
        self.lock().push(command);
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: BTreeMap<String, BuildEntry>,
    /// Source modification time of each queued command, by path
    in_flight: HashMap<String, DateTime<Utc>>,
    scanner: FileSystemScanner,
}

/// Thread-safe build ledger.
#[derive(Debug, Default)]
pub struct BuildLedger {
    state: Mutex<LedgerState>,
}

impl BuildLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger from existing entries.
    pub fn from_entries(entries: impl IntoIterator<Item = BuildEntry>) -> Self {
        let entries = entries.into_iter().map(|e| (e.path.clone(), e)).collect();
        Self { state: Mutex::new(LedgerState { entries, ..LedgerState::default() }) }
    }

    /// Load the ledger persisted in `build_root`.
    ///
    /// A missing, unreadable or corrupt ledger yields an empty one, which
    /// makes the next sync rebuild everything.
    pub fn load(build_root: &Path) -> Self {
        match Self::try_load(build_root) {
            Ok(Some(ledger)) => ledger,
            Ok(None) => {
                log::debug!("no ledger in {}, starting fresh", build_root.display());
                Self::new()
            }
            Err(e) => {
                log::warn!("{}; rebuilding everything", e);
                Self::new()
            }
        }
    }

    /// Load the ledger, distinguishing "absent" from "broken".
    pub fn try_load(build_root: &Path) -> Result<Option<Self>, LedgerError> {
        let path = build_root.join(LEDGER_FILENAME);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(LedgerError::Io { path, source }),
        };
        let entries = ledger_format::decode(&data)?;
        log::debug!("loaded {} ledger entries from {}", entries.len(), path.display());
        Ok(Some(Self::from_entries(entries)))
    }

    /// Persist the ledger into `build_root`.
    ///
    /// The image is written to a temporary sibling and renamed into place.
    pub fn save(&self, build_root: &Path) -> Result<(), LedgerError> {
        let entries = self.entries();
        if let Some(entry) = entries.iter().find(|e| e.path.len() > MAX_PATH_BYTES) {
            return Err(LedgerError::PathTooLong { path: entry.path.clone(), len: entry.path.len() });
        }
        let image = ledger_format::encode(&entries);

        let path = build_root.join(LEDGER_FILENAME);
        let tmp = build_root.join(format!("{}.tmp", LEDGER_FILENAME));
        fs::create_dir_all(build_root)
            .map_err(|source| LedgerError::Io { path: build_root.to_path_buf(), source })?;
        fs::write(&tmp, &image)
            .map_err(|source| LedgerError::Io { path: tmp.clone(), source })?;
        fs::rename(&tmp, &path).map_err(|source| LedgerError::Io { path: path.clone(), source })?;

        log::debug!("saved {} ledger entries to {}", entries.len(), path.display());
        Ok(())
    }

    /// Reconcile the ledger with the files under `src_root`.
    ///
    /// Also mirrors the source directory layout into `build_root`. If the
    /// source root cannot be read the ledger is left untouched and an empty
    /// report is returned.
    pub fn sync(&self, src_root: &Path, build_root: &Path) -> SyncReport {
        self.state.lock().sync(src_root, build_root, true)
    }

    /// Like [`sync`](Self::sync), but never creates anything under
    /// `build_root`.
    pub fn scan(&self, src_root: &Path, build_root: &Path) -> SyncReport {
        self.state.lock().sync(src_root, build_root, false)
    }

    /// Sync, then submit a command for every stale compilable entry.
    pub fn fill_queue<S: CommandSink + ?Sized>(
        &self,
        sink: &S,
        src_root: &Path,
        build_root: &Path,
    ) -> QueueReport {
        let mut state = self.state.lock();
        let sync = state.sync(src_root, build_root, true);

        let LedgerState { entries, in_flight, .. } = &mut *state;
        let mut to_compile = 0;
        for entry in entries.values().filter(|e| !e.was_built) {
            let Some(file_type) = FileType::from_path(Path::new(&entry.path)) else {
                log::debug!("{}: no compiler for this extension, skipping", entry.path);
                continue;
            };
            in_flight.insert(entry.path.clone(), entry.last_modified);
            sink.submit(BuildCommand::new(src_root, build_root, &entry.path, file_type));
            to_compile += 1;
        }

        QueueReport { to_compile, not_built: sync.not_built }
    }

    /// Record a successful compile of `relative_path`.
    ///
    /// Returns false if the entry no longer exists, its artifact is missing
    /// from `build_root`, or a sync saw the source change after the command
    /// was queued. In the last case the artifact is stamped but the entry
    /// stays stale, so the next fill compiles the new version.
    pub fn on_compiled(&self, relative_path: &str, build_root: &Path) -> bool {
        let mut state = self.state.lock();
        let queued_at = state.in_flight.remove(relative_path);

        if !build_root.join(relative_path).is_file() {
            log::warn!("{}: compiled but no artifact in {}", relative_path, build_root.display());
            return false;
        }

        match state.entries.get_mut(relative_path) {
            Some(entry) => {
                entry.last_built = Utc::now();
                if queued_at.is_some_and(|queued| queued != entry.last_modified) {
                    log::debug!("{}: changed while compiling, keeping it stale", relative_path);
                    entry.was_built = false;
                    return false;
                }
                entry.was_built = true;
                true
            }
            None => {
                log::debug!("{}: compiled after being pruned", relative_path);
                false
            }
        }
    }

    /// Mark every entry stale so the next fill rebuilds everything.
    pub fn mark_all_stale(&self) {
        for entry in self.state.lock().entries.values_mut() {
            entry.was_built = false;
        }
    }

    /// Forget every entry.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.in_flight.clear();
    }

    /// Snapshot of all entries, ordered by path.
    pub fn entries(&self) -> Vec<BuildEntry> {
        self.state.lock().entries.values().cloned().collect()
    }

    pub fn entry(&self, relative_path: &str) -> Option<BuildEntry> {
        self.state.lock().entries.get(relative_path).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Number of compilable entries waiting for a compile.
    pub fn not_built_count(&self) -> usize {
        self.state.lock().entries.values().filter(|e| e.needs_build()).count()
    }
}

impl LedgerState {
    fn sync(&mut self, src_root: &Path, build_root: &Path, mirror: bool) -> SyncReport {
        if let Err(e) = self.scanner.list(src_root) {
            log::warn!("{}; nothing to sync", e);
            return SyncReport::default();
        }
        if mirror {
            self.scanner.create_mirrored_directories(build_root);
        }

        let mut report = SyncReport::default();
        let mut seen = HashSet::with_capacity(self.scanner.file_count());

        for relative in self.scanner.files() {
            let modified = match fs::metadata(src_root.join(&relative)).and_then(|m| m.modified()) {
                Ok(time) => DateTime::<Utc>::from(time),
                Err(e) => {
                    log::warn!("{}: cannot read modification time: {}", relative, e);
                    seen.insert(relative);
                    continue;
                }
            };

            match self.entries.get_mut(&relative) {
                None => {
                    log::debug!("{}: new", relative);
                    self.entries
                        .insert(relative.clone(), BuildEntry::discovered(relative.clone(), modified));
                    report.added += 1;
                }
                Some(entry) if modified > entry.last_modified => {
                    log::debug!("{}: modified", relative);
                    entry.last_modified = modified;
                    entry.was_built = false;
                    report.modified += 1;
                }
                Some(entry) if entry.was_built && !build_root.join(&relative).is_file() => {
                    log::debug!("{}: artifact missing", relative);
                    entry.was_built = false;
                    report.modified += 1;
                }
                Some(_) => {}
            }
            seen.insert(relative);
        }

        let before = self.entries.len();
        self.entries.retain(|path, _| {
            let keep = seen.contains(path);
            if !keep {
                log::debug!("{}: removed", path);
            }
            keep
        });
        report.removed = before - self.entries.len();
        self.in_flight.retain(|path, _| seen.contains(path));

        report.total = self.entries.len();
        report.built = self.entries.values().filter(|e| e.was_built).count();
        report.not_built = self.entries.values().filter(|e| e.needs_build()).count();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn touch_forward(path: &Path, secs: u64) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(secs)).unwrap();
    }

    fn create_test_tree() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let bin = temp.path().join("bin");
        create_test_file(&src, "scripts/main.js", "x=1;");
        create_test_file(&src, "shaders/basic.vs", "float4 main() : SV_Position { return 0; }");
        (temp, src, bin)
    }

    /// Pretend every queued command compiled successfully.
    fn build_all(ledger: &BuildLedger, src: &Path, bin: &Path) {
        let queue = Mutex::new(Vec::new());
        ledger.fill_queue(&queue, src, bin);
        for command in queue.into_inner() {
            fs::write(&command.build_path, b"artifact").unwrap();
            assert!(ledger.on_compiled(&command.relative_path, bin));
        }
    }

    #[test]
    fn test_first_sync_adds_everything() {
        let (_temp, src, bin) = create_test_tree();
        let ledger = BuildLedger::new();

        let report = ledger.sync(&src, &bin);
        assert_eq!(report.total, 2);
        assert_eq!(report.added, 2);
        assert_eq!(report.not_built, 2);
        assert_eq!(report.built, 0);

        let entry = ledger.entry("scripts/main.js").unwrap();
        assert!(entry.is_content);
        assert!(!entry.was_built);
        assert_eq!(entry.last_built, DateTime::<Utc>::default());

        assert!(bin.join("scripts").is_dir());
        assert!(bin.join("shaders").is_dir());
    }

    #[test]
    fn test_scan_leaves_build_root_alone() {
        let (_temp, src, bin) = create_test_tree();
        let ledger = BuildLedger::new();

        let report = ledger.scan(&src, &bin);
        assert_eq!(report.added, 2);
        assert_eq!(report.not_built, 2);
        assert!(!bin.exists());
    }

    #[test]
    fn test_sync_is_idempotent() {
        let (_temp, src, bin) = create_test_tree();
        let ledger = BuildLedger::new();

        let first = ledger.sync(&src, &bin);
        let second = ledger.sync(&src, &bin);
        assert_eq!(first.not_built, second.not_built);
        assert_eq!(second.added, 0);
        assert_eq!(ledger.entries().len(), 2);
    }

    #[test]
    fn test_unknown_extension_tracked_but_never_queued() {
        let (_temp, src, bin) = create_test_tree();
        create_test_file(&src, "docs/readme.txt", "hello");
        let ledger = BuildLedger::new();

        let queue = Mutex::new(Vec::new());
        let report = ledger.fill_queue(&queue, &src, &bin);
        assert_eq!(report.to_compile, 2);
        assert_eq!(report.not_built, 2);
        assert_eq!(ledger.len(), 3);
        assert!(!ledger.entry("docs/readme.txt").unwrap().is_content);
    }

    #[test]
    fn test_fill_queue_commands() {
        let (_temp, src, bin) = create_test_tree();
        let ledger = BuildLedger::new();
        let queue = Mutex::new(Vec::new());
        ledger.fill_queue(&queue, &src, &bin);

        let commands = queue.into_inner();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].relative_path, "scripts/main.js");
        assert_eq!(commands[0].file_type, FileType::Script);
        assert_eq!(commands[0].src_path, src.join("scripts/main.js"));
        assert_eq!(commands[0].build_path, bin.join("scripts/main.js"));
        assert_eq!(commands[1].file_type, FileType::Shader);
    }

    #[test]
    fn test_on_compiled_marks_built() {
        let (_temp, src, bin) = create_test_tree();
        let ledger = BuildLedger::new();
        build_all(&ledger, &src, &bin);

        let report = ledger.sync(&src, &bin);
        assert_eq!(report.built, 2);
        assert_eq!(report.not_built, 0);
        assert!(ledger.entry("scripts/main.js").unwrap().last_built > DateTime::<Utc>::default());

        let queue = Mutex::new(Vec::new());
        assert_eq!(ledger.fill_queue(&queue, &src, &bin).to_compile, 0);
    }

    #[test]
    fn test_on_compiled_unknown_entry() {
        let (_temp, _src, bin) = create_test_tree();
        create_test_file(&bin, "ghost.js", "");
        let ledger = BuildLedger::new();
        assert!(!ledger.on_compiled("ghost.js", &bin));
    }

    #[test]
    fn test_on_compiled_requires_artifact() {
        let (_temp, src, bin) = create_test_tree();
        let ledger = BuildLedger::new();
        ledger.sync(&src, &bin);
        assert!(!ledger.on_compiled("scripts/main.js", &bin));
        assert!(!ledger.entry("scripts/main.js").unwrap().was_built);
    }

    #[test]
    fn test_edit_during_compile_is_requeued() {
        let (_temp, src, bin) = create_test_tree();
        let ledger = BuildLedger::new();
        let queue = Mutex::new(Vec::new());
        ledger.fill_queue(&queue, &src, &bin);

        // v1 is compiling; v2 lands and a sync sees it before the completion
        let script = src.join("scripts/main.js");
        fs::write(bin.join("scripts/main.js"), b"artifact of v1").unwrap();
        fs::write(&script, "x=2;").unwrap();
        touch_forward(&script, 10);
        assert_eq!(ledger.sync(&src, &bin).not_built, 2);

        assert!(!ledger.on_compiled("scripts/main.js", &bin));
        let entry = ledger.entry("scripts/main.js").unwrap();
        assert!(!entry.was_built);
        assert!(entry.last_built > DateTime::<Utc>::default());

        let report = ledger.sync(&src, &bin);
        assert_eq!(report.not_built, 2);
        let requeue = Mutex::new(Vec::new());
        ledger.fill_queue(&requeue, &src, &bin);
        assert!(requeue.into_inner().iter().any(|c| c.relative_path == "scripts/main.js"));
    }

    #[test]
    fn test_completion_of_current_version_sticks() {
        let (_temp, src, bin) = create_test_tree();
        let ledger = BuildLedger::new();
        let queue = Mutex::new(Vec::new());
        ledger.fill_queue(&queue, &src, &bin);

        // A sync with no edit in between does not invalidate the compile
        ledger.sync(&src, &bin);
        fs::write(bin.join("scripts/main.js"), b"artifact").unwrap();
        assert!(ledger.on_compiled("scripts/main.js", &bin));
        assert!(ledger.entry("scripts/main.js").unwrap().was_built);
    }

    #[test]
    fn test_edit_to_unbuilt_file_counts_as_modified() {
        let (_temp, src, bin) = create_test_tree();
        let ledger = BuildLedger::new();
        ledger.sync(&src, &bin);

        touch_forward(&src.join("scripts/main.js"), 10);
        let report = ledger.sync(&src, &bin);
        assert_eq!(report.modified, 1);
        assert_eq!(report.not_built, 2);
    }

    #[test]
    fn test_touch_flips_only_that_entry() {
        let (_temp, src, bin) = create_test_tree();
        let ledger = BuildLedger::new();
        build_all(&ledger, &src, &bin);

        touch_forward(&src.join("scripts/main.js"), 10);
        let report = ledger.sync(&src, &bin);

        assert_eq!(report.modified, 1);
        assert_eq!(report.not_built, 1);
        assert!(!ledger.entry("scripts/main.js").unwrap().was_built);
        assert!(ledger.entry("shaders/basic.vs").unwrap().was_built);
    }

    #[test]
    fn test_missing_artifact_is_stale() {
        let (_temp, src, bin) = create_test_tree();
        let ledger = BuildLedger::new();
        build_all(&ledger, &src, &bin);

        fs::remove_file(bin.join("shaders/basic.vs")).unwrap();
        let report = ledger.sync(&src, &bin);
        assert_eq!(report.not_built, 1);
        assert!(!ledger.entry("shaders/basic.vs").unwrap().was_built);
    }

    #[test]
    fn test_deleted_file_is_pruned() {
        let (_temp, src, bin) = create_test_tree();
        let ledger = BuildLedger::new();
        ledger.sync(&src, &bin);

        fs::remove_file(src.join("shaders/basic.vs")).unwrap();
        let report = ledger.sync(&src, &bin);
        assert_eq!(report.removed, 1);
        assert_eq!(report.total, 1);
        assert!(ledger.entry("shaders/basic.vs").is_none());
    }

    #[test]
    fn test_unreadable_root_leaves_entries() {
        let (temp, src, bin) = create_test_tree();
        let ledger = BuildLedger::new();
        ledger.sync(&src, &bin);

        let report = ledger.sync(&temp.path().join("nowhere"), &bin);
        assert_eq!(report, SyncReport::default());
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_mark_all_stale_and_clear() {
        let (_temp, src, bin) = create_test_tree();
        let ledger = BuildLedger::new();
        build_all(&ledger, &src, &bin);
        assert_eq!(ledger.not_built_count(), 0);

        ledger.mark_all_stale();
        assert_eq!(ledger.not_built_count(), 2);

        ledger.clear();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let (_temp, src, bin) = create_test_tree();
        let ledger = BuildLedger::new();
        build_all(&ledger, &src, &bin);
        ledger.save(&bin).unwrap();

        assert!(bin.join(LEDGER_FILENAME).is_file());
        assert!(!bin.join(".build_graph.tmp").exists());

        let loaded = BuildLedger::load(&bin);
        assert_eq!(loaded.entries(), ledger.entries());
        assert_eq!(loaded.sync(&src, &bin).not_built, 0);
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let temp = TempDir::new().unwrap();
        assert!(BuildLedger::try_load(temp.path()).unwrap().is_none());
        assert!(BuildLedger::load(temp.path()).is_empty());

        fs::write(temp.path().join(LEDGER_FILENAME), b"SNBG\x02\x00\x00\x00").unwrap();
        assert!(matches!(
            BuildLedger::try_load(temp.path()),
            Err(LedgerError::Format(FormatError::UnsupportedVersion(2)))
        ));
        assert!(BuildLedger::load(temp.path()).is_empty());
    }

    #[test]
    fn test_save_rejects_long_path() {
        let temp = TempDir::new().unwrap();
        let entry = BuildEntry::discovered("a/".repeat(MAX_PATH_BYTES) + "x.js", Utc::now());
        let ledger = BuildLedger::from_entries([entry]);

        assert!(matches!(ledger.save(temp.path()), Err(LedgerError::PathTooLong { .. })));
        assert!(!temp.path().join(LEDGER_FILENAME).exists());
    }
}
