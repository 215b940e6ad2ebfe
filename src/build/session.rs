//! Build orchestration.
//!
//! A [`BuildSession`] wires the ledger, the pool and a progress reporter
//! together: sync and queue stale files, wait for the pool to drain while
//! recording successful compiles, then persist the ledger. In watch mode an
//! [`IdlePoller`] triggers the next pass.

use crossbeam_channel::{select, Receiver};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::ledger::{BuildLedger, LedgerError};
use super::poller::IdlePoller;
use super::pool::{BuildThreadPool, CompletionHandler};
use super::progress::{FileStatus, ProgressEvent, ProgressReporter, ProgressTracker};
use super::result::{BuildResult, FileResult};
use super::worker::{BuildCommand, Completion};

/// Error that aborts a session.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("failed to start idle poller: {0}")]
    Poller(#[source] std::io::Error),
}

/// Records completions into the ledger and forwards them to the reporter.
struct LedgerRecorder {
    ledger: Arc<BuildLedger>,
    build_root: PathBuf,
    reporter: Arc<dyn ProgressReporter>,
    tracker: Arc<Mutex<ProgressTracker>>,
    results: Arc<Mutex<Vec<FileResult>>>,
}

impl CompletionHandler for LedgerRecorder {
    fn on_started(&mut self, command: &BuildCommand) {
        self.tracker.lock().file_started(&command.relative_path);
        self.reporter.report(ProgressEvent::FileStarted { path: command.relative_path.clone() });
    }

    fn on_completion(&mut self, completion: &Completion) {
        let path = &completion.command.relative_path;
        let status = match &completion.outcome {
            Ok(()) => {
                self.ledger.on_compiled(path, &self.build_root);
                FileStatus::Success
            }
            Err(e) => FileStatus::Failed(e.to_string()),
        };
        self.tracker.lock().file_completed(path, &status);
        self.reporter.report(ProgressEvent::FileCompleted {
            path: path.clone(),
            status,
            duration_ms: completion.duration.as_millis() as u64,
        });
        self.results.lock().push(FileResult::from(completion));
    }
}

/// Drives build passes over one source root.
pub struct BuildSession {
    ledger: Arc<BuildLedger>,
    pool: BuildThreadPool,
    src_root: PathBuf,
    build_root: PathBuf,
    reporter: Arc<dyn ProgressReporter>,
    tracker: Arc<Mutex<ProgressTracker>>,
    results: Arc<Mutex<Vec<FileResult>>>,
    force: bool,
}

impl std::fmt::Debug for BuildSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildSession")
            .field("src_root", &self.src_root)
            .field("build_root", &self.build_root)
            .field("pool", &self.pool)
            .field("force", &self.force)
            .finish()
    }
}

impl BuildSession {
    /// Create a session. Installs its own completion handler on `pool`.
    pub fn new(
        ledger: Arc<BuildLedger>,
        pool: BuildThreadPool,
        src_root: impl Into<PathBuf>,
        build_root: impl Into<PathBuf>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        let build_root = build_root.into();
        let tracker = Arc::new(Mutex::new(ProgressTracker::new()));
        let results = Arc::new(Mutex::new(Vec::new()));
        pool.set_completion_handler(LedgerRecorder {
            ledger: Arc::clone(&ledger),
            build_root: build_root.clone(),
            reporter: Arc::clone(&reporter),
            tracker: Arc::clone(&tracker),
            results: Arc::clone(&results),
        });

        Self {
            ledger,
            pool,
            src_root: src_root.into(),
            build_root,
            reporter,
            tracker,
            results,
            force: false,
        }
    }

    /// Rebuild every file on the next pass, regardless of the ledger.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn ledger(&self) -> &Arc<BuildLedger> {
        &self.ledger
    }

    pub fn src_root(&self) -> &Path {
        &self.src_root
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    /// Run one build pass and persist the ledger.
    ///
    /// Per-file failures are part of the returned result; only a failure to
    /// save the ledger is an error.
    pub fn build(&mut self) -> Result<BuildResult, SessionError> {
        let start = Instant::now();
        self.results.lock().clear();

        if std::mem::take(&mut self.force) {
            log::info!("forcing a full rebuild");
            self.ledger.mark_all_stale();
        }

        // Stage the queue so BuildStarted precedes any FileStarted
        let staged = Mutex::new(Vec::<BuildCommand>::new());
        let queue = self.ledger.fill_queue(&staged, &self.src_root, &self.build_root);
        let up_to_date = self
            .ledger
            .entries()
            .iter()
            .filter(|e| e.is_content && e.was_built)
            .count();
        self.tracker.lock().start(queue.to_compile, up_to_date);
        self.reporter
            .report(ProgressEvent::BuildStarted { total_files: queue.to_compile, up_to_date });
        for command in staged.into_inner() {
            self.pool.submit(command);
        }

        self.pool.wait_idle();

        if let Err(e) = self.ledger.save(&self.build_root) {
            self.reporter.report(ProgressEvent::Error { path: None, message: e.to_string() });
            return Err(e.into());
        }

        let mut result = BuildResult::new().with_up_to_date(up_to_date);
        for file in self.results.lock().drain(..) {
            result.add_result(file);
        }
        let result = result.with_duration(start.elapsed());

        let completed = self.tracker.lock().build_completed_event();
        self.reporter.report(completed);
        log::info!("{}", result.summary().lines().next().unwrap_or_default());
        Ok(result)
    }

    /// Build, then rebuild whenever the idle poller sees changes.
    ///
    /// Files that failed stay stale but only trigger another pass once they
    /// change again.
    ///
    /// Runs until `stop` receives a message or is disconnected. Returns the
    /// number of build passes.
    pub fn watch(
        &mut self,
        poll_interval: Duration,
        stop: &Receiver<()>,
    ) -> Result<usize, SessionError> {
        let mut passes = 0;
        loop {
            let left_stale = self.build()?.failed_count();
            passes += 1;

            let (signal_tx, signal_rx) = crossbeam_channel::bounded(1);
            let mut poller = IdlePoller::spawn(
                Arc::clone(&self.ledger),
                self.src_root.clone(),
                self.build_root.clone(),
                poll_interval,
                left_stale,
                signal_tx,
            )
            .map_err(SessionError::Poller)?;

            let rebuild = select! {
                recv(signal_rx) -> report => report.is_ok(),
                recv(stop) -> _ => false,
            };
            poller.stop();

            if !rebuild {
                break;
            }
        }

        self.ledger.save(&self.build_root)?;
        Ok(passes)
    }

    /// Stop the pool. In-flight compiles finish; queued ones are dropped.
    pub fn shutdown(mut self) -> Result<(), SessionError> {
        self.pool.stop();
        self.ledger.save(&self.build_root)?;
        Ok(())
    }
}
