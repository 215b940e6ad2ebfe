//! Worker threads that execute compile commands.
//!
//! A [`WorkerThread`] owns one OS thread and one [`CompilerRegistry`]. It
//! accepts a single [`BuildCommand`] at a time through a rendezvous channel:
//! [`WorkerThread::run`] blocks until the thread is idle and has taken the
//! command. Every command produces exactly one [`Completion`].

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::compiler::{CompileError, CompilerRegistry, FileType};

/// One file to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    /// Absolute-or-rooted path of the source file
    pub src_path: PathBuf,
    /// Ledger key of the source file
    pub relative_path: String,
    /// Destination of the compiled container
    pub build_path: PathBuf,
    pub file_type: FileType,
}

impl BuildCommand {
    /// Command for `relative_path`, mirrored from `src_root` into `build_root`.
    pub fn new(src_root: &Path, build_root: &Path, relative_path: &str, file_type: FileType) -> Self {
        Self {
            src_path: src_root.join(relative_path),
            relative_path: relative_path.to_string(),
            build_path: build_root.join(relative_path),
            file_type,
        }
    }
}

/// Why a command failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum WorkerError {
    #[error("could not open '{}': {message}", path.display())]
    Open { path: PathBuf, message: String },
    #[error("could not compile '{}': {message}", path.display())]
    Compile { path: PathBuf, message: String },
    #[error("could not save '{}': {message}", path.display())]
    Save { path: PathBuf, message: String },
}

/// Report sent for every command a worker takes.
#[derive(Debug, Clone)]
pub struct Completion {
    pub command: BuildCommand,
    pub outcome: Result<(), WorkerError>,
    pub duration: Duration,
    /// Id of the worker that ran the command
    pub worker: usize,
}

impl Completion {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A compile thread.
#[derive(Debug)]
pub struct WorkerThread {
    id: usize,
    commands: Option<Sender<BuildCommand>>,
    last_error: Arc<Mutex<Option<WorkerError>>>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    /// Start a worker that compiles with `registry` and reports to `completions`.
    pub fn spawn(
        id: usize,
        registry: CompilerRegistry,
        completions: Sender<Completion>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(0);
        let last_error = Arc::new(Mutex::new(None));

        let thread_error = Arc::clone(&last_error);
        let handle = std::thread::Builder::new()
            .name(format!("snuff-worker-{}", id))
            .spawn(move || worker_loop(id, registry, rx, completions, thread_error))?;

        Ok(Self { id, commands: Some(tx), last_error, handle: Some(handle) })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Hand `command` to the worker, blocking until it is idle.
    ///
    /// Returns the command back if the worker thread is gone.
    pub fn run(&self, command: BuildCommand) -> Result<(), BuildCommand> {
        match &self.commands {
            Some(tx) => tx.send(command).map_err(|e| e.into_inner()),
            None => Err(command),
        }
    }

    /// Error recorded by the last finished command, if it failed.
    pub fn last_error(&self) -> Option<WorkerError> {
        self.last_error.lock().clone()
    }

    /// Let the current command finish, then join the thread.
    pub fn stop(&mut self) {
        self.commands.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("worker {} panicked", self.id);
            }
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    id: usize,
    mut registry: CompilerRegistry,
    commands: Receiver<BuildCommand>,
    completions: Sender<Completion>,
    last_error: Arc<Mutex<Option<WorkerError>>>,
) {
    for command in commands {
        *last_error.lock() = None;
        let start = Instant::now();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| execute(&mut registry, &command)))
            .unwrap_or_else(|_| {
                Err(WorkerError::Compile {
                    path: command.src_path.clone(),
                    message: "compiler panicked".to_string(),
                })
            });

        match &outcome {
            Ok(()) => log::debug!("worker {}: compiled {}", id, command.relative_path),
            Err(e) => log::error!("{}", e),
        }
        *last_error.lock() = outcome.as_ref().err().cloned();

        let completion = Completion { command, outcome, duration: start.elapsed(), worker: id };
        if completions.send(completion).is_err() {
            break;
        }
    }
}

/// Read, compile and write one file.
pub fn execute(registry: &mut CompilerRegistry, command: &BuildCommand) -> Result<(), WorkerError> {
    let input = fs::read(&command.src_path).map_err(|e| WorkerError::Open {
        path: command.src_path.clone(),
        message: e.to_string(),
    })?;

    let compile_error = |e: CompileError| WorkerError::Compile {
        path: command.src_path.clone(),
        message: e.to_string(),
    };
    let compiler = registry
        .get_mut(command.file_type)
        .ok_or_else(|| compile_error(CompileError::NoCompiler(command.file_type)))?;
    let container = compiler.compile(&input, &command.src_path).map_err(compile_error)?;

    write_artifact(&command.build_path, container).map_err(|e| WorkerError::Save {
        path: command.build_path.clone(),
        message: e.to_string(),
    })
}

fn write_artifact(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, data)
}
