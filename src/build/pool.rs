//! Fixed-size pool of compile workers.
//!
//! # How It Works
//!
//! 1. [`BuildThreadPool::submit`] appends a command to the pending queue and
//!    wakes the dispatch thread
//! 2. The dispatch thread pops idle worker ids off a stack and hands each one
//!    the next pending command
//! 3. Workers report back on a completion channel; the dispatch thread passes
//!    the [`Completion`] to the installed [`CompletionHandler`], updates the
//!    counters and returns the worker to the idle stack
//!
//! The dispatch thread only ever blocks on its two channels, so nothing is
//! polled.
//!
//! # Example
//!
//! ```ignore
//! use snuff::build::{BuildCommand, BuildThreadPool};
//!
//! let pool = BuildThreadPool::new(4)?;
//! pool.set_completion_handler(|c: &Completion| println!("{}: {:?}", c.command.relative_path, c.outcome));
//! pool.submit(command);
//! pool.wait_idle();
//! ```

use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::ledger::CommandSink;
use super::worker::{BuildCommand, Completion, WorkerError, WorkerThread};
use crate::compiler::CompilerRegistry;

/// Default number of workers (uses available parallelism).
pub fn default_jobs() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Builds the compiler registry each worker owns.
pub type RegistryFactory = Arc<dyn Fn() -> CompilerRegistry + Send + Sync>;

/// Receives pool events on the dispatch thread.
pub trait CompletionHandler: Send {
    /// A command has been handed to a worker.
    fn on_started(&mut self, _command: &BuildCommand) {}

    /// A worker finished a command, successfully or not.
    fn on_completion(&mut self, completion: &Completion);
}

impl<F> CompletionHandler for F
where
    F: FnMut(&Completion) + Send,
{
    fn on_completion(&mut self, completion: &Completion) {
        self(completion)
    }
}

/// Error starting the pool.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PoolError {
    #[error("failed to spawn build thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Snapshot of the pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolProgress {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    /// Commands discarded by `stop` before they ran
    pub dropped: usize,
}

impl PoolProgress {
    /// Commands submitted but neither completed nor dropped.
    pub fn outstanding(&self) -> usize {
        self.submitted.saturating_sub(self.completed + self.dropped)
    }
}

enum PoolEvent {
    Submitted,
    Handler(Box<dyn CompletionHandler>),
    Stop,
}

struct Shared {
    pending: Mutex<VecDeque<BuildCommand>>,
    progress: Mutex<PoolProgress>,
    idle: Condvar,
    stopping: AtomicBool,
}

/// Builder for [`BuildThreadPool`].
pub struct PoolBuilder {
    jobs: usize,
    registry: RegistryFactory,
    handler: Option<Box<dyn CompletionHandler>>,
}

impl std::fmt::Debug for PoolBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBuilder").field("jobs", &self.jobs).finish_non_exhaustive()
    }
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self {
            jobs: default_jobs(),
            registry: Arc::new(CompilerRegistry::with_defaults),
            handler: None,
        }
    }

    /// Set the number of workers; 0 means hardware concurrency.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = if jobs == 0 { default_jobs() } else { jobs };
        self
    }

    /// Set how each worker's compilers are created.
    pub fn with_registry<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> CompilerRegistry + Send + Sync + 'static,
    {
        self.registry = Arc::new(factory);
        self
    }

    /// Install the completion handler up front.
    pub fn with_handler<H: CompletionHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Start the workers and the dispatch thread.
    pub fn spawn(self) -> Result<BuildThreadPool, PoolError> {
        let jobs = self.jobs.max(1);
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        let workers = (0..jobs)
            .map(|id| WorkerThread::spawn(id, (self.registry)(), completion_tx.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        drop(completion_tx);

        let shared = Arc::new(Shared {
            pending: Mutex::new(VecDeque::new()),
            progress: Mutex::new(PoolProgress::default()),
            idle: Condvar::new(),
            stopping: AtomicBool::new(false),
        });
        let (event_tx, event_rx) = crossbeam_channel::unbounded();

        let dispatcher = Dispatcher {
            shared: Arc::clone(&shared),
            workers,
            idle: (0..jobs).rev().collect(),
            handler: self.handler,
            events: event_rx,
            completions: completion_rx,
        };
        let handle = std::thread::Builder::new()
            .name("snuff-dispatch".to_string())
            .spawn(move || dispatcher.run())?;

        log::debug!("build pool started with {} workers", jobs);
        Ok(BuildThreadPool { shared, events: event_tx, dispatcher: Some(handle), size: jobs })
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool of [`WorkerThread`]s fed from a pending queue.
pub struct BuildThreadPool {
    shared: Arc<Shared>,
    events: Sender<PoolEvent>,
    dispatcher: Option<JoinHandle<()>>,
    size: usize,
}

impl std::fmt::Debug for BuildThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildThreadPool")
            .field("size", &self.size)
            .field("progress", &self.progress())
            .finish()
    }
}

impl BuildThreadPool {
    /// Start a pool with `jobs` workers (0 means hardware concurrency).
    pub fn new(jobs: usize) -> Result<Self, PoolError> {
        PoolBuilder::new().with_jobs(jobs).spawn()
    }

    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Replace the completion handler.
    ///
    /// Takes effect before any command submitted afterwards completes.
    pub fn set_completion_handler<H: CompletionHandler + 'static>(&self, handler: H) {
        let _ = self.events.send(PoolEvent::Handler(Box::new(handler)));
    }

    /// Queue a command. Ignored once the pool is stopping.
    pub fn submit(&self, command: BuildCommand) {
        if self.shared.stopping.load(Ordering::SeqCst) {
            log::warn!("{}: pool is stopping, not queued", command.relative_path);
            return;
        }
        self.shared.progress.lock().submitted += 1;
        self.shared.pending.lock().push_back(command);
        let _ = self.events.send(PoolEvent::Submitted);
    }

    /// Commands waiting for a worker.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn progress(&self) -> PoolProgress {
        *self.shared.progress.lock()
    }

    /// Whether every submitted command has completed.
    pub fn is_idle(&self) -> bool {
        self.progress().outstanding() == 0
    }

    /// Block until every submitted command has completed (or was dropped).
    pub fn wait_idle(&self) {
        let mut progress = self.shared.progress.lock();
        while progress.outstanding() > 0 {
            self.shared.idle.wait(&mut progress);
        }
    }

    /// Like [`wait_idle`](Self::wait_idle) with a deadline. Returns whether the pool drained.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let mut progress = self.shared.progress.lock();
        while progress.outstanding() > 0 {
            if self.shared.idle.wait_for(&mut progress, timeout).timed_out() {
                return progress.outstanding() == 0;
            }
        }
        true
    }

    /// Stop dispatching, let in-flight compiles finish and join every thread.
    ///
    /// Commands still queued are dropped.
    pub fn stop(&mut self) {
        let Some(handle) = self.dispatcher.take() else {
            return;
        };
        self.shared.stopping.store(true, Ordering::SeqCst);
        let _ = self.events.send(PoolEvent::Stop);
        if handle.join().is_err() {
            log::error!("build dispatch thread panicked");
        }
    }
}

impl CommandSink for BuildThreadPool {
    fn submit(&self, command: BuildCommand) {
        BuildThreadPool::submit(self, command)
    }
}

impl Drop for BuildThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Dispatcher {
    shared: Arc<Shared>,
    workers: Vec<WorkerThread>,
    /// Ids of workers waiting for a command
    idle: Vec<usize>,
    handler: Option<Box<dyn CompletionHandler>>,
    events: Receiver<PoolEvent>,
    completions: Receiver<Completion>,
}

impl Dispatcher {
    fn run(mut self) {
        let events = self.events.clone();
        let completions = self.completions.clone();
        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(PoolEvent::Submitted) => {}
                    Ok(PoolEvent::Handler(handler)) => self.handler = Some(handler),
                    Ok(PoolEvent::Stop) | Err(_) => break,
                },
                recv(completions) -> completion => match completion {
                    Ok(completion) => self.complete(completion),
                    Err(_) => break,
                },
            }
            self.dispatch();
        }
        self.shutdown();
    }

    fn dispatch(&mut self) {
        while let Some(&id) = self.idle.last() {
            let Some(command) = self.shared.pending.lock().pop_front() else {
                return;
            };
            self.idle.pop();

            if let Some(handler) = self.handler.as_mut() {
                handler.on_started(&command);
            }
            if let Err(command) = self.workers[id].run(command) {
                log::error!("worker {} is gone", id);
                let error = WorkerError::Compile {
                    path: command.src_path.clone(),
                    message: "worker thread exited".to_string(),
                };
                self.finish(Completion {
                    command,
                    outcome: Err(error),
                    duration: Duration::ZERO,
                    worker: id,
                });
            }
        }
    }

    fn complete(&mut self, completion: Completion) {
        self.idle.push(completion.worker);
        self.finish(completion);
    }

    fn finish(&mut self, completion: Completion) {
        if let Some(handler) = self.handler.as_mut() {
            handler.on_completion(&completion);
        }
        let mut progress = self.shared.progress.lock();
        progress.completed += 1;
        if !completion.is_success() {
            progress.failed += 1;
        }
        self.shared.idle.notify_all();
    }

    fn shutdown(mut self) {
        let dropped = std::mem::take(&mut *self.shared.pending.lock());
        if !dropped.is_empty() {
            log::info!("build pool stopping, {} queued commands dropped", dropped.len());
        }

        for worker in &mut self.workers {
            worker.stop();
        }
        // Workers are joined, so every in-flight completion is already queued
        while let Ok(completion) = self.completions.try_recv() {
            self.finish(completion);
        }

        let mut progress = self.shared.progress.lock();
        progress.dropped += dropped.len();
        self.shared.idle.notify_all();
    }
}
