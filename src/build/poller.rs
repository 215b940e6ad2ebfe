//! Background re-scan while the pipeline is idle.

use crossbeam_channel::{RecvTimeoutError, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::ledger::{BuildLedger, SyncReport};

/// Periodically syncs the ledger and signals once a rebuild is warranted.
///
/// A rebuild is warranted when a sync sees a new or changed file, or when
/// more files are stale than the `left_stale` count the last pass left behind.
/// Files that failed and have not changed since do not trigger a pass.
///
/// The poller sends at most one [`SyncReport`] on its signal channel and then
/// exits; start a new one after the rebuild.
#[derive(Debug)]
pub struct IdlePoller {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl IdlePoller {
    /// Start polling `src_root` every `interval`.
    pub fn spawn(
        ledger: Arc<BuildLedger>,
        src_root: PathBuf,
        build_root: PathBuf,
        interval: Duration,
        left_stale: usize,
        signal: Sender<SyncReport>,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = std::thread::Builder::new().name("snuff-idle-poll".to_string()).spawn(
            move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }

                let report = ledger.sync(&src_root, &build_root);
                if rebuild_warranted(&report, left_stale) {
                    log::info!(
                        "{} new, {} modified, {} stale; rebuild needed",
                        report.added,
                        report.modified,
                        report.not_built
                    );
                    let _ = signal.send(report);
                    break;
                }
            },
        )?;

        Ok(Self { stop: Some(stop_tx), handle: Some(handle) })
    }

    /// Whether the poll thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wake the poll thread and join it.
    pub fn stop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("idle poll thread panicked");
            }
        }
    }
}

fn rebuild_warranted(report: &SyncReport, left_stale: usize) -> bool {
    report.added + report.modified > 0 || report.not_built > left_stale
}

impl Drop for IdlePoller {
    fn drop(&mut self) {
        self.stop();
    }
}
