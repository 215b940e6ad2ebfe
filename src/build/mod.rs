//! Incremental build pipeline for snuff.
//!
//! Turns a source tree of scripts and shaders into a mirrored tree of
//! compiled containers, recompiling only what changed since the last run.
//!
//! # Overview
//!
//! The build pipeline consists of:
//! - **Scanning**: List every file under the source root ([`scanner`])
//! - **Ledger**: Diff the scan against the persisted [`BuildLedger`] and queue
//!   stale files ([`ledger`], [`ledger_format`])
//! - **Execution**: Compile queued files on a [`BuildThreadPool`] of
//!   [`WorkerThread`]s ([`pool`], [`worker`])
//! - **Orchestration**: Tie it together and watch for changes
//!   ([`session`], [`poller`])
//!
//! # Example
//!
//! ```ignore
//! use snuff::build::{BuildLedger, BuildSession, BuildThreadPool, ConsoleProgress};
//! use std::sync::Arc;
//!
//! let ledger = Arc::new(BuildLedger::load(&build_root));
//! let pool = BuildThreadPool::new(0)?;
//! let mut session =
//!     BuildSession::new(ledger, pool, "assets", "build", Arc::new(ConsoleProgress::new()));
//!
//! let result = session.build()?;
//! println!("{}", result.summary());
//! ```

pub mod ledger;
pub mod ledger_format;
pub mod poller;
pub mod pool;
pub mod progress;
pub mod result;
pub mod scanner;
pub mod session;
pub mod worker;

pub use ledger::*;
pub use poller::*;
pub use pool::*;
pub use progress::*;
pub use result::*;
pub use scanner::*;
pub use session::*;
pub use worker::*;
