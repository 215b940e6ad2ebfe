//! snuff - Incremental asset-build pipeline
//!
//! This library provides functionality to:
//! - Track source files in a persisted build ledger and find stale ones
//! - Compile scripts (RC4) and HLSL shaders (SPIR-V) into tagged containers
//! - Run compiles on a fixed pool of worker threads and rebuild on change

pub mod build;
pub mod cli;
pub mod compiler;
pub mod config;
