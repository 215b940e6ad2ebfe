//! Configuration module for the snuff build pipeline
//!
//! Provides types and parsing for `snuff.toml` project configuration.

pub mod loader;
pub mod schema;

pub use loader::*;
pub use schema::*;
