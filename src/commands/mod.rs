//! Command implementations for the CLI
//!
//! - spool: list spool files, re-drive uploads left by earlier runs
//! - config: display and validate configuration

pub mod config;
pub mod spool;
