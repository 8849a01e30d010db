//! Client SDK for the Catalyst LLM observability platform
//!
//! The core is the trace pipeline: a [`tracer::TraceLayer`] (or direct
//! [`tracer::Tracer::export`] calls) collects spans, the exporter appends one
//! JSON line per trace to a local spool, and a background worker uploads
//! spool files through presigned URLs and confirms ingestion.

pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub mod logging;
pub mod retry;
pub mod tracer;

pub use client::{PlatformClient, TraceBackend, TraceTarget};
pub use config::{load_config, CatalystConfig};
pub use error::{CatalystError, Result};
pub use keys::unique_key;
pub use tracer::{StopStatus, Tracer, TracerOptions, TracerType, UploadStatus};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging for the CLI
///
/// Library code never installs a subscriber; applications embedding the SDK
/// compose [`tracer::Tracer::layer`] into their own.
///
/// Note: This function can only be called once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
