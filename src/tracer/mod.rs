//! Tracer facade
//!
//! Owns the platform client, the span exporter with its upload worker, and
//! the activation flag shared with every [`TraceLayer`] it hands out.
//!
//! ```ignore
//! let tracer = Tracer::new(load_config()?, TracerOptions::new("demo", TracerType::OpenAi)).await?;
//! tracing_subscriber::registry().with(tracer.layer()).init();
//!
//! tracer.start().await?;
//! run_pipeline().await;
//! tracer.stop().await;
//! println!("{}", tracer.get_upload_status());
//! ```

pub mod exporter;
pub mod instrumentor;
pub mod layer;
pub mod span;
pub mod spool;
pub mod worker;

use futures::FutureExt;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::{PlatformClient, TraceBackend, TraceTarget};
use crate::config::CatalystConfig;
use crate::error::{CatalystError, Result};
use crate::keys::unique_key;

pub use exporter::{ExportBatch, ExportResult, ExporterOptions, SpanExporter};
pub use instrumentor::{Instrumentor, TargetInstrumentor, TracerType};
pub use layer::TraceLayer;
pub use span::{SpanContext, SpanKind, SpanRecord, SpanStatus};
pub use spool::Spool;
pub use worker::{UploadStatus, UploadWorker, WorkerSettings};

use layer::LayerState;

/// What the caller wants traced and how to label it
#[derive(Debug, Clone)]
pub struct TracerOptions {
    pub project_name: String,
    /// Send traces to this dataset instead of the project's master dataset
    pub dataset_name: Option<String>,
    pub tracer_type: TracerType,
    /// Free-form labels; `log_source` and `recorded_on` are filled in when absent
    pub metadata: Map<String, Value>,
    /// Pipeline description (model, embedder, vector store, ...)
    pub pipeline: Option<Value>,
    pub description: Option<String>,
    pub session_id: Option<String>,
}

impl TracerOptions {
    pub fn new(project_name: impl Into<String>, tracer_type: TracerType) -> Self {
        Self {
            project_name: project_name.into(),
            dataset_name: None,
            tracer_type,
            metadata: Map::new(),
            pipeline: None,
            description: None,
            session_id: None,
        }
    }

    pub fn with_dataset(mut self, dataset_name: impl Into<String>) -> Self {
        self.dataset_name = Some(dataset_name.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_pipeline(mut self, pipeline: Value) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn target(&self) -> TraceTarget {
        match &self.dataset_name {
            Some(dataset) => TraceTarget::dataset(&self.project_name, dataset),
            None => TraceTarget::project(&self.project_name),
        }
    }
}

/// Result of [`Tracer::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
    Stopped,
    NotStarted,
}

impl fmt::Display for StopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("Tracer stopped successfully"),
            Self::NotStarted => f.write_str("No traces to stop"),
        }
    }
}

pub struct Tracer {
    client: PlatformClient,
    options: TracerOptions,
    target: TraceTarget,
    exporter: Arc<SpanExporter>,
    state: Arc<LayerState>,
    upload_timeout: Duration,
}

impl Tracer {
    /// Build the client, spool, exporter and upload worker
    ///
    /// Fails fast on missing credentials or a rejected token request.
    pub async fn new(config: CatalystConfig, options: TracerOptions) -> Result<Self> {
        if options.project_name.trim().is_empty() {
            return Err(CatalystError::InvalidArgument("project name is required".to_string()));
        }
        if options.dataset_name.as_deref().is_some_and(|d| d.trim().is_empty()) {
            return Err(CatalystError::InvalidArgument("dataset name is empty".to_string()));
        }
        if let Some(pipeline) = &options.pipeline {
            if !matches!(pipeline, Value::Object(_) | Value::String(_)) {
                return Err(CatalystError::InvalidArgument(
                    "pipeline must be an object or a string".to_string(),
                ));
            }
        }

        let client = PlatformClient::new(&config)?;
        client.connect().await?;

        let mut options = options;
        enrich_metadata(&mut options.metadata, options.tracer_type);
        let target = options.target();

        let spool = Arc::new(Spool::open(&config.spool, &target)?);
        let backend: Arc<dyn TraceBackend> = Arc::new(client.fork()?);
        let exporter = Arc::new(SpanExporter::new(
            ExporterOptions {
                target: target.clone(),
                session_id: options.session_id.clone(),
                metadata: options.metadata.clone(),
                pipeline: options.pipeline.clone().unwrap_or(Value::Null),
            },
            spool,
            backend,
            WorkerSettings::from(&config.upload),
        )?);

        let state = Arc::new(LayerState::new(
            Arc::clone(&exporter),
            options.tracer_type.instrumentor(),
        ));

        debug!(
            project = %target.project_name(),
            tracer_type = %options.tracer_type,
            session_id = %exporter.session_id(),
            "Tracer created"
        );

        Ok(Self {
            client,
            options,
            target,
            exporter,
            state,
            upload_timeout: config.upload.timeout(),
        })
    }

    /// Validate the target remotely, register its schema and activate capture
    ///
    /// A second call while active is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.state.is_active() {
            debug!("Tracer already started");
            return Ok(());
        }

        self.client.validate_target(&self.target).await?;
        self.client.ensure_schema(&self.target).await?;

        if self.state.activate() {
            info!(project = %self.target.project_name(), "Tracer started");
        }
        Ok(())
    }

    /// Deactivate capture, flush in-flight traces and wait for uploads
    ///
    /// Waits at most the upload timeout; uploads still running afterwards
    /// keep going in the background.
    pub async fn stop(&self) -> StopStatus {
        if !self.state.deactivate() {
            warn!("Tracer was not started. No traces to stop.");
            return StopStatus::NotStarted;
        }

        info!("Stopping tracer");
        let flushed = self.state.flush_in_flight();
        if flushed > 0 {
            debug!(traces = flushed, "Flushed unfinished traces");
        }
        self.exporter.seal();

        if !self.exporter.wait_idle(self.upload_timeout).await {
            warn!(
                pending = self.exporter.queue_depth(),
                "Upload queue not drained before timeout"
            );
        }

        info!(summary = %self.get_upload_status(), "Tracer stopped");
        StopStatus::Stopped
    }

    /// Run `fut` between `start()` and `stop()`
    ///
    /// `stop()` also runs when `fut` panics; the panic is resumed afterwards.
    pub async fn scope<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        self.start().await?;
        let outcome = AssertUnwindSafe(fut).catch_unwind().await;
        self.stop().await;
        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Non-blocking upload counters
    pub fn get_upload_status(&self) -> UploadStatus {
        self.exporter.upload_status()
    }

    /// Layer to compose into the application's subscriber
    pub fn layer(&self) -> TraceLayer {
        TraceLayer::new(Arc::clone(&self.state))
    }

    /// Export spans directly, bypassing the layer
    pub fn export(&self, spans: Vec<SpanRecord>) -> ExportResult {
        self.exporter.export(spans)
    }

    pub fn is_instrumented(&self) -> bool {
        self.state.is_active()
    }

    /// Unique key of the enriched metadata
    pub fn metadata_key(&self) -> Result<String> {
        unique_key(&Value::Object(self.options.metadata.clone()))
    }

    /// Unique key of the pipeline, if one was given
    pub fn pipeline_key(&self) -> Result<Option<String>> {
        self.options.pipeline.as_ref().map(unique_key).transpose()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.options.metadata
    }

    pub fn pipeline(&self) -> Option<&Value> {
        self.options.pipeline.as_ref()
    }

    pub fn description(&self) -> Option<&str> {
        self.options.description.as_deref()
    }

    pub fn tracer_type(&self) -> TracerType {
        self.options.tracer_type
    }

    pub fn target(&self) -> &TraceTarget {
        &self.target
    }

    pub fn client(&self) -> &PlatformClient {
        &self.client
    }

    pub fn exporter(&self) -> &Arc<SpanExporter> {
        &self.exporter
    }

    /// Stop capture, seal the spool and join the upload thread
    pub fn shutdown(&self) {
        self.state.deactivate();
        self.exporter.shutdown();
    }
}

/// Fill in `log_source` and `recorded_on` when the caller did not
fn enrich_metadata(metadata: &mut Map<String, Value>, tracer_type: TracerType) {
    metadata
        .entry("log_source")
        .or_insert_with(|| Value::String(tracer_type.log_source()));
    metadata.entry("recorded_on").or_insert_with(|| {
        Value::String(
            chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S%.6f")
                .to_string(),
        )
    });
}
