//! Span exporter
//!
//! Turns a finished trace into one JSON line in the spool and hands new spool
//! files to the upload worker. `export` never performs network I/O and never
//! returns an error; failures are logged and reported as
//! [`ExportResult::Failure`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

use crate::client::{TraceBackend, TraceTarget};
use crate::error::{CatalystError, Result};
use crate::tracer::span::SpanRecord;
use crate::tracer::spool::{Appended, Spool};
use crate::tracer::worker::{UploadStatus, UploadWorker, WorkerSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportResult {
    Success,
    Failure,
}

/// One trace as written to the spool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBatch {
    pub project_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_name: Option<String>,
    pub trace_id: String,
    pub session_id: String,
    pub traces: Vec<Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub pipeline: Value,
}

/// Exporter settings fixed for its lifetime
#[derive(Debug, Clone)]
pub struct ExporterOptions {
    pub target: TraceTarget,
    /// Defaults to a random UUID
    pub session_id: Option<String>,
    pub metadata: Map<String, Value>,
    pub pipeline: Value,
}

impl ExporterOptions {
    pub fn new(target: TraceTarget) -> Self {
        Self {
            target,
            session_id: None,
            metadata: Map::new(),
            pipeline: Value::Null,
        }
    }
}

/// Writes trace batches to the spool and owns the upload worker
pub struct SpanExporter {
    options: ExporterOptions,
    session_id: String,
    spool: Arc<Spool>,
    worker: UploadWorker,
}

impl SpanExporter {
    /// Open the spool and start the upload worker
    pub fn new(
        options: ExporterOptions,
        spool: Arc<Spool>,
        backend: Arc<dyn TraceBackend>,
        settings: WorkerSettings,
    ) -> Result<Self> {
        let session_id = options
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let worker =
            UploadWorker::spawn(backend, Arc::clone(&spool), options.target.clone(), settings)?;

        Ok(Self {
            options,
            session_id,
            spool,
            worker,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn spool(&self) -> &Arc<Spool> {
        &self.spool
    }

    /// Append the spans of one trace to the spool
    pub fn export(&self, spans: Vec<SpanRecord>) -> ExportResult {
        match self.try_export(spans) {
            Ok(appended) => {
                debug!(file = %appended.path.display(), "Exported trace batch");
                ExportResult::Success
            }
            Err(e) => {
                error!(error = %e, kind = e.kind(), "Failed to export trace batch");
                ExportResult::Failure
            }
        }
    }

    fn try_export(&self, spans: Vec<SpanRecord>) -> Result<Appended> {
        let batch = self.build_batch(&spans)?;
        let line = serde_json::to_vec(&batch)?;

        let appended = self.spool.append(&line)?;
        if appended.first_batch {
            self.worker.enqueue(appended.path.clone());
        }
        Ok(appended)
    }

    /// Assemble the envelope for `spans`
    pub fn build_batch(&self, spans: &[SpanRecord]) -> Result<ExportBatch> {
        let first = spans.first().ok_or_else(|| {
            CatalystError::InvalidArgument("cannot export an empty span sequence".to_string())
        })?;

        let traces = spans
            .iter()
            .map(SpanRecord::to_document)
            .collect::<serde_json::Result<Vec<_>>>()?;

        Ok(ExportBatch {
            project_name: self.options.target.project_name().to_string(),
            dataset_name: self.options.target.dataset_name().map(str::to_string),
            trace_id: first.trace_id().to_string(),
            session_id: self.session_id.clone(),
            traces,
            metadata: self.options.metadata.clone(),
            pipeline: self.options.pipeline.clone(),
        })
    }

    /// Hand the current spool file to the worker and stop writing to it
    pub fn seal(&self) -> Option<PathBuf> {
        self.spool.seal_current()
    }

    pub fn upload_status(&self) -> UploadStatus {
        self.worker.status()
    }

    pub fn queue_depth(&self) -> usize {
        self.worker.queue_depth()
    }

    pub async fn wait_idle(&self, limit: Duration) -> bool {
        self.worker.wait_idle(limit).await
    }

    /// Seal the spool and join the worker thread
    pub fn shutdown(&self) {
        self.seal();
        self.worker.shutdown();
    }
}
