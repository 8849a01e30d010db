//! Background upload worker
//!
//! Drains the spool queue on a dedicated OS thread running its own
//! current-thread tokio runtime, so uploads never compete with the
//! application's executor. One flush is:
//!
//! 1. presign up to `max_presigned_urls` files,
//! 2. PUT each file's bytes to its URL,
//! 3. confirm ingestion (with the content hash as idempotency key),
//! 4. move the file to `backup/`.
//!
//! The whole flush is bounded by the upload timeout.

use futures::FutureExt;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::{TraceBackend, TraceTarget};
use crate::config::UploadConfig;
use crate::error::{CatalystError, Result};
use crate::keys::sha256_hex;
use crate::logging::redact_url;
use crate::retry::{is_transient, with_deadline};
use crate::tracer::spool::Spool;

const THREAD_NAME: &str = "catalyst-upload";

/// Point-in-time upload counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStatus {
    pub successful: u64,
    pub failed: u64,
    /// Jobs queued or in flight
    pub pending: usize,
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Trace upload summary: {} successful, {} failed",
            self.successful, self.failed
        )
    }
}

#[derive(Debug, Default)]
struct UploadStats {
    successful: AtomicU64,
    failed: AtomicU64,
    pending: AtomicUsize,
}

impl UploadStats {
    fn snapshot(&self) -> UploadStatus {
        UploadStatus {
            successful: self.successful.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            pending: self.pending.load(Ordering::Acquire),
        }
    }

    fn succeeded(&self) {
        self.successful.fetch_add(1, Ordering::AcqRel);
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    fn failed(&self) {
        self.failed.fetch_add(1, Ordering::AcqRel);
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    fn dropped(&self, count: usize) {
        self.pending.fetch_sub(count, Ordering::AcqRel);
    }
}

#[derive(Debug)]
enum WorkerCommand {
    Upload(PathBuf),
    Shutdown,
}

/// Worker tuning, derived from [`UploadConfig`]
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub upload_timeout: Duration,
    pub max_presigned_urls: usize,
    pub poll_interval: Duration,
    pub rescan_on_startup: bool,
}

impl From<&UploadConfig> for WorkerSettings {
    fn from(config: &UploadConfig) -> Self {
        Self {
            upload_timeout: config.timeout(),
            max_presigned_urls: config.max_presigned_urls.max(1),
            poll_interval: config.poll_interval(),
            rescan_on_startup: config.rescan_on_startup,
        }
    }
}

/// Handle to the upload thread
///
/// Dropping the handle asks the thread to stop without waiting for it; call
/// [`UploadWorker::shutdown`] to join.
pub struct UploadWorker {
    sender: mpsc::UnboundedSender<WorkerCommand>,
    stats: Arc<UploadStats>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl UploadWorker {
    /// Start the upload thread
    pub fn spawn(
        backend: Arc<dyn TraceBackend>,
        spool: Arc<Spool>,
        target: TraceTarget,
        settings: WorkerSettings,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(UploadStats::default());

        let ctx = WorkerContext {
            backend,
            spool,
            target,
            settings,
            stats: Arc::clone(&stats),
        };

        let handle = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(error = %e, "Failed to build upload worker runtime");
                        return;
                    }
                };

                let result = runtime.block_on(
                    std::panic::AssertUnwindSafe(worker_loop(ctx, rx)).catch_unwind(),
                );
                if let Err(e) = result {
                    error!(panic = ?e, "Upload worker panicked");
                }
            })?;

        Ok(Self {
            sender: tx,
            stats,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a spool file for upload
    pub fn enqueue(&self, path: PathBuf) {
        self.stats.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = self.sender.send(WorkerCommand::Upload(path)) {
            self.stats.dropped(1);
            warn!(error = %e, "Upload worker is gone, spool file left for a later run");
        }
    }

    pub fn status(&self) -> UploadStatus {
        self.stats.snapshot()
    }

    /// Jobs queued or in flight
    pub fn queue_depth(&self) -> usize {
        self.stats.pending.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .ok()
            .and_then(|h| h.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Wait until the queue is empty or `limit` elapses
    ///
    /// Returns true when the queue drained.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let drained = tokio::time::timeout(limit, async {
            while self.queue_depth() > 0 && self.is_running() {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await;
        drained.is_ok() && self.queue_depth() == 0
    }

    /// Stop the thread after its current flush and join it
    ///
    /// Jobs still queued stay on disk for a later run.
    pub fn shutdown(&self) {
        let _ = self.sender.send(WorkerCommand::Shutdown);
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Upload worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for UploadWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(WorkerCommand::Shutdown);
    }
}

struct WorkerContext {
    backend: Arc<dyn TraceBackend>,
    spool: Arc<Spool>,
    target: TraceTarget,
    settings: WorkerSettings,
    stats: Arc<UploadStats>,
}

/// Per-flush bookkeeping that survives the flush future being cancelled
#[derive(Default)]
struct FlushState {
    resolved: HashSet<PathBuf>,
    deferred: Vec<PathBuf>,
}

async fn worker_loop(ctx: WorkerContext, mut rx: mpsc::UnboundedReceiver<WorkerCommand>) {
    let mut pending: VecDeque<PathBuf> = VecDeque::new();
    let mut shutdown = false;

    if ctx.settings.rescan_on_startup {
        match ctx.spool.orphaned_files() {
            Ok(files) => {
                if !files.is_empty() {
                    info!(
                        project = ctx.spool.project(),
                        dataset = ctx.spool.dataset().unwrap_or("-"),
                        files = files.len(),
                        "Re-queued spool files from an earlier run"
                    );
                }
                ctx.stats.pending.fetch_add(files.len(), Ordering::AcqRel);
                pending.extend(files);
            }
            Err(e) => warn!(error = %e, "Failed to scan spool directory"),
        }
    }

    loop {
        if pending.is_empty() && !shutdown {
            // suspend on the channel, bounded by the poll interval
            match tokio::time::timeout(ctx.settings.poll_interval, rx.recv()).await {
                Ok(Some(cmd)) => apply(cmd, &mut pending, &mut shutdown),
                Ok(None) => shutdown = true,
                Err(_) => {}
            }
        }
        while let Ok(cmd) = rx.try_recv() {
            apply(cmd, &mut pending, &mut shutdown);
        }

        if shutdown {
            break;
        }
        if pending.is_empty() {
            continue;
        }

        let progressed = ctx.flush(&mut pending).await;
        if !progressed {
            match tokio::time::timeout(ctx.settings.poll_interval, rx.recv()).await {
                Ok(Some(cmd)) => apply(cmd, &mut pending, &mut shutdown),
                Ok(None) => shutdown = true,
                Err(_) => {}
            }
        }
    }

    if !pending.is_empty() {
        info!(files = pending.len(), "Upload worker stopping, files left in spool");
        ctx.stats.dropped(pending.len());
    }
    debug!("Upload worker shutting down");
}

fn apply(cmd: WorkerCommand, pending: &mut VecDeque<PathBuf>, shutdown: &mut bool) {
    match cmd {
        WorkerCommand::Upload(path) => pending.push_back(path),
        WorkerCommand::Shutdown => *shutdown = true,
    }
}

impl WorkerContext {
    /// Run one presign/upload/confirm cycle over the head of the queue
    ///
    /// Returns false when the cycle made no progress (no URL issued), so the
    /// caller waits before trying again.
    async fn flush(&self, pending: &mut VecDeque<PathBuf>) -> bool {
        let take = pending.len().min(self.settings.max_presigned_urls);
        let mut jobs: Vec<PathBuf> = Vec::with_capacity(take);

        for path in pending.drain(..take) {
            if path.exists() {
                self.spool.seal(&path);
                jobs.push(path);
            } else {
                debug!(file = %path.display(), "Spool file already gone, dropping job");
                self.stats.dropped(1);
            }
        }
        if jobs.is_empty() {
            return true;
        }

        if !self.backend.has_token() {
            for path in &jobs {
                error!(file = %file_label(path), "No authentication token available, upload failed");
                self.stats.failed();
            }
            return true;
        }

        let mut state = FlushState::default();
        let outcome = with_deadline(
            self.settings.upload_timeout,
            self.transfer(&jobs, &mut state),
        )
        .await;

        let progressed = match outcome {
            Ok(issued) => issued > 0,
            Err(CatalystError::Timeout(secs)) => {
                warn!(timeout_secs = secs, "Upload flush timed out");
                true
            }
            Err(e) => {
                warn!(
                    files = jobs.len(),
                    status = ?e.status(),
                    transient = is_transient(&e),
                    error = %e,
                    "Presign request failed"
                );
                true
            }
        };

        for path in &jobs {
            if state.resolved.contains(path) || state.deferred.contains(path) {
                continue;
            }
            self.stats.failed();
            warn!(file = %file_label(path), "Upload failed, file left in spool");
        }

        for path in state.deferred.into_iter().rev() {
            pending.push_front(path);
        }

        progressed
    }

    async fn transfer(&self, jobs: &[PathBuf], state: &mut FlushState) -> Result<usize> {
        let batch = self.backend.presigned_urls(&self.target, jobs.len()).await?;
        let issued = batch.presigned_urls.len().min(jobs.len());

        if issued < jobs.len() {
            warn!(
                requested = jobs.len(),
                issued = issued,
                "Fewer presigned URLs than files, remainder stays queued"
            );
            state.deferred.extend(jobs[issued..].iter().cloned());
        }

        for (path, url) in jobs.iter().zip(batch.presigned_urls.iter()) {
            match self.upload_one(path, url).await {
                Ok(()) => {
                    self.stats.succeeded();
                    info!(file = %file_label(path), "Trace file uploaded");
                }
                Err(e) => {
                    self.stats.failed();
                    warn!(
                        file = %file_label(path),
                        url = %redact_url(url),
                        status = ?e.status(),
                        transient = is_transient(&e),
                        error = %e,
                        "Trace file upload failed"
                    );
                }
            }
            state.resolved.insert(path.clone());
        }

        Ok(issued)
    }

    async fn upload_one(&self, path: &Path, url: &str) -> Result<()> {
        let body = tokio::fs::read(path).await?;
        if body.is_empty() {
            return Err(CatalystError::InvalidArgument(format!(
                "spool file {} is empty",
                path.display()
            )));
        }
        let idempotency_key = sha256_hex(&body);

        self.backend.upload_file(url, body).await?;
        self.backend
            .insert_trace(&self.target, url, &idempotency_key)
            .await?;

        self.spool.backup(path)?;
        Ok(())
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
