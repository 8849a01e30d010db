//! Spool inspection and manual re-drive
//!
//! Files that failed to upload stay in the active spool directory. `list`
//! shows them next to the backed-up ones; `retry` pushes them through a fresh
//! upload worker.

use anyhow::{Context, Result};
use catalyst_sdk::client::{PlatformClient, TraceBackend, TraceTarget};
use catalyst_sdk::config;
use catalyst_sdk::tracer::spool::{self, Spool, SpoolFile};
use catalyst_sdk::tracer::{UploadWorker, WorkerSettings};
use chrono::{DateTime, Local};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Execute the spool list command
pub fn list(config_path: &str, project: Option<&str>) -> Result<()> {
    let cfg = config::load_config_from(config_path).context("failed to load configuration")?;
    let dir = cfg.spool.directory();

    let active = spool::pending_files(&dir, project)?;
    let uploaded = spool::backed_up_files(&dir, project)?;

    println!("Spool directory: {}", dir.display());
    println!();

    if active.is_empty() && uploaded.is_empty() {
        println!("{}", "No spool files found".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("STATE").fg(Color::Cyan),
        Cell::new("PROJECT").fg(Color::Cyan),
        Cell::new("DATASET").fg(Color::Cyan),
        Cell::new("FILE").fg(Color::Cyan),
        Cell::new("SIZE").fg(Color::Cyan),
        Cell::new("MODIFIED").fg(Color::Cyan),
    ]);

    for file in &active {
        let state = if spool::is_locked_elsewhere(&file.path) {
            Cell::new("writing").fg(Color::Blue)
        } else {
            Cell::new("pending").fg(Color::Yellow)
        };
        table.add_row(file_row(state, file));
    }
    for file in &uploaded {
        table.add_row(file_row(Cell::new("uploaded").fg(Color::Green), file));
    }

    println!("{}", table);
    println!(
        "{} pending, {} uploaded",
        active.len().to_string().yellow(),
        uploaded.len().to_string().green()
    );
    Ok(())
}

fn file_row(state: Cell, file: &SpoolFile) -> Vec<Cell> {
    let name = file
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let modified = file
        .modified
        .map(|m| {
            DateTime::<Local>::from(m)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string());

    vec![
        state,
        Cell::new(&file.project),
        Cell::new(file.dataset.as_deref().unwrap_or("-")),
        Cell::new(name),
        Cell::new(format_size(file.size)),
        Cell::new(modified),
    ]
}

/// Execute the spool retry command
pub async fn retry(config_path: &str, project: &str, dataset: Option<&str>) -> Result<()> {
    let cfg = config::load_config_from(config_path).context("failed to load configuration")?;

    let client = PlatformClient::new(&cfg)?;
    client.connect().await.context("failed to obtain platform token")?;

    let target = match dataset {
        Some(dataset) => TraceTarget::dataset(project, dataset),
        None => TraceTarget::project(project),
    };

    let spool = Arc::new(Spool::open(&cfg.spool, &target)?);
    let files = spool.orphaned_files()?;
    if files.is_empty() {
        println!("{}", format!("No pending spool files for {}", describe(&target)).yellow());
        return Ok(());
    }

    println!("Uploading {} spool file(s) for {}...", files.len(), describe(&target));
    info!(project = project, files = files.len(), "Re-driving spool files");

    let settings = WorkerSettings::from(&cfg.upload);
    let flushes = files.len().div_ceil(settings.max_presigned_urls) as u32;
    let limit = settings.upload_timeout * flushes + Duration::from_secs(5);

    let backend: Arc<dyn TraceBackend> = Arc::new(client.fork()?);
    let worker = UploadWorker::spawn(backend, spool, target, settings)?;
    for file in files {
        worker.enqueue(file);
    }

    let drained = worker.wait_idle(limit).await;
    let status = worker.status();
    worker.shutdown();

    if status.failed == 0 && drained {
        println!("{}", format!("✓ {}", status).green());
    } else {
        println!("{}", format!("✗ {}", status).red());
        if status.pending > 0 {
            println!("  {} file(s) still pending", status.pending);
        }
    }
    Ok(())
}

fn describe(target: &TraceTarget) -> String {
    match target.dataset_name() {
        Some(dataset) => format!("dataset '{}' of project '{}'", dataset, target.project_name()),
        None => format!("project '{}'", target.project_name()),
    }
}

/// Human-readable byte count
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
