//! Durable on-disk queue of trace batches
//!
//! Layout:
//!
//! ```text
//! <root>/<namespace>/trace_<project>_<uuid>.json                  project target
//! <root>/<namespace>/trace_<project>@<dataset>_<uuid>.json        dataset target
//! <root>/<namespace>/backup/<same name>                           uploaded and confirmed
//! ```
//!
//! Each file holds one JSON line per export batch. The owning spool holds an
//! exclusive `fs2` lock on its current file for as long as the file is
//! current; a file is created under a staging name and only renamed into
//! place once locked. Once the upload worker picks a file up it is sealed:
//! the spool rotates to a new name and never writes the old one again.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::client::TraceTarget;
use crate::config::SpoolConfig;
use crate::error::{CatalystError, Result};

const FILE_PREFIX: &str = "trace_";
const FILE_SUFFIX: &str = ".json";
const DATASET_SEPARATOR: char = '@';
const STAGING_SUFFIX: &str = ".part";
const BACKUP_DIR: &str = "backup";

/// Outcome of one append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    pub path: PathBuf,
    /// True when this append created the file; the caller enqueues it then
    pub first_batch: bool,
}

/// Metadata of a spool file, for listings
#[derive(Debug, Clone)]
pub struct SpoolFile {
    pub path: PathBuf,
    pub project: String,
    /// Set when the file was written for a dataset target
    pub dataset: Option<String>,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

struct ActiveFile {
    path: PathBuf,
    file: File,
}

/// Append-only spool owned by one exporter
///
/// Files are tagged with the exporter's target, so a re-scan only ever picks
/// up files written for the same project and dataset.
pub struct Spool {
    dir: PathBuf,
    backup_dir: PathBuf,
    project: String,
    dataset: Option<String>,
    current: Mutex<Option<ActiveFile>>,
}

impl Spool {
    /// Open (creating if needed) the spool directory for `target`
    pub fn open(config: &SpoolConfig, target: &TraceTarget) -> Result<Self> {
        Self::open_in(config.directory(), target)
    }

    pub fn open_in(dir: impl Into<PathBuf>, target: &TraceTarget) -> Result<Self> {
        let dir = dir.into();
        let backup_dir = dir.join(BACKUP_DIR);
        fs::create_dir_all(&backup_dir)?;

        Ok(Self {
            dir,
            backup_dir,
            project: file_safe_project(target.project_name()),
            dataset: target.dataset_name().map(file_safe_project),
            current: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Project name as it appears in file names
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Dataset name as it appears in file names
    pub fn dataset(&self) -> Option<&str> {
        self.dataset.as_deref()
    }

    /// Append one newline-terminated JSON line to the current file
    ///
    /// Opens a new file when there is no current one. Concurrent appends are
    /// serialized by the spool mutex; other processes are kept out by the
    /// exclusive lock held on the current file.
    pub fn append(&self, line: &[u8]) -> Result<Appended> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| CatalystError::Io(std::io::Error::other("spool lock poisoned")))?;

        let first_batch = current.is_none();
        if first_batch {
            *current = Some(self.create_file()?);
        }

        let active = current
            .as_mut()
            .ok_or_else(|| CatalystError::Io(std::io::Error::other("spool file missing")))?;

        write_line(&mut active.file, line)?;

        Ok(Appended {
            path: active.path.clone(),
            first_batch,
        })
    }

    /// Stop writing to `path` if it is the current file
    ///
    /// Returns true when the file was current. Either way no further batch
    /// will land in `path` after this returns.
    pub fn seal(&self, path: &Path) -> bool {
        let Ok(mut current) = self.current.lock() else {
            return false;
        };
        match current.as_ref() {
            Some(active) if active.path == path => {
                if let Some(active) = current.take() {
                    release(active);
                }
                true
            }
            _ => false,
        }
    }

    /// Seal whatever file is current, returning its path
    pub fn seal_current(&self) -> Option<PathBuf> {
        let mut current = self.current.lock().ok()?;
        current.take().map(|active| {
            let path = active.path.clone();
            release(active);
            path
        })
    }

    /// Path of the file currently receiving batches, if any
    pub fn current_path(&self) -> Option<PathBuf> {
        self.current
            .lock()
            .ok()
            .and_then(|c| c.as_ref().map(|a| a.path.clone()))
    }

    /// Move an uploaded file into `backup/`
    pub fn backup(&self, path: &Path) -> Result<PathBuf> {
        let name = path.file_name().ok_or_else(|| {
            CatalystError::InvalidArgument(format!("not a spool file: {}", path.display()))
        })?;
        let target = self.backup_dir.join(name);
        fs::rename(path, &target)?;
        debug!(file = %target.display(), "Moved spool file to backup");
        Ok(target)
    }

    /// Active files of this spool's target not held by a live writer
    ///
    /// Used by the startup re-scan and `spool retry`. Files written for a
    /// different target of the same project are left alone, as are files
    /// locked by another exporter (or by this one).
    pub fn orphaned_files(&self) -> Result<Vec<PathBuf>> {
        let files = pending_files(&self.dir, Some(&self.project))?;
        Ok(files
            .into_iter()
            .filter(|f| f.dataset == self.dataset)
            .map(|f| f.path)
            .filter(|path| !is_locked_elsewhere(path))
            .collect())
    }

    fn create_file(&self) -> Result<ActiveFile> {
        let name = compose_name(&self.project, self.dataset.as_deref());
        let path = self.dir.join(&name);
        let staging = self.dir.join(format!(".{}{}", name, STAGING_SUFFIX));

        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&staging)?;
        file.lock_exclusive()?;
        if let Err(e) = fs::rename(&staging, &path) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }

        debug!(file = %path.display(), "Opened spool file");
        Ok(ActiveFile { path, file })
    }
}

impl Drop for Spool {
    fn drop(&mut self) {
        if let Ok(current) = self.current.get_mut() {
            if let Some(active) = current.take() {
                release(active);
            }
        }
    }
}

fn write_line(file: &mut File, line: &[u8]) -> Result<()> {
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line);
    if !line.ends_with(b"\n") {
        buf.push(b'\n');
    }
    file.write_all(&buf)?;
    file.flush()?;
    file.sync_data()?;
    Ok(())
}

fn release(active: ActiveFile) {
    if let Err(e) = active.file.unlock() {
        warn!(file = %active.path.display(), error = %e, "Failed to unlock spool file");
    }
}

/// `trace_<project>_<uuid>.json`, or `trace_<project>@<dataset>_<uuid>.json`
fn compose_name(project: &str, dataset: Option<&str>) -> String {
    match dataset {
        Some(dataset) => format!(
            "{}{}{}{}_{}{}",
            FILE_PREFIX,
            project,
            DATASET_SEPARATOR,
            dataset,
            Uuid::new_v4().simple(),
            FILE_SUFFIX
        ),
        None => format!(
            "{}{}_{}{}",
            FILE_PREFIX,
            project,
            Uuid::new_v4().simple(),
            FILE_SUFFIX
        ),
    }
}

/// Name with path separators, the dataset separator and control chars replaced
pub fn file_safe_project(project: &str) -> String {
    project
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | DATASET_SEPARATOR => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect()
}

/// Project and dataset encoded in a spool file name, if the name is one
///
/// ```
/// use catalyst_sdk::tracer::spool::target_of;
///
/// assert_eq!(
///     target_of("trace_my_app@golden_0123456789abcdef0123456789abcdef.json"),
///     Some(("my_app".to_string(), Some("golden".to_string())))
/// );
/// assert_eq!(target_of("notes.txt"), None);
/// ```
pub fn target_of(file_name: &str) -> Option<(String, Option<String>)> {
    let inner = file_name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?;
    let (stem, id) = inner.rsplit_once('_')?;
    if id.len() != 32 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let (project, dataset) = match stem.split_once(DATASET_SEPARATOR) {
        Some((project, dataset)) if !dataset.is_empty() => (project, Some(dataset.to_string())),
        Some(_) => return None,
        None => (stem, None),
    };
    if project.is_empty() {
        return None;
    }
    Some((project.to_string(), dataset))
}

/// Spool files in `dir` (not recursing into `backup/`), oldest first
///
/// `project` matches every target of that project; compare
/// [`SpoolFile::dataset`] to narrow it down.
pub fn pending_files(dir: &Path, project: Option<&str>) -> Result<Vec<SpoolFile>> {
    let wanted = project.map(file_safe_project);
    let mut files = Vec::new();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some((file_project, dataset)) = name.to_str().and_then(target_of) else {
            continue;
        };
        if wanted.as_deref().is_some_and(|w| w != file_project) {
            continue;
        }
        files.push(SpoolFile {
            path: entry.path(),
            project: file_project,
            dataset,
            size: metadata.len(),
            modified: metadata.modified().ok(),
        });
    }

    files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

/// Files already uploaded, from `<dir>/backup`
pub fn backed_up_files(dir: &Path, project: Option<&str>) -> Result<Vec<SpoolFile>> {
    pending_files(&dir.join(BACKUP_DIR), project)
}

/// True when some other handle holds a lock on `path`
pub fn is_locked_elsewhere(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.unlock();
            false
        }
        Err(_) => true,
    }
}
