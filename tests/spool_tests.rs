// Durable spool tests
//
// Concurrent appends, rotation under load and cross-instance locking.

use catalyst_sdk::tracer::spool::{self, Spool};
use catalyst_sdk::TraceTarget;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const THREADS: usize = 8;
const PER_THREAD: usize = 25;

fn demo() -> TraceTarget {
    TraceTarget::project("demo")
}

fn line(thread: usize, n: usize) -> Vec<u8> {
    let padding = "x".repeat(512);
    format!(
        r#"{{"trace_id":"t{}-{}","thread":{},"n":{},"padding":"{}"}}"#,
        thread, n, thread, n, padding
    )
    .into_bytes()
}

fn read_ids(dir: &std::path::Path) -> Vec<String> {
    let mut files = spool::pending_files(dir, None).unwrap();
    files.extend(spool::backed_up_files(dir, None).unwrap());
    files
        .iter()
        .flat_map(|f| {
            std::fs::read_to_string(&f.path)
                .unwrap()
                .lines()
                .map(|l| {
                    let value: serde_json::Value = serde_json::from_str(l).unwrap();
                    value["trace_id"].as_str().unwrap().to_string()
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

#[test]
fn test_concurrent_appends_are_not_interleaved() {
    let dir = TempDir::new().unwrap();
    let spool = Arc::new(Spool::open_in(dir.path(), &demo()).unwrap());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let spool = Arc::clone(&spool);
            thread::spawn(move || {
                for n in 0..PER_THREAD {
                    spool.append(&line(t, n)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let files = spool::pending_files(dir.path(), Some("demo")).unwrap();
    assert_eq!(files.len(), 1);

    let ids = read_ids(dir.path());
    assert_eq!(ids.len(), THREADS * PER_THREAD);
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), THREADS * PER_THREAD);
}

#[test]
fn test_appends_survive_concurrent_sealing() {
    let dir = TempDir::new().unwrap();
    let spool = Arc::new(Spool::open_in(dir.path(), &demo()).unwrap());

    let sealer = {
        let spool = Arc::clone(&spool);
        thread::spawn(move || {
            let mut sealed = 0;
            for _ in 0..50 {
                if spool.seal_current().is_some() {
                    sealed += 1;
                }
                thread::yield_now();
            }
            sealed
        })
    };

    let writers: Vec<_> = (0..THREADS)
        .map(|t| {
            let spool = Arc::clone(&spool);
            thread::spawn(move || {
                let mut first_batches = 0;
                for n in 0..PER_THREAD {
                    if spool.append(&line(t, n)).unwrap().first_batch {
                        first_batches += 1;
                    }
                }
                first_batches
            })
        })
        .collect();

    let first_batches: usize = writers.into_iter().map(|h| h.join().unwrap()).sum();
    sealer.join().unwrap();

    let files = spool::pending_files(dir.path(), Some("demo")).unwrap();
    // one file per first batch, so each file is announced exactly once
    assert_eq!(files.len(), first_batches);
    assert_eq!(read_ids(dir.path()).len(), THREADS * PER_THREAD);
}

#[test]
fn test_live_file_of_other_instance_is_not_orphaned() {
    let dir = TempDir::new().unwrap();
    let running = Spool::open_in(dir.path(), &demo()).unwrap();
    let live = running.append(b"{}").unwrap().path;

    let restarted = Spool::open_in(dir.path(), &demo()).unwrap();
    assert!(spool::is_locked_elsewhere(&live));
    assert!(restarted.orphaned_files().unwrap().is_empty());

    drop(running);
    assert!(!spool::is_locked_elsewhere(&live));
    assert_eq!(restarted.orphaned_files().unwrap(), vec![live]);
}

#[test]
fn test_orphans_are_scoped_to_project() {
    let dir = TempDir::new().unwrap();
    {
        let other = Spool::open_in(dir.path(), &TraceTarget::project("demo_v2")).unwrap();
        other.append(b"{}").unwrap();
    }

    let spool = Spool::open_in(dir.path(), &demo()).unwrap();
    assert!(spool.orphaned_files().unwrap().is_empty());
    assert_eq!(spool::pending_files(dir.path(), Some("demo_v2")).unwrap().len(), 1);
}

#[test]
fn test_uploaded_file_is_only_in_backup() {
    let dir = TempDir::new().unwrap();
    let spool = Spool::open_in(dir.path(), &demo()).unwrap();
    let path = spool.append(b"{}").unwrap().path;
    assert!(spool.seal(&path));

    let moved = spool.backup(&path).unwrap();

    assert!(!path.exists());
    assert!(moved.exists());
    assert!(spool::pending_files(dir.path(), Some("demo")).unwrap().is_empty());
    let uploaded = spool::backed_up_files(dir.path(), Some("demo")).unwrap();
    assert_eq!(uploaded.len(), 1);
    assert_eq!(uploaded[0].path, moved);

    // a new batch after backup lands in a fresh file
    let next = spool.append(b"{}").unwrap();
    assert!(next.first_batch);
    assert_ne!(next.path.file_name(), moved.file_name());
}
