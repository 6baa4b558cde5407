//! Transaction Tests
//!
//! These tests verify:
//! - Commit and rollback visibility
//! - Snapshot isolation for readers opened before a commit
//! - Single-writer exclusion across threads
//! - Rollback on drop and terminated-handle errors
//! - Read-only archives refusing edits
//! - Page reclamation once readers release old versions

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use tsarchive::{Archive, ArchiveError, EncodingKind, Key, Value, DEFAULT_STREAM};

// =============================================================================
// Helper Functions
// =============================================================================

fn entries(archive: &Archive) -> Vec<(Key, Value)> {
    let read = archive.begin_read();
    read.scan(DEFAULT_STREAM, Key::MIN, Key::MAX)
        .collect::<tsarchive::Result<Vec<_>>>()
        .unwrap()
}

fn add_one(archive: &Archive, timestamp: u64) {
    let mut edit = archive.edit().unwrap();
    edit.add(DEFAULT_STREAM, Key::new(timestamp, 1), Value::new(timestamp, 0))
        .unwrap();
    edit.commit().unwrap();
}

// =============================================================================
// Commit / Rollback Tests
// =============================================================================

#[test]
fn test_commit_then_scan_two_entries() {
    let archive = Archive::create_in_memory(4096).unwrap();

    let mut edit = archive.begin_edit(None).unwrap().unwrap();
    edit.add(DEFAULT_STREAM, Key::new(100, 1), Value::from_f64(1.0, 0))
        .unwrap();
    edit.add(DEFAULT_STREAM, Key::new(200, 1), Value::from_f64(2.0, 0))
        .unwrap();
    assert_eq!(edit.commit().unwrap(), 1);

    let read = archive.begin_read();
    let mut scan = read.scan(DEFAULT_STREAM, Key::new(0, 0), Key::MAX);
    let (k1, v1) = scan.next().unwrap().unwrap();
    let (k2, v2) = scan.next().unwrap().unwrap();
    assert!(scan.next().is_none());

    assert_eq!(k1, Key::new(100, 1));
    assert_eq!(v1.as_f64(), 1.0);
    assert_eq!(v1.flags, 0);
    assert_eq!(k2, Key::new(200, 1));
    assert_eq!(v2.as_f64(), 2.0);
}

#[test]
fn test_rollback_discards_insert() {
    let archive = Archive::create_in_memory(4096).unwrap();

    let mut edit = archive.begin_edit(None).unwrap().unwrap();
    edit.add(DEFAULT_STREAM, Key::new(100, 1), Value::from_f64(1.0, 0))
        .unwrap();
    edit.rollback();

    assert!(entries(&archive).is_empty());
    assert_eq!(archive.version(), 0);
}

#[test]
fn test_drop_without_commit_rolls_back() {
    let archive = Archive::create_in_memory(4096).unwrap();
    {
        let mut edit = archive.edit().unwrap();
        edit.add(DEFAULT_STREAM, Key::new(1, 1), Value::new(1, 0)).unwrap();
    }

    assert!(entries(&archive).is_empty());
    assert!(!archive.stats().edit_active);
    // The slot is free again
    assert!(archive.begin_edit(Some(Duration::ZERO)).unwrap().is_some());
}

#[test]
fn test_edit_sees_own_changes() {
    let archive = Archive::create_in_memory(4096).unwrap();
    add_one(&archive, 10);

    let mut edit = archive.edit().unwrap();
    edit.add(DEFAULT_STREAM, Key::new(20, 1), Value::new(20, 0)).unwrap();
    assert!(edit.remove(DEFAULT_STREAM, &Key::new(10, 1)).unwrap());

    assert_eq!(edit.get(DEFAULT_STREAM, &Key::new(20, 1)).unwrap(), Some(Value::new(20, 0)));
    assert_eq!(edit.get(DEFAULT_STREAM, &Key::new(10, 1)).unwrap(), None);
    let keys: Vec<Key> = edit
        .scan(DEFAULT_STREAM, Key::MIN, Key::MAX)
        .unwrap()
        .map(|e| e.unwrap().0)
        .collect();
    assert_eq!(keys, vec![Key::new(20, 1)]);

    // Nothing is visible outside until commit
    assert_eq!(entries(&archive).len(), 1);
    assert_eq!(entries(&archive)[0].0, Key::new(10, 1));
}

#[test]
fn test_terminated_edit_reports_conflict() {
    let archive = Archive::create_in_memory(4096).unwrap();
    let mut edit = archive.edit().unwrap();
    edit.add(DEFAULT_STREAM, Key::new(1, 1), Value::new(1, 0)).unwrap();
    edit.commit().unwrap();

    let err = edit.add(DEFAULT_STREAM, Key::new(2, 1), Value::new(2, 0)).unwrap_err();
    assert!(matches!(err, ArchiveError::CommitConflict(_)));
    assert!(matches!(edit.commit().unwrap_err(), ArchiveError::CommitConflict(_)));

    // Rollback after commit does nothing
    edit.rollback();
    edit.rollback();
    assert_eq!(entries(&archive).len(), 1);

    let mut rolled = archive.edit().unwrap();
    rolled.rollback();
    assert!(matches!(rolled.commit().unwrap_err(), ArchiveError::CommitConflict(_)));
}

#[test]
fn test_versions_are_sequential() {
    let archive = Archive::create_in_memory(4096).unwrap();
    assert_eq!(archive.version(), 0);
    for i in 1..=5u64 {
        let mut edit = archive.edit().unwrap();
        assert_eq!(edit.base_version(), i - 1);
        edit.add(DEFAULT_STREAM, Key::new(i, 0), Value::new(i, 0)).unwrap();
        assert_eq!(edit.commit().unwrap(), i);
    }
    assert_eq!(archive.version(), 5);
}

// =============================================================================
// Isolation Tests
// =============================================================================

#[test]
fn test_reader_snapshot_is_stable_across_commits() {
    let archive = Archive::create_in_memory(512).unwrap();
    let mut edit = archive.edit().unwrap();
    edit.create_stream(DEFAULT_STREAM, EncodingKind::Raw, EncodingKind::Raw)
        .unwrap();
    for i in 0..100 {
        edit.add(DEFAULT_STREAM, Key::new(i, 0), Value::new(i, 0)).unwrap();
    }
    edit.commit().unwrap();

    let pinned = archive.begin_read();
    let before: Vec<_> = pinned
        .scan(DEFAULT_STREAM, Key::MIN, Key::MAX)
        .map(|e| e.unwrap())
        .collect();

    // Rewrite every leaf the pinned reader can see
    let mut edit = archive.edit().unwrap();
    for i in 0..100 {
        assert!(edit.remove(DEFAULT_STREAM, &Key::new(i, 0)).unwrap());
        edit.add(DEFAULT_STREAM, Key::new(i, 0), Value::new(i + 1000, 1)).unwrap();
    }
    edit.commit().unwrap();

    // Churn more versions so released pages would be reused if unpinned
    for round in 0..3 {
        let mut edit = archive.edit().unwrap();
        for i in 0..100 {
            edit.remove(DEFAULT_STREAM, &Key::new(i, 0)).unwrap();
            edit.add(DEFAULT_STREAM, Key::new(i, 0), Value::new(round, 2)).unwrap();
        }
        edit.commit().unwrap();
    }

    let after: Vec<_> = pinned
        .scan(DEFAULT_STREAM, Key::MIN, Key::MAX)
        .map(|e| e.unwrap())
        .collect();
    assert_eq!(before, after);
    assert_eq!(pinned.get(DEFAULT_STREAM, &Key::new(50, 0)).unwrap(), Some(Value::new(50, 0)));
    assert_eq!(pinned.version(), 1);

    let fresh = archive.begin_read();
    assert_eq!(fresh.get(DEFAULT_STREAM, &Key::new(50, 0)).unwrap(), Some(Value::new(2, 2)));
}

#[test]
fn test_read_does_not_block_on_active_edit() {
    let archive = Archive::create_in_memory(4096).unwrap();
    add_one(&archive, 1);

    let mut edit = archive.edit().unwrap();
    edit.add(DEFAULT_STREAM, Key::new(2, 1), Value::new(2, 0)).unwrap();

    let reader = archive.clone();
    let seen = thread::spawn(move || entries(&reader).len()).join().unwrap();
    assert_eq!(seen, 1);

    edit.commit().unwrap();
    assert_eq!(entries(&archive).len(), 2);
}

// =============================================================================
// Single Writer Tests
// =============================================================================

#[test]
fn test_second_edit_times_out() {
    let archive = Archive::create_in_memory(4096).unwrap();
    let _held = archive.edit().unwrap();

    let start = Instant::now();
    let second = archive.begin_edit(Some(Duration::from_millis(100))).unwrap();
    assert!(second.is_none());
    assert!(start.elapsed() >= Duration::from_millis(100));

    let err = archive.require_edit(Some(Duration::from_millis(10))).unwrap_err();
    assert!(matches!(err, ArchiveError::Timeout));
    assert!(err.is_retryable());
}

#[test]
fn test_waiting_edit_proceeds_after_commit() {
    let archive = Archive::create_in_memory(4096).unwrap();
    let mut first = archive.edit().unwrap();
    first.add(DEFAULT_STREAM, Key::new(1, 1), Value::new(1, 0)).unwrap();

    let waiter = archive.clone();
    let handle = thread::spawn(move || {
        let mut second = waiter.begin_edit(Some(Duration::from_secs(10))).unwrap().unwrap();
        // Granted only after the first edit published
        let base = second.base_version();
        second.add(DEFAULT_STREAM, Key::new(2, 1), Value::new(2, 0)).unwrap();
        second.commit().unwrap();
        base
    });

    thread::sleep(Duration::from_millis(50));
    first.commit().unwrap();

    assert_eq!(handle.join().unwrap(), 1);
    assert_eq!(entries(&archive).len(), 2);
}

#[test]
fn test_concurrent_writers_are_serialized() {
    let archive = Archive::create_in_memory(4096).unwrap();
    let threads = 8u64;
    let per_thread = 25u64;
    let barrier = Arc::new(Barrier::new(threads as usize));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let archive = archive.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let mut edit = archive.begin_edit(None).unwrap().unwrap();
                    assert!(archive.stats().edit_active);
                    edit.add(DEFAULT_STREAM, Key::new(i, t), Value::new(t, i)).unwrap();
                    edit.commit().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(archive.version(), threads * per_thread);
    assert_eq!(entries(&archive).len(), (threads * per_thread) as usize);
}

// =============================================================================
// Read-Only Tests
// =============================================================================

#[test]
fn test_read_only_archive_refuses_edits() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("ro.tsa");
    {
        let archive = Archive::create_new(&path).unwrap();
        add_one(&archive, 7);
    }

    let archive = Archive::open_existing(&path, true).unwrap();
    assert!(archive.is_read_only());

    let start = Instant::now();
    let err = archive.begin_edit(None).unwrap_err();
    assert!(matches!(err, ArchiveError::ReadOnlyViolation));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!err.is_retryable());

    assert_eq!(entries(&archive).len(), 1);
}

// =============================================================================
// Reclamation Tests
// =============================================================================

#[test]
fn test_pinned_pages_wait_for_reader() {
    let archive = Archive::create_in_memory(512).unwrap();
    for i in 0..20 {
        add_one(&archive, i * 2);
    }

    let reader = archive.begin_read();
    add_one(&archive, 1);

    let pinned = archive.stats();
    assert_eq!(pinned.live_readers, 1);
    assert!(pinned.pending_pages > 0);

    reader.close();
    let released = archive.stats();
    assert_eq!(released.live_readers, 0);
    assert_eq!(released.pending_pages, 0);
    assert!(released.free_pages >= pinned.free_pages + pinned.pending_pages);
}

#[test]
fn test_unpinned_pages_are_reused() {
    let archive = Archive::create_in_memory(512).unwrap();
    for i in 0..30 {
        add_one(&archive, i);
    }
    let settled = archive.stats().total_pages;

    // Replacing one entry per commit must not grow the store forever
    for round in 0..50 {
        let mut edit = archive.edit().unwrap();
        edit.remove(DEFAULT_STREAM, &Key::new(round % 30, 1)).unwrap();
        edit.add(DEFAULT_STREAM, Key::new(round % 30, 1), Value::new(round, 0))
            .unwrap();
        edit.commit().unwrap();
    }

    let stats = archive.stats();
    assert!(
        stats.total_pages <= settled + 4,
        "store grew from {} to {} pages",
        settled,
        stats.total_pages
    );
    assert_eq!(stats.pending_pages, 0);
    assert_eq!(entries(&archive).len(), 30);
}

#[test]
fn test_rolled_back_pages_return_to_pool() {
    let archive = Archive::create_in_memory(512).unwrap();
    add_one(&archive, 1);
    let before = archive.stats().total_pages;

    for _ in 0..10 {
        let mut edit = archive.edit().unwrap();
        for i in 0..40 {
            edit.add(DEFAULT_STREAM, Key::new(100 + i, 1), Value::new(i, 0)).unwrap();
        }
        edit.rollback();
    }

    let grown = archive.stats().total_pages - before;
    // One edit's worth of pages, handed back and reused by the next
    assert!(grown < 10, "store grew by {} pages", grown);
    assert_eq!(entries(&archive).len(), 1);
}

#[test]
fn test_open_ended_scan_reaches_last_timestamp() {
    let archive = Archive::create_in_memory(4096).unwrap();
    let mut edit = archive.edit().unwrap();
    edit.add(DEFAULT_STREAM, Key::new(5, 0), Value::new(1, 0)).unwrap();
    edit.add(DEFAULT_STREAM, Key::new(u64::MAX, 7), Value::new(2, 0)).unwrap();
    edit.commit().unwrap();

    let read = archive.begin_read();
    let bounded: Vec<_> = read
        .scan(DEFAULT_STREAM, Key::MIN, Key::end_before(u64::MAX - 1))
        .collect::<tsarchive::Result<_>>()
        .unwrap();
    assert_eq!(bounded.len(), 1);

    let open_ended: Vec<_> = read
        .scan(DEFAULT_STREAM, Key::MIN, Key::end_before(u64::MAX))
        .collect::<tsarchive::Result<_>>()
        .unwrap();
    assert_eq!(open_ended.len(), 2);
    assert_eq!(open_ended[1].0, Key::new(u64::MAX, 7));
}
