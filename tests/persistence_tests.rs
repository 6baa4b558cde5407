//! Persistence Tests
//!
//! These tests verify:
//! - Reopening a file restores the last committed version
//! - Alternating header slots survive a torn header write
//! - Files written with the opposite byte order are refused
//! - A failed durability flush never publishes a version
//! - Pages of a commit that failed after its header write stay untouched
//! - A damaged newest slot or table falls back to the previous version
//! - Configuration and format validation on create/open

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use tsarchive::page::{MemoryPageStore, PageStore};
use tsarchive::{Archive, ArchiveError, Config, EncodingKind, Key, PageId, Result, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn scan_all(archive: &Archive, stream: u32) -> Vec<(Key, Value)> {
    let read = archive.begin_read();
    read.scan(stream, Key::MIN, Key::MAX)
        .collect::<Result<Vec<_>>>()
        .unwrap()
}

fn patch_file(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

/// Memory store whose flushes or header writes can be made to fail
struct FaultyStore {
    inner: MemoryPageStore,
    fail_flush: AtomicBool,
    fail_header_write: AtomicBool,
    /// Fail the flush that follows a successful header write
    fail_flush_after_header: AtomicBool,
    header_unflushed: AtomicBool,
}

impl FaultyStore {
    fn new(page_size: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryPageStore::new(page_size),
            fail_flush: AtomicBool::new(false),
            fail_header_write: AtomicBool::new(false),
            fail_flush_after_header: AtomicBool::new(false),
            header_unflushed: AtomicBool::new(false),
        })
    }
}

impl PageStore for FaultyStore {
    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    fn read_page(&self, page: PageId) -> Result<Vec<u8>> {
        self.inner.read_page(page)
    }

    fn write_page(&self, page: PageId, data: &[u8]) -> Result<()> {
        if page < 2 && self.fail_header_write.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "injected header failure").into());
        }
        if page < 2 {
            self.header_unflushed.store(true, Ordering::SeqCst);
        }
        self.inner.write_page(page, data)
    }

    fn allocate(&self) -> Result<PageId> {
        self.inner.allocate()
    }

    fn page_count(&self) -> u64 {
        self.inner.page_count()
    }

    fn flush(&self) -> Result<()> {
        let after_header = self.header_unflushed.swap(false, Ordering::SeqCst);
        if self.fail_flush.load(Ordering::SeqCst)
            || (after_header && self.fail_flush_after_header.load(Ordering::SeqCst))
        {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "injected flush failure").into());
        }
        self.inner.flush()
    }

    fn is_read_only(&self) -> bool {
        false
    }
}

// =============================================================================
// Reopen Tests
// =============================================================================

#[test]
fn test_reopen_restores_committed_state() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("data.tsa");
    let config = Config::builder().path(&path).page_size(1024).build();

    {
        let archive = Archive::create(config.clone()).unwrap();
        let mut edit = archive.edit().unwrap();
        edit.create_stream(1, EncodingKind::Raw, EncodingKind::Raw).unwrap();
        edit.create_stream(2, EncodingKind::Delta, EncodingKind::TimeSeries).unwrap();
        for i in 0..400u64 {
            edit.add(1, Key::new(i, i % 3), Value::new(i, 0)).unwrap();
            edit.add(2, Key::new(i / 4, i % 4), Value::from_f64(i as f64 / 8.0, 1)).unwrap();
        }
        edit.commit().unwrap();

        // Uncommitted work must not survive
        let mut edit = archive.edit().unwrap();
        edit.add(3, Key::new(1, 1), Value::new(1, 1)).unwrap();
        drop(edit);
    }

    let archive = Archive::open_existing(&path, false).unwrap();
    assert_eq!(archive.version(), 1);
    assert_eq!(archive.page_size(), 1024);
    assert_eq!(archive.config().page_size, 1024);

    let read = archive.begin_read();
    assert_eq!(read.stream_ids(), vec![1, 2]);
    assert_eq!(read.entry_count(1), 400);
    assert_eq!(read.entry_count(2), 400);
    assert_eq!(read.get(1, &Key::new(123, 0)).unwrap(), Some(Value::new(123, 0)));
    assert_eq!(
        read.get(2, &Key::new(50, 1)).unwrap(),
        Some(Value::from_f64(201.0 / 8.0, 1))
    );
    drop(read);

    // And the reopened archive keeps working
    let mut edit = archive.edit().unwrap();
    edit.add(1, Key::new(10_000, 0), Value::new(1, 1)).unwrap();
    assert_eq!(edit.commit().unwrap(), 2);
    assert_eq!(scan_all(&archive, 1).len(), 401);
}

#[test]
fn test_reopen_after_many_commits() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("many.tsa");

    let expected = {
        let archive = Archive::create_new(&path).unwrap();
        let pinned = archive.begin_read();
        for i in 0..25u64 {
            let mut edit = archive.edit().unwrap();
            edit.add(0, Key::new(i, 0), Value::new(i * i, 0)).unwrap();
            if i > 0 {
                edit.remove(0, &Key::new(i - 1, 0)).unwrap();
            }
            edit.commit().unwrap();
        }
        drop(pinned);
        scan_all(&archive, 0)
    };

    let archive = Archive::open_existing(&path, true).unwrap();
    assert_eq!(archive.version(), 25);
    assert_eq!(scan_all(&archive, 0), expected);
    assert_eq!(expected, vec![(Key::new(24, 0), Value::new(576, 0))]);
}

#[test]
fn test_pages_pinned_at_close_are_reused_after_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("orphans.tsa");

    {
        let archive = Archive::create_new(&path).unwrap();
        let mut edit = archive.edit().unwrap();
        edit.add(0, Key::new(1, 1), Value::new(1, 0)).unwrap();
        edit.commit().unwrap();

        let _pinned = archive.begin_read();
        let mut edit = archive.edit().unwrap();
        edit.add(0, Key::new(2, 1), Value::new(2, 0)).unwrap();
        edit.commit().unwrap();
        assert!(archive.stats().pending_pages > 0);
    }

    let archive = Archive::open_existing(&path, false).unwrap();
    let stats = archive.stats();
    assert_eq!(stats.pending_pages, 0);
    assert!(stats.free_pages > 0);
    assert_eq!(scan_all(&archive, 0).len(), 2);
}

// =============================================================================
// Header Tests
// =============================================================================

#[test]
fn test_torn_latest_header_falls_back_to_previous_slot() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("torn.tsa");
    let page_size = 4096u64;

    {
        let archive = Archive::create_new(&path).unwrap();
        for i in 1..=2u64 {
            let mut edit = archive.edit().unwrap();
            edit.add(0, Key::new(i, 0), Value::new(i, 0)).unwrap();
            edit.commit().unwrap();
        }
    }

    // Version 2 lives in slot 0; scribble over its version field
    patch_file(&path, 16, &[0xAA; 4]);

    let archive = Archive::open_existing(&path, true).unwrap();
    assert_eq!(archive.version(), 1);
    assert_eq!(scan_all(&archive, 0), vec![(Key::new(1, 0), Value::new(1, 0))]);

    // Both slots damaged: nothing to open
    patch_file(&path, page_size + 20, &[0xBB; 4]);
    assert!(Archive::open_existing(&path, true).is_err());
}

#[test]
fn test_opposite_byte_order_is_refused() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("swapped.tsa");
    Archive::create_new(&path).unwrap();

    // The marker as a big-endian writer would have stored it
    patch_file(&path, 8, &[0x01, 0x02, 0x03, 0x04]);

    let err = Archive::open_existing(&path, true).unwrap_err();
    match err {
        ArchiveError::IncompatibleFormat(message) => assert!(message.contains("byte order")),
        other => panic!("expected IncompatibleFormat, got {:?}", other),
    }
}

#[test]
fn test_bad_magic_is_refused() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("magic.tsa");
    Archive::create_new(&path).unwrap();
    patch_file(&path, 0, b"NOPE");

    let err = Archive::open_existing(&path, false).unwrap_err();
    assert!(matches!(err, ArchiveError::IncompatibleFormat(_)));
}

#[test]
fn test_short_file_is_refused() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("short.tsa");
    std::fs::write(&path, b"TSAR").unwrap();

    let err = Archive::open_existing(&path, false).unwrap_err();
    assert!(matches!(err, ArchiveError::IncompatibleFormat(_)));
}

#[test]
fn test_create_refuses_existing_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("exists.tsa");
    Archive::create_new(&path).unwrap();

    let err = Archive::create_new(&path).unwrap_err();
    assert!(matches!(err, ArchiveError::Io(_)));
}

#[test]
fn test_open_missing_file_fails() {
    let temp = TempDir::new().unwrap();
    let err = Archive::open_existing(temp.path().join("missing.tsa"), true).unwrap_err();
    assert!(matches!(err, ArchiveError::Io(_)));
}

#[test]
fn test_invalid_page_size_rejected() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .path(temp.path().join("bad.tsa"))
        .page_size(1000)
        .build();
    assert!(matches!(Archive::create(config).unwrap_err(), ArchiveError::Config(_)));
    assert!(matches!(
        Archive::create_in_memory(256).unwrap_err(),
        ArchiveError::Config(_)
    ));
}

// =============================================================================
// Durability Tests
// =============================================================================

#[test]
fn test_failed_flush_keeps_previous_version() {
    let store = FaultyStore::new(4096);
    let archive = Archive::create_with_store(store.clone(), Config::default()).unwrap();

    let mut edit = archive.edit().unwrap();
    edit.add(0, Key::new(1, 1), Value::new(1, 0)).unwrap();
    edit.commit().unwrap();
    let before = scan_all(&archive, 0);

    store.fail_flush.store(true, Ordering::SeqCst);
    let mut edit = archive.edit().unwrap();
    edit.add(0, Key::new(2, 1), Value::new(2, 0)).unwrap();
    let err = edit.commit().unwrap_err();
    assert!(matches!(err, ArchiveError::Io(_)));
    assert!(!edit.is_active());
    drop(edit);

    assert_eq!(archive.version(), 1);
    assert_eq!(scan_all(&archive, 0), before);
    assert!(!archive.stats().edit_active);

    // What is on the store still describes version 1
    let reopened = Archive::open_with_store(store.clone(), Config::default()).unwrap();
    assert_eq!(reopened.version(), 1);
    assert_eq!(scan_all(&reopened, 0), before);

    store.fail_flush.store(false, Ordering::SeqCst);
    let mut edit = archive.edit().unwrap();
    edit.add(0, Key::new(3, 1), Value::new(3, 0)).unwrap();
    assert_eq!(edit.commit().unwrap(), 2);
    assert_eq!(scan_all(&archive, 0).len(), 2);
}

#[test]
fn test_failed_header_write_keeps_previous_version() {
    let store = FaultyStore::new(4096);
    let archive = Archive::create_with_store(store.clone(), Config::default()).unwrap();

    store.fail_header_write.store(true, Ordering::SeqCst);
    let mut edit = archive.edit().unwrap();
    edit.add(0, Key::new(1, 1), Value::new(1, 0)).unwrap();
    assert!(edit.commit().is_err());

    assert_eq!(archive.version(), 0);
    assert!(scan_all(&archive, 0).is_empty());

    store.fail_header_write.store(false, Ordering::SeqCst);
    let reopened = Archive::open_with_store(store.clone(), Config::default()).unwrap();
    assert_eq!(reopened.version(), 0);
}

#[test]
fn test_failed_commit_pages_survive_later_failed_commit() {
    let store = FaultyStore::new(4096);
    {
        let archive = Archive::create_with_store(store.clone(), Config::default()).unwrap();
        let mut edit = archive.edit().unwrap();
        edit.add(0, Key::new(1, 1), Value::new(1, 0)).unwrap();
        edit.commit().unwrap();
    }

    // Reopened, version 1 lists version 0's table page as free
    let archive = Archive::open_with_store(store.clone(), Config::default()).unwrap();
    assert!(archive.stats().free_pages > 0);

    // The header for version 2 lands, the flush after it does not
    store.fail_flush_after_header.store(true, Ordering::SeqCst);
    let mut edit = archive.edit().unwrap();
    edit.add(0, Key::new(2, 1), Value::new(2, 0)).unwrap();
    assert!(matches!(edit.commit().unwrap_err(), ArchiveError::Io(_)));
    drop(edit);
    store.fail_flush_after_header.store(false, Ordering::SeqCst);

    assert_eq!(archive.version(), 1);
    assert!(archive.stats().quarantined_pages > 0);

    // The next edit must not write over anything that header references
    store.fail_header_write.store(true, Ordering::SeqCst);
    let mut edit = archive.edit().unwrap();
    edit.add(0, Key::new(9, 9), Value::new(9, 0)).unwrap();
    assert!(edit.commit().is_err());
    drop(edit);
    store.fail_header_write.store(false, Ordering::SeqCst);

    let reopened = Archive::open_with_store(store.clone(), Config::default()).unwrap();
    assert_eq!(reopened.version(), 2);
    assert_eq!(
        scan_all(&reopened, 0),
        vec![
            (Key::new(1, 1), Value::new(1, 0)),
            (Key::new(2, 1), Value::new(2, 0)),
        ]
    );
}

#[test]
fn test_quarantine_lifts_after_successful_commit() {
    let store = FaultyStore::new(4096);
    let archive = Archive::create_with_store(store.clone(), Config::default()).unwrap();

    store.fail_flush_after_header.store(true, Ordering::SeqCst);
    let mut edit = archive.edit().unwrap();
    edit.add(0, Key::new(1, 1), Value::new(1, 0)).unwrap();
    assert!(edit.commit().is_err());
    drop(edit);
    store.fail_flush_after_header.store(false, Ordering::SeqCst);
    assert!(archive.stats().quarantined_pages > 0);

    let mut edit = archive.edit().unwrap();
    edit.add(0, Key::new(5, 5), Value::new(5, 0)).unwrap();
    assert_eq!(edit.commit().unwrap(), 1);

    let stats = archive.stats();
    assert_eq!(stats.quarantined_pages, 0);
    assert_eq!(scan_all(&archive, 0), vec![(Key::new(5, 5), Value::new(5, 0))]);

    let reopened = Archive::open_with_store(store.clone(), Config::default()).unwrap();
    assert_eq!(reopened.version(), 1);
    assert_eq!(scan_all(&reopened, 0), vec![(Key::new(5, 5), Value::new(5, 0))]);
}

#[test]
fn test_damaged_slot0_prefix_opens_from_slot1() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("slot0.tsa");
    let config = Config::builder().path(&path).page_size(2048).build();

    {
        let archive = Archive::create(config).unwrap();
        for i in 1..=2u64 {
            let mut edit = archive.edit().unwrap();
            edit.add(0, Key::new(i, 0), Value::new(i, 0)).unwrap();
            edit.commit().unwrap();
        }
    }

    // Version 2 lives in slot 0; wipe its magic and page size
    patch_file(&path, 0, &[0u8; 16]);

    let archive = Archive::open_existing(&path, true).unwrap();
    assert_eq!(archive.version(), 1);
    assert_eq!(archive.page_size(), 2048);
    assert_eq!(scan_all(&archive, 0), vec![(Key::new(1, 0), Value::new(1, 0))]);
}

#[test]
fn test_unreadable_newest_table_falls_back_to_previous_version() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("table.tsa");
    let page_size = 4096u64;

    {
        let archive = Archive::create_new(&path).unwrap();
        for i in 1..=2u64 {
            let mut edit = archive.edit().unwrap();
            edit.add(0, Key::new(i, 0), Value::new(i, 0)).unwrap();
            edit.commit().unwrap();
        }
    }

    // Slot 0 holds version 2; its table page number sits at offset 24
    let bytes = std::fs::read(&path).unwrap();
    let table_page = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
    patch_file(&path, table_page * page_size + 12, &[0xEE; 8]);

    let archive = Archive::open_existing(&path, true).unwrap();
    assert_eq!(archive.version(), 1);
    assert_eq!(scan_all(&archive, 0), vec![(Key::new(1, 0), Value::new(1, 0))]);
}
