//! Read transaction
//!
//! A read handle pins the version that was published when it began. Pages
//! of that version are never reused while the handle is alive, so reads need
//! no locking beyond the page store's own.

use std::sync::Arc;

use super::table::AllocationTable;
use super::Shared;
use crate::encoding::EncodingKind;
use crate::error::Result;
use crate::tree::{PageSource, PointFilter, RangeScan, SortedTree, TreeScanner};
use crate::types::{Key, PageId, StreamId, Value};

static EMPTY_TREE: SortedTree = SortedTree::new(EncodingKind::Raw, EncodingKind::Raw);

/// Published pages straight from the store
struct SnapshotPages {
    shared: Arc<Shared>,
}

impl PageSource for SnapshotPages {
    fn page_size(&self) -> usize {
        self.shared.store.page_size()
    }

    fn load_page(&self, page: PageId) -> Result<Vec<u8>> {
        self.shared.store.read_page(page)
    }
}

/// Snapshot-isolated view of one published version
pub struct ReadTransaction {
    pages: SnapshotPages,
    table: Arc<AllocationTable>,
    closed: bool,
}

impl ReadTransaction {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let table = shared.coordinator.register_reader();
        tracing::trace!(version = table.version(), "read started");
        Self {
            pages: SnapshotPages { shared },
            table,
            closed: false,
        }
    }

    /// Version this handle observes
    pub fn version(&self) -> u64 {
        self.table.version()
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.table.stream_ids().collect()
    }

    pub fn has_stream(&self, stream: StreamId) -> bool {
        self.table.stream(stream).is_some()
    }

    pub fn entry_count(&self, stream: StreamId) -> u64 {
        self.tree(stream).entry_count()
    }

    pub fn get(&self, stream: StreamId, key: &Key) -> Result<Option<Value>> {
        self.tree(stream).get(&self.pages, key)
    }

    /// Entries with `start <= key < end` in ascending key order
    pub fn scan(&self, stream: StreamId, start: Key, end: Key) -> RangeScan<'_> {
        self.tree(stream).range(&self.pages, start, end, None)
    }

    pub fn scan_filtered<'a>(
        &'a self,
        stream: StreamId,
        start: Key,
        end: Key,
        filter: &'a dyn PointFilter,
    ) -> RangeScan<'a> {
        self.tree(stream).range(&self.pages, start, end, Some(filter))
    }

    /// Unpositioned cursor; call `seek_to_key` or `seek_range` first
    pub fn scanner<'a>(
        &'a self,
        stream: StreamId,
        filter: Option<&'a dyn PointFilter>,
    ) -> TreeScanner<'a> {
        self.tree(stream).scanner(&self.pages, filter)
    }

    /// Release the pinned version. Dropping the handle does the same.
    pub fn close(mut self) {
        self.release();
    }

    fn tree(&self, stream: StreamId) -> &SortedTree {
        self.table.stream(stream).unwrap_or(&EMPTY_TREE)
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.pages.shared.coordinator.release_reader(self.table.version());
        }
    }
}

impl Drop for ReadTransaction {
    fn drop(&mut self) {
        self.release();
    }
}
