//! Edit transaction
//!
//! The sole writer. All mutations land in a private workspace layered over
//! the version the edit started from; nothing is written to the page store
//! until `commit`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::header::Header;
use super::table::AllocationTable;
use super::Shared;
use crate::encoding::EncodingKind;
use crate::error::{ArchiveError, Result};
use crate::page::PageStore;
use crate::tree::{PageSink, PageSource, PointFilter, RangeScan, SortedTree, TreeScanner};
use crate::types::{Key, PageId, StreamId, Value};

/// Tree used to answer queries against a stream that does not exist
static EMPTY_TREE: SortedTree = SortedTree::new(EncodingKind::Raw, EncodingKind::Raw);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditState {
    Active,
    Committed(u64),
    RolledBack,
}

/// Pages as seen by the edit: staged images shadow the store
struct Workspace {
    store: Arc<dyn PageStore>,
    /// Allocatable pages, lowest last so `pop` hands out the lowest
    free: Vec<PageId>,
    staged: HashMap<PageId, Vec<u8>>,
    /// Pages allocated by this edit; no reader can see them
    private: HashSet<PageId>,
    /// Base-version pages this edit stopped referencing
    released: Vec<PageId>,
    /// Pages that came from the coordinator's pool or the store's tail;
    /// returned to the pool on rollback
    returnable: Vec<PageId>,
}

impl PageSource for Workspace {
    fn page_size(&self) -> usize {
        self.store.page_size()
    }

    fn load_page(&self, page: PageId) -> Result<Vec<u8>> {
        match self.staged.get(&page) {
            Some(image) => Ok(image.clone()),
            None => self.store.read_page(page),
        }
    }
}

impl PageSink for Workspace {
    fn allocate_page(&mut self) -> Result<PageId> {
        let page = match self.free.pop() {
            Some(page) => page,
            None => self.allocate_fresh()?,
        };
        self.private.insert(page);
        Ok(page)
    }

    fn stage_page(&mut self, page: PageId, image: Vec<u8>) {
        self.staged.insert(page, image);
    }

    fn release_page(&mut self, page: PageId) {
        if self.private.remove(&page) {
            self.staged.remove(&page);
            self.free.push(page);
        } else {
            self.released.push(page);
        }
    }

    fn is_private(&self, page: PageId) -> bool {
        self.private.contains(&page)
    }
}

impl Workspace {
    fn allocate_fresh(&mut self) -> Result<PageId> {
        let page = self.store.allocate()?;
        self.returnable.push(page);
        Ok(page)
    }
}

/// Exclusive write handle. Dropping it without `commit` rolls back.
pub struct EditTransaction {
    shared: Arc<Shared>,
    token: u64,
    base: Arc<AllocationTable>,
    streams: BTreeMap<StreamId, Arc<SortedTree>>,
    workspace: Workspace,
    orphaned: Vec<PageId>,
    state: EditState,
    /// Set once a header write was attempted; the pages of this edit may
    /// then be referenced from disk and must not be handed out again
    header_attempted: bool,
    /// Pages `commit` wrote, table image included
    written: Vec<PageId>,
}

impl std::fmt::Debug for EditTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditTransaction")
            .field("token", &self.token)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl EditTransaction {
    pub(crate) fn new(shared: Arc<Shared>, grant: super::coordinator::EditGrant) -> Self {
        let quarantined: HashSet<PageId> = grant.quarantined.iter().copied().collect();
        let mut free: Vec<PageId> = grant
            .base
            .free_pages()
            .iter()
            .copied()
            .filter(|page| !quarantined.contains(page))
            .collect();
        free.extend(grant.reclaimed.iter().copied());
        free.sort_unstable_by(|a, b| b.cmp(a));

        // Free again on reopen once this edit's header replaces the failed one
        let mut orphaned = grant.orphaned;
        orphaned.extend(grant.quarantined);

        let workspace = Workspace {
            store: Arc::clone(&shared.store),
            free,
            staged: HashMap::new(),
            private: HashSet::new(),
            released: Vec::new(),
            returnable: grant.reclaimed,
        };

        tracing::debug!(token = grant.token, base = grant.base.version(), "edit started");

        Self {
            shared,
            token: grant.token,
            streams: grant.base.streams().clone(),
            base: grant.base,
            workspace,
            orphaned,
            state: EditState::Active,
            header_attempted: false,
            written: Vec::new(),
        }
    }

    /// Version this edit layers over
    pub fn base_version(&self) -> u64 {
        self.base.version()
    }

    pub fn is_active(&self) -> bool {
        self.state == EditState::Active
    }

    // =========================================================================
    // Streams
    // =========================================================================

    /// Create an empty stream; returns false if it already exists
    pub fn create_stream(
        &mut self,
        stream: StreamId,
        key_encoding: EncodingKind,
        value_encoding: EncodingKind,
    ) -> Result<bool> {
        self.ensure_active()?;
        if self.streams.contains_key(&stream) {
            return Ok(false);
        }
        self.streams
            .insert(stream, Arc::new(SortedTree::new(key_encoding, value_encoding)));
        Ok(true)
    }

    /// Remove a stream and release its pages; returns false if it was absent
    pub fn drop_stream(&mut self, stream: StreamId) -> Result<bool> {
        self.ensure_active()?;
        let Some(tree) = self.streams.remove(&stream) else {
            return Ok(false);
        };
        for page in tree.pages() {
            self.workspace.release_page(page);
        }
        Ok(true)
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }

    // =========================================================================
    // Index Operations
    // =========================================================================

    /// Insert a new entry; an existing key fails with `DuplicateKey`.
    ///
    /// A missing stream is created with the configured default encodings.
    /// Any failure other than `DuplicateKey` rolls the edit back.
    pub fn add(&mut self, stream: StreamId, key: Key, value: Value) -> Result<()> {
        self.ensure_active()?;
        let (key_encoding, value_encoding) = (
            self.shared.config.default_key_encoding,
            self.shared.config.default_value_encoding,
        );
        let tree = self
            .streams
            .entry(stream)
            .or_insert_with(|| Arc::new(SortedTree::new(key_encoding, value_encoding)));

        let result = Arc::make_mut(tree).add(&mut self.workspace, key, value);
        self.abandon_on_failure(result)
    }

    /// Delete an entry; returns whether it existed
    pub fn remove(&mut self, stream: StreamId, key: &Key) -> Result<bool> {
        self.ensure_active()?;
        let Some(tree) = self.streams.get_mut(&stream) else {
            return Ok(false);
        };
        let result = Arc::make_mut(tree).remove(&mut self.workspace, key);
        self.abandon_on_failure(result)
    }

    pub fn get(&self, stream: StreamId, key: &Key) -> Result<Option<Value>> {
        self.ensure_active()?;
        self.tree(stream).get(&self.workspace, key)
    }

    /// Entries with `start <= key < end`, including this edit's changes
    pub fn scan(&self, stream: StreamId, start: Key, end: Key) -> Result<RangeScan<'_>> {
        self.ensure_active()?;
        Ok(self.tree(stream).range(&self.workspace, start, end, None))
    }

    pub fn scan_filtered<'a>(
        &'a self,
        stream: StreamId,
        start: Key,
        end: Key,
        filter: &'a dyn PointFilter,
    ) -> Result<RangeScan<'a>> {
        self.ensure_active()?;
        Ok(self.tree(stream).range(&self.workspace, start, end, Some(filter)))
    }

    /// Unpositioned cursor over a stream
    pub fn scanner<'a>(
        &'a self,
        stream: StreamId,
        filter: Option<&'a dyn PointFilter>,
    ) -> Result<TreeScanner<'a>> {
        self.ensure_active()?;
        Ok(self.tree(stream).scanner(&self.workspace, filter))
    }

    pub fn entry_count(&self, stream: StreamId) -> u64 {
        self.tree(stream).entry_count()
    }

    // =========================================================================
    // Termination
    // =========================================================================

    /// Make every change durable, then publish it as the next version.
    ///
    /// On failure the published version is left untouched and the edit is
    /// rolled back.
    pub fn commit(&mut self) -> Result<u64> {
        self.ensure_active()?;
        self.shared.coordinator.check_current(self.token)?;

        let (table, released) = match self.write_version() {
            Ok(written) => written,
            Err(e) => {
                tracing::warn!(token = self.token, error = %e, "commit failed, rolling back");
                self.abandon();
                return Err(e);
            }
        };

        let version = table.version();
        if let Err(e) = self.shared.coordinator.publish(self.token, table, released) {
            self.state = EditState::RolledBack;
            return Err(e);
        }

        self.state = EditState::Committed(version);
        tracing::debug!(token = self.token, version, "edit committed");
        Ok(version)
    }

    /// Discard every change. Calling it again, or after commit, does nothing.
    pub fn rollback(&mut self) {
        if self.state == EditState::Active {
            self.abandon();
            tracing::debug!(token = self.token, "edit rolled back");
        }
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            EditState::Active => Ok(()),
            EditState::Committed(version) => Err(ArchiveError::CommitConflict(format!(
                "edit {} already committed version {}",
                self.token, version
            ))),
            EditState::RolledBack => Err(ArchiveError::CommitConflict(format!(
                "edit {} was rolled back",
                self.token
            ))),
        }
    }

    fn tree(&self, stream: StreamId) -> &SortedTree {
        self.streams.get(&stream).map_or(&EMPTY_TREE, |tree| tree.as_ref())
    }

    /// A half-applied mutation leaves the shadow inconsistent; only a
    /// rejected duplicate leaves it untouched
    fn abandon_on_failure<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            if !matches!(e, ArchiveError::DuplicateKey { .. }) {
                tracing::warn!(token = self.token, error = %e, "edit failed, rolling back");
                self.abandon();
            }
        }
        result
    }

    /// Write data pages, the table image and the header, flushing in between
    fn write_version(&mut self) -> Result<(AllocationTable, Vec<PageId>)> {
        let store = Arc::clone(&self.workspace.store);
        let version = self.base.version() + 1;

        let mut released = self.workspace.released.clone();
        released.extend_from_slice(self.base.table_pages());

        let mut staged: Vec<(&PageId, &Vec<u8>)> = self.workspace.staged.iter().collect();
        staged.sort_unstable_by_key(|(page, _)| **page);
        self.written = staged.iter().map(|(page, _)| **page).collect();
        for (page, image) in staged {
            store.write_page(*page, image)?;
        }

        let mut free = self.workspace.free.clone();
        free.reverse();
        let mut table = AllocationTable::derive(version, self.streams.clone(), free);

        let mut orphaned = self.orphaned.clone();
        orphaned.extend_from_slice(&released);
        let workspace = &mut self.workspace;
        let header = table.persist(store.as_ref(), &orphaned, || workspace.allocate_fresh())?;
        self.written.extend_from_slice(table.table_pages());

        // Data and table must be durable before the header makes them reachable
        store.flush()?;
        self.header_attempted = true;
        store.write_page(Header::slot(version), &header.encode())?;
        store.flush()?;

        tracing::trace!(
            version,
            pages = self.workspace.staged.len(),
            released = released.len(),
            "version written"
        );
        Ok((table, released))
    }

    /// Terminate without publishing
    fn abandon(&mut self) {
        let mut returned = std::mem::take(&mut self.workspace.returnable);
        let quarantined = if self.header_attempted {
            let written: HashSet<PageId> = self.written.iter().copied().collect();
            returned.retain(|page| !written.contains(page));
            std::mem::take(&mut self.written)
        } else {
            Vec::new()
        };
        self.workspace.staged.clear();
        self.workspace.private.clear();

        if let Err(e) = self.shared.coordinator.abort(self.token, returned, quarantined) {
            tracing::warn!(token = self.token, error = %e, "edit slot already released");
        }
        self.state = EditState::RolledBack;
    }
}

impl Drop for EditTransaction {
    fn drop(&mut self) {
        self.rollback();
    }
}
