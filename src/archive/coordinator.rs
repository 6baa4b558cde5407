//! Transaction coordinator
//!
//! Owns the published allocation table, the single edit slot and the
//! bookkeeping that decides when superseded pages may be reused.
//!
//! ## Page Reclamation
//! A commit producing version `n` releases the pages only older versions
//! referenced. They wait in `pending` until no reader pins a version below
//! `n`, then move to `reclaimed`, from where the next edit draws them.
//!
//! ## Quarantine
//! An edit that fails after its header write was attempted may have left a
//! durable header pointing at the pages it wrote. Those pages stay out of
//! every grant until a later commit overwrites that header slot.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::table::AllocationTable;
use crate::error::{ArchiveError, Result};
use crate::types::PageId;

/// Everything an edit needs from the coordinator when it starts
pub(crate) struct EditGrant {
    pub token: u64,
    pub base: Arc<AllocationTable>,
    /// Pages the edit may allocate in addition to the base free list
    pub reclaimed: Vec<PageId>,
    /// Pages still awaiting reclamation; persisted so a reopen can reuse them
    pub orphaned: Vec<PageId>,
    /// Pages a failed commit may have made reachable from disk
    pub quarantined: Vec<PageId>,
}

/// Point-in-time view of the coordinator's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveStats {
    pub version: u64,
    pub live_readers: usize,
    pub edit_active: bool,
    pub streams: usize,
    pub leaf_pages: usize,
    /// Pages the next edit may allocate
    pub free_pages: usize,
    /// Pages released by a commit but still pinned by a reader
    pub pending_pages: usize,
    /// Pages written by a failed commit whose header may be on disk
    pub quarantined_pages: usize,
    /// Page locations the store has handed out, header slots included
    pub total_pages: u64,
}

struct PendingRelease {
    released_at: u64,
    pages: Vec<PageId>,
}

struct CoordinatorState {
    published: Arc<AllocationTable>,
    /// version -> number of live read handles pinned to it
    readers: BTreeMap<u64, usize>,
    pending: Vec<PendingRelease>,
    reclaimed: Vec<PageId>,
    quarantined: Vec<PageId>,
    active_edit: Option<u64>,
    next_token: u64,
}

pub(crate) struct Coordinator {
    state: Mutex<CoordinatorState>,
    edit_released: Condvar,
}

impl Coordinator {
    pub(crate) fn new(table: AllocationTable) -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                published: Arc::new(table),
                readers: BTreeMap::new(),
                pending: Vec::new(),
                reclaimed: Vec::new(),
                quarantined: Vec::new(),
                active_edit: None,
                next_token: 1,
            }),
            edit_released: Condvar::new(),
        }
    }

    pub(crate) fn published(&self) -> Arc<AllocationTable> {
        Arc::clone(&self.state.lock().published)
    }

    // =========================================================================
    // Edit Slot
    // =========================================================================

    /// Wait up to `timeout` (None = forever) for the edit slot
    pub(crate) fn acquire_edit(&self, timeout: Option<Duration>) -> Option<EditGrant> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.state.lock();

        while state.active_edit.is_some() {
            match deadline {
                Some(deadline) => {
                    let result = self.edit_released.wait_until(&mut state, deadline);
                    if result.timed_out() && state.active_edit.is_some() {
                        return None;
                    }
                }
                None => self.edit_released.wait(&mut state),
            }
        }

        let token = state.next_token;
        state.next_token += 1;
        state.active_edit = Some(token);

        let reclaimed = std::mem::take(&mut state.reclaimed);
        let orphaned = state
            .pending
            .iter()
            .flat_map(|p| p.pages.iter().copied())
            .collect();

        Some(EditGrant {
            token,
            base: Arc::clone(&state.published),
            reclaimed,
            orphaned,
            quarantined: state.quarantined.clone(),
        })
    }

    /// Fail unless `token` still owns the edit slot
    pub(crate) fn check_current(&self, token: u64) -> Result<()> {
        let state = self.state.lock();
        Self::ensure_owner(&state, token)
    }

    /// Swap in `table` as the published version and free the edit slot.
    ///
    /// `released` are pages `table` no longer references but older versions do.
    /// The caller has made the new header durable, so quarantined pages are
    /// unreachable from disk again.
    pub(crate) fn publish(
        &self,
        token: u64,
        table: AllocationTable,
        released: Vec<PageId>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_owner(&state, token)?;

        let version = table.version();
        state.published = Arc::new(table);
        if !released.is_empty() {
            state.pending.push(PendingRelease {
                released_at: version,
                pages: released,
            });
        }
        let quarantined = std::mem::take(&mut state.quarantined);
        state.reclaimed.extend(quarantined);
        state.active_edit = None;
        Self::reclaim(&mut state);
        drop(state);

        self.edit_released.notify_one();
        Ok(())
    }

    /// Free the edit slot without publishing. `returned` pages were handed to
    /// the edit but are referenced by no version; `quarantined` pages may be
    /// referenced by a header the edit wrote.
    pub(crate) fn abort(
        &self,
        token: u64,
        returned: Vec<PageId>,
        quarantined: Vec<PageId>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        Self::ensure_owner(&state, token)?;

        if !quarantined.is_empty() {
            tracing::warn!(pages = quarantined.len(), "quarantining pages of a failed commit");
        }
        state.reclaimed.extend(returned);
        state.quarantined.extend(quarantined);
        state.active_edit = None;
        drop(state);

        self.edit_released.notify_one();
        Ok(())
    }

    // =========================================================================
    // Readers
    // =========================================================================

    /// Pin the published version for a new read handle
    pub(crate) fn register_reader(&self) -> Arc<AllocationTable> {
        let mut state = self.state.lock();
        let table = Arc::clone(&state.published);
        *state.readers.entry(table.version()).or_insert(0) += 1;
        table
    }

    pub(crate) fn release_reader(&self, version: u64) {
        let mut state = self.state.lock();
        if let Some(count) = state.readers.get_mut(&version) {
            *count -= 1;
            if *count == 0 {
                state.readers.remove(&version);
            }
        }
        Self::reclaim(&mut state);
    }

    pub(crate) fn stats(&self, total_pages: u64) -> ArchiveStats {
        let state = self.state.lock();
        ArchiveStats {
            version: state.published.version(),
            live_readers: state.readers.values().sum(),
            edit_active: state.active_edit.is_some(),
            streams: state.published.streams().len(),
            leaf_pages: state.published.leaf_page_count(),
            free_pages: state
                .published
                .free_pages()
                .iter()
                .filter(|page| !state.quarantined.contains(page))
                .count()
                + state.reclaimed.len(),
            pending_pages: state.pending.iter().map(|p| p.pages.len()).sum(),
            quarantined_pages: state.quarantined.len(),
            total_pages,
        }
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_owner(state: &CoordinatorState, token: u64) -> Result<()> {
        match state.active_edit {
            Some(active) if active == token => Ok(()),
            Some(active) => Err(ArchiveError::CommitConflict(format!(
                "edit {} is not the current edit ({})",
                token, active
            ))),
            None => Err(ArchiveError::CommitConflict(format!(
                "edit {} is no longer active",
                token
            ))),
        }
    }

    /// Move pending releases no live reader can reach into the reclaimed pool
    fn reclaim(state: &mut CoordinatorState) {
        let oldest_pinned = state.readers.keys().next().copied();
        let mut freed = 0usize;

        let mut still_pending = Vec::with_capacity(state.pending.len());
        for release in state.pending.drain(..) {
            if oldest_pinned.map_or(true, |oldest| oldest >= release.released_at) {
                freed += release.pages.len();
                state.reclaimed.extend(release.pages);
            } else {
                still_pending.push(release);
            }
        }
        state.pending = still_pending;

        if freed > 0 {
            tracing::debug!(freed, ?oldest_pinned, "reclaimed superseded pages");
        }
    }
}
