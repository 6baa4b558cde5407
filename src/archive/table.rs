//! Allocation Table
//!
//! Immutable snapshot of which pages make up each stream. A new version is
//! always derived from the previous one; trees that an edit did not touch are
//! shared through their `Arc`.
//!
//! ## Persisted Image
//! The table is serialized with bincode and written to a chain of pages no
//! live version references, never over an older image:
//! ```text
//! ┌──────────────┬─────────────┬──────────────────────────┐
//! │ Next: u64    │ Len: u32    │ Payload (bincode slice)  │   next = 0 ends
//! └──────────────┴─────────────┴──────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::header::Header;
use crate::encoding::{read_u32_le, read_u64_le};
use crate::error::{ArchiveError, Result};
use crate::page::PageStore;
use crate::tree::SortedTree;
use crate::types::{PageId, StreamId};

/// Next (8) + Len (4)
const CHAIN_HEADER_SIZE: usize = 12;

/// One published (or about to be published) version of the archive metadata
#[derive(Debug, Clone, Default)]
pub struct AllocationTable {
    version: u64,
    streams: BTreeMap<StreamId, Arc<SortedTree>>,
    /// Pages no version references; safe for the next edit to allocate
    free_pages: Vec<PageId>,
    /// Pages holding this table's own image
    table_pages: Vec<PageId>,
}

#[derive(Serialize)]
struct TableImageRef<'a> {
    version: u64,
    streams: Vec<(StreamId, &'a SortedTree)>,
    free_pages: &'a [PageId],
    orphaned_pages: &'a [PageId],
}

#[derive(Deserialize)]
struct TableImage {
    version: u64,
    streams: Vec<(StreamId, SortedTree)>,
    free_pages: Vec<PageId>,
    /// Pages released by older versions that were still pinned by readers
    /// when this image was written. Nothing pins them after a reopen.
    orphaned_pages: Vec<PageId>,
}

impl AllocationTable {
    pub(crate) fn derive(
        version: u64,
        streams: BTreeMap<StreamId, Arc<SortedTree>>,
        free_pages: Vec<PageId>,
    ) -> Self {
        Self {
            version,
            streams,
            free_pages,
            table_pages: Vec::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn stream(&self, id: StreamId) -> Option<&SortedTree> {
        self.streams.get(&id).map(|tree| tree.as_ref())
    }

    pub fn stream_ids(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.streams.keys().copied()
    }

    pub(crate) fn streams(&self) -> &BTreeMap<StreamId, Arc<SortedTree>> {
        &self.streams
    }

    pub fn free_pages(&self) -> &[PageId] {
        &self.free_pages
    }

    pub fn table_pages(&self) -> &[PageId] {
        &self.table_pages
    }

    /// Leaf pages reachable from this version
    pub fn leaf_page_count(&self) -> usize {
        self.streams.values().map(|tree| tree.leaves().len()).sum()
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write this table's image to a page chain and return the header that
    /// points at it. The caller flushes and writes the header.
    ///
    /// Chain pages come off the front of this table's free list first and
    /// from `allocate` after that.
    pub(crate) fn persist<F>(
        &mut self,
        store: &dyn PageStore,
        orphaned: &[PageId],
        mut allocate: F,
    ) -> Result<Header>
    where
        F: FnMut() -> Result<PageId>,
    {
        let chunk_size = store.page_size() - CHAIN_HEADER_SIZE;

        let needed = self.image(orphaned)?.len().div_ceil(chunk_size).max(1);
        let reused = needed.min(self.free_pages.len());
        let mut pages: Vec<PageId> = self.free_pages.drain(..reused).collect();
        while pages.len() < needed {
            pages.push(allocate()?);
        }

        // Taking pages off the free list only shrinks the image, so it still
        // fits; surplus chain pages carry empty chunks
        let payload = self.image(orphaned)?;
        let crc = crc32fast::hash(&payload);
        let mut chunks: Vec<&[u8]> = payload.chunks(chunk_size).collect();
        chunks.resize(pages.len(), &[]);

        for (i, chunk) in chunks.iter().enumerate() {
            let next = pages.get(i + 1).copied().unwrap_or(0);
            let mut buf = Vec::with_capacity(CHAIN_HEADER_SIZE + chunk.len());
            buf.extend_from_slice(&next.to_le_bytes());
            buf.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
            buf.extend_from_slice(chunk);
            store.write_page(pages[i], &buf)?;
        }

        let header = Header {
            page_size: store.page_size() as u32,
            version: self.version,
            table_page: pages[0],
            table_len: payload.len() as u64,
            table_crc: crc,
        };
        self.table_pages = pages;
        Ok(header)
    }

    fn image(&self, orphaned: &[PageId]) -> Result<Vec<u8>> {
        let image = TableImageRef {
            version: self.version,
            streams: self.streams.iter().map(|(id, tree)| (*id, tree.as_ref())).collect(),
            free_pages: &self.free_pages,
            orphaned_pages: orphaned,
        };
        Ok(bincode::serialize(&image)?)
    }

    /// Load the table a header points at
    pub(crate) fn load(store: &dyn PageStore, header: &Header) -> Result<Self> {
        let mut payload = Vec::with_capacity(header.table_len as usize);
        let mut table_pages = Vec::new();
        let mut next = header.table_page;

        while next != 0 {
            if table_pages.contains(&next) || table_pages.len() as u64 > store.page_count() {
                return Err(ArchiveError::Corruption(format!(
                    "allocation table chain loops at page {}",
                    next
                )));
            }
            let page = store.read_page(next)?;
            let len = read_u32_le(&page, 8)? as usize;
            let chunk = page.get(CHAIN_HEADER_SIZE..CHAIN_HEADER_SIZE + len).ok_or_else(|| {
                ArchiveError::Corruption(format!("table page {} overruns its length", next))
            })?;
            payload.extend_from_slice(chunk);
            table_pages.push(next);
            next = read_u64_le(&page, 0)?;
        }

        if payload.len() as u64 != header.table_len || crc32fast::hash(&payload) != header.table_crc {
            return Err(ArchiveError::Corruption(format!(
                "allocation table image for version {} failed validation",
                header.version
            )));
        }

        let image: TableImage = bincode::deserialize(&payload)?;
        if image.version != header.version {
            return Err(ArchiveError::Corruption(format!(
                "header names version {}, table image holds {}",
                header.version, image.version
            )));
        }

        let limit = store.page_count();
        let mut free_pages: Vec<PageId> = image
            .free_pages
            .into_iter()
            .chain(image.orphaned_pages)
            .filter(|page| *page < limit)
            .collect();
        free_pages.sort_unstable();
        free_pages.dedup();

        Ok(Self {
            version: image.version,
            streams: image
                .streams
                .into_iter()
                .map(|(id, tree)| (id, Arc::new(tree)))
                .collect(),
            free_pages,
            table_pages,
        })
    }
}
