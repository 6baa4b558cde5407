//! Sorted Tree Module
//!
//! Ordered `Key -> Value` index stored on pages.
//!
//! ## Layout
//! A tree is a list of leaf summaries sorted by key. The list itself is the
//! branch level and lives in the allocation table; every leaf is one page
//! whose entries are written by the stream's key/value encodings.
//!
//! ```text
//!   SortedTree (in allocation table)
//!   ┌──────────┬──────────┬──────────┐
//!   │ leaf 0   │ leaf 1   │ leaf 2   │   first/last key, point range, count
//!   └────┬─────┴────┬─────┴────┬─────┘
//!        ▼          ▼          ▼
//!     page 17    page 4     page 23      encoded entries
//! ```
//!
//! ## Invariants
//! - Keys are strictly ascending across the whole leaf list
//! - Duplicate keys are rejected with `DuplicateKey`
//! - Mutations never write a page reachable from a published version; the
//!   `PageSink` decides whether a page may be rewritten or must be shadowed

mod filter;
pub(crate) mod leaf;
mod scanner;

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::encoding::EncodingKind;
use crate::error::{ArchiveError, Result};
use crate::types::{Key, PageId, Value};

use leaf::{encode_leaf, LeafReader};

pub use filter::{PointFilter, PointIdFilter};
pub use scanner::{RangeScan, TreeScanner};

/// Read access to pages as seen by one transaction
pub trait PageSource {
    fn page_size(&self) -> usize;

    fn load_page(&self, page: PageId) -> Result<Vec<u8>>;
}

/// Write access for an edit. Pages are staged, not written, until commit.
pub trait PageSink: PageSource {
    fn allocate_page(&mut self) -> Result<PageId>;

    fn stage_page(&mut self, page: PageId, image: Vec<u8>);

    /// Stop referencing `page` from the version being built
    fn release_page(&mut self, page: PageId);

    /// True if `page` was allocated by this edit and is invisible to readers
    fn is_private(&self, page: PageId) -> bool;
}

/// Summary of one leaf page, kept in the allocation table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafSummary {
    pub page: PageId,
    pub first: Key,
    pub last: Key,
    pub min_point: u64,
    pub max_point: u64,
    pub count: u32,
}

impl LeafSummary {
    fn describe(entries: &[(Key, Value)]) -> Option<Self> {
        let first = entries.first()?.0;
        let last = entries.last()?.0;
        let (min_point, max_point) = entries.iter().fold((u64::MAX, 0), |(lo, hi), (k, _)| {
            (lo.min(k.point_id), hi.max(k.point_id))
        });
        Some(Self {
            page: 0,
            first,
            last,
            min_point,
            max_point,
            count: entries.len() as u32,
        })
    }

    /// Per-field minimum of the keys on this page
    pub fn lower_bound(&self) -> Key {
        Key::new(self.first.timestamp, self.min_point)
    }

    /// Per-field maximum of the keys on this page
    pub fn upper_bound(&self) -> Key {
        Key::new(self.last.timestamp, self.max_point)
    }
}

/// One ordered index: its encodings plus the ordered leaf list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortedTree {
    key_encoding: EncodingKind,
    value_encoding: EncodingKind,
    leaves: Vec<LeafSummary>,
}

impl SortedTree {
    pub const fn new(key_encoding: EncodingKind, value_encoding: EncodingKind) -> Self {
        Self {
            key_encoding,
            value_encoding,
            leaves: Vec::new(),
        }
    }

    pub fn key_encoding(&self) -> EncodingKind {
        self.key_encoding
    }

    pub fn value_encoding(&self) -> EncodingKind {
        self.value_encoding
    }

    pub fn leaves(&self) -> &[LeafSummary] {
        &self.leaves
    }

    pub fn entry_count(&self) -> u64 {
        self.leaves.iter().map(|l| u64::from(l.count)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Pages referenced by this tree
    pub fn pages(&self) -> impl Iterator<Item = PageId> + '_ {
        self.leaves.iter().map(|l| l.page)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Point lookup
    pub fn get(&self, pages: &dyn PageSource, key: &Key) -> Result<Option<Value>> {
        let idx = self.first_leaf_ending_at_or_after(key);
        let Some(leaf) = self.leaves.get(idx) else {
            return Ok(None);
        };
        if leaf.first > *key {
            return Ok(None);
        }

        let mut reader = self.open_leaf(pages, leaf)?;
        while let Some((k, v)) = reader.next_entry()? {
            if k == *key {
                return Ok(Some(v));
            }
            if k > *key {
                break;
            }
        }
        Ok(None)
    }

    /// Unpositioned cursor; call `seek_to_key` before reading
    pub fn scanner<'a>(
        &'a self,
        pages: &'a dyn PageSource,
        filter: Option<&'a dyn PointFilter>,
    ) -> TreeScanner<'a> {
        TreeScanner::new(self, pages, filter)
    }

    /// Iterate `[start, end)` in key order
    pub fn range<'a>(
        &'a self,
        pages: &'a dyn PageSource,
        start: Key,
        end: Key,
        filter: Option<&'a dyn PointFilter>,
    ) -> RangeScan<'a> {
        RangeScan::new(self.scanner(pages, filter), start, end)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Insert `key`; fails with `DuplicateKey` if it is already present
    pub fn add<S: PageSink + ?Sized>(&mut self, sink: &mut S, key: Key, value: Value) -> Result<()> {
        if self.leaves.is_empty() {
            return self.rewrite_range(sink, 0..0, &[(key, value)]);
        }

        let idx = self.insertion_leaf(&key);
        let mut entries = self.read_leaf(&*sink, &self.leaves[idx])?;
        let pos = match entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(_) => {
                return Err(ArchiveError::DuplicateKey {
                    timestamp: key.timestamp,
                    point_id: key.point_id,
                })
            }
            Err(pos) => pos,
        };
        entries.insert(pos, (key, value));

        // Appending past the last key: leave a full tail leaf untouched and
        // start a new one instead of splitting it in half.
        let is_tail_append = idx + 1 == self.leaves.len() && pos + 1 == entries.len();
        if is_tail_append && self.encode(&entries, sink.page_size()).is_none() {
            let end = self.leaves.len();
            return self.rewrite_range(sink, end..end, &[(key, value)]);
        }

        self.rewrite_range(sink, idx..idx + 1, &entries)
    }

    /// Delete `key`; returns whether it was present
    pub fn remove<S: PageSink + ?Sized>(&mut self, sink: &mut S, key: &Key) -> Result<bool> {
        let idx = self.first_leaf_ending_at_or_after(key);
        if idx >= self.leaves.len() || self.leaves[idx].first > *key {
            return Ok(false);
        }

        let mut entries = self.read_leaf(&*sink, &self.leaves[idx])?;
        let Ok(pos) = entries.binary_search_by(|(k, _)| k.cmp(key)) else {
            return Ok(false);
        };
        entries.remove(pos);

        if entries.is_empty() {
            self.rewrite_range(sink, idx..idx + 1, &[])?;
            return Ok(true);
        }

        // Fold into a neighbour when both fit on one page
        let page_size = sink.page_size();
        if idx + 1 < self.leaves.len() {
            let mut merged = entries.clone();
            merged.extend(self.read_leaf(&*sink, &self.leaves[idx + 1])?);
            if self.encode(&merged, page_size).is_some() {
                self.rewrite_range(sink, idx..idx + 2, &merged)?;
                return Ok(true);
            }
        }
        if idx > 0 {
            let mut merged = self.read_leaf(&*sink, &self.leaves[idx - 1])?;
            merged.extend(entries.iter().copied());
            if self.encode(&merged, page_size).is_some() {
                self.rewrite_range(sink, idx - 1..idx + 1, &merged)?;
                return Ok(true);
            }
        }

        self.rewrite_range(sink, idx..idx + 1, &entries)?;
        Ok(true)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// First leaf whose last key is >= `key`
    pub(crate) fn first_leaf_ending_at_or_after(&self, key: &Key) -> usize {
        self.leaves.partition_point(|l| l.last < *key)
    }

    /// Leaf an insert of `key` belongs in: the last leaf starting at or
    /// before it, or the first leaf when `key` precedes everything
    fn insertion_leaf(&self, key: &Key) -> usize {
        self.leaves.partition_point(|l| l.first <= *key).saturating_sub(1)
    }

    fn open_leaf(&self, pages: &dyn PageSource, leaf: &LeafSummary) -> Result<LeafReader> {
        let image = pages.load_page(leaf.page)?;
        LeafReader::open(image, self.key_encoding, self.value_encoding)
    }

    fn read_leaf<S: PageSource + ?Sized>(
        &self,
        pages: &S,
        leaf: &LeafSummary,
    ) -> Result<Vec<(Key, Value)>> {
        let image = pages.load_page(leaf.page)?;
        let entries = LeafReader::open(image, self.key_encoding, self.value_encoding)?.read_all()?;
        if entries.len() != leaf.count as usize {
            return Err(ArchiveError::Corruption(format!(
                "leaf page {} holds {} entries, summary says {}",
                leaf.page,
                entries.len(),
                leaf.count
            )));
        }
        Ok(entries)
    }

    fn encode(&self, entries: &[(Key, Value)], page_size: usize) -> Option<Vec<u8>> {
        encode_leaf(entries, self.key_encoding, self.value_encoding, page_size)
    }

    /// Split `entries` into page images, halving until each fits
    fn pack(
        &self,
        entries: &[(Key, Value)],
        page_size: usize,
        out: &mut Vec<(Vec<u8>, LeafSummary)>,
    ) -> Result<()> {
        if let Some(image) = self.encode(entries, page_size) {
            if let Some(summary) = LeafSummary::describe(entries) {
                out.push((image, summary));
            }
            return Ok(());
        }
        if entries.len() < 2 {
            return Err(ArchiveError::Config(format!(
                "page size {} cannot hold a single entry",
                page_size
            )));
        }
        let mid = entries.len() / 2;
        self.pack(&entries[..mid], page_size, out)?;
        self.pack(&entries[mid..], page_size, out)
    }

    /// Replace the leaves in `range` with pages holding `entries`.
    ///
    /// Pages private to the edit are rewritten in place; shared pages are
    /// released and their contents land on freshly allocated pages.
    fn rewrite_range<S: PageSink + ?Sized>(
        &mut self,
        sink: &mut S,
        range: Range<usize>,
        entries: &[(Key, Value)],
    ) -> Result<()> {
        let mut packed = Vec::new();
        self.pack(entries, sink.page_size(), &mut packed)?;

        let mut reusable = Vec::new();
        for leaf in &self.leaves[range.clone()] {
            if sink.is_private(leaf.page) {
                reusable.push(leaf.page);
            } else {
                sink.release_page(leaf.page);
            }
        }
        reusable.reverse();

        let mut summaries = Vec::with_capacity(packed.len());
        for (image, mut summary) in packed {
            let page = match reusable.pop() {
                Some(page) => page,
                None => sink.allocate_page()?,
            };
            summary.page = page;
            sink.stage_page(page, image);
            summaries.push(summary);
        }
        for page in reusable {
            sink.release_page(page);
        }

        self.leaves.splice(range, summaries);
        Ok(())
    }
}
