//! Forward-only cursors over a sorted tree.

use super::leaf::LeafReader;
use super::{PageSource, PointFilter, SortedTree};
use crate::error::Result;
use crate::types::{Key, Value};

/// Single-pass cursor. Call `seek_to_key` to (re)position, then `read`
/// until it yields `None`.
pub struct TreeScanner<'a> {
    tree: &'a SortedTree,
    pages: &'a dyn PageSource,
    filter: Option<&'a dyn PointFilter>,
    lower: Key,
    upper: Option<Key>,
    next_leaf: usize,
    current: Option<LeafReader>,
    pages_skipped: usize,
}

impl<'a> TreeScanner<'a> {
    pub(crate) fn new(
        tree: &'a SortedTree,
        pages: &'a dyn PageSource,
        filter: Option<&'a dyn PointFilter>,
    ) -> Self {
        Self {
            tree,
            pages,
            filter,
            lower: Key::MIN,
            upper: None,
            // Unpositioned until the first seek
            next_leaf: tree.leaves().len(),
            current: None,
            pages_skipped: 0,
        }
    }

    /// Position at the first entry with key >= `key`
    pub fn seek_to_key(&mut self, key: Key) {
        self.lower = key;
        self.upper = None;
        self.next_leaf = self.tree.first_leaf_ending_at_or_after(&key);
        self.current = None;
    }

    /// Position at `start` and stop before `end` (exclusive)
    pub fn seek_range(&mut self, start: Key, end: Key) {
        self.seek_to_key(start);
        self.upper = Some(end);
    }

    /// Yield the next in-order entry, or `None` at end of sequence
    pub fn read(&mut self) -> Result<Option<(Key, Value)>> {
        loop {
            if let Some(reader) = self.current.as_mut() {
                match reader.next_entry()? {
                    Some((key, value)) => {
                        if key < self.lower {
                            continue;
                        }
                        if self.upper.is_some_and(|upper| key >= upper) {
                            self.finish();
                            return Ok(None);
                        }
                        if self.filter.is_some_and(|f| !f.contains(&key)) {
                            continue;
                        }
                        return Ok(Some((key, value)));
                    }
                    None => self.current = None,
                }
            }

            let leaves = self.tree.leaves();
            let Some(leaf) = leaves.get(self.next_leaf) else {
                return Ok(None);
            };
            self.next_leaf += 1;

            if self.upper.is_some_and(|upper| leaf.first >= upper) {
                self.finish();
                return Ok(None);
            }
            if let Some(filter) = self.filter {
                if filter.page_cannot_contain_points(&leaf.lower_bound(), &leaf.upper_bound()) {
                    self.pages_skipped += 1;
                    continue;
                }
            }

            let image = self.pages.load_page(leaf.page)?;
            self.current = Some(LeafReader::open(
                image,
                self.tree.key_encoding(),
                self.tree.value_encoding(),
            )?);
        }
    }

    /// Leaves skipped by the filter's page test so far
    pub fn pages_skipped(&self) -> usize {
        self.pages_skipped
    }

    fn finish(&mut self) {
        self.current = None;
        self.next_leaf = self.tree.leaves().len();
    }
}

/// `[start, end)` scan as an iterator. Stops after the first error.
pub struct RangeScan<'a> {
    scanner: TreeScanner<'a>,
    failed: bool,
}

impl<'a> RangeScan<'a> {
    pub(crate) fn new(mut scanner: TreeScanner<'a>, start: Key, end: Key) -> Self {
        scanner.seek_range(start, end);
        Self { scanner, failed: false }
    }

    pub fn pages_skipped(&self) -> usize {
        self.scanner.pages_skipped()
    }
}

impl Iterator for RangeScan<'_> {
    type Item = Result<(Key, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.scanner.read() {
            Ok(entry) => entry.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
