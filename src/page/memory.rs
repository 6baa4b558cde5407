//! Volatile page store for scratch archives and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{PageStore, RESERVED_PAGES};
use crate::error::{ArchiveError, Result};
use crate::types::PageId;

pub struct MemoryPageStore {
    pages: RwLock<HashMap<PageId, Vec<u8>>>,
    page_size: usize,
    next_page: AtomicU64,
}

impl MemoryPageStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            pages: RwLock::new(HashMap::new()),
            page_size,
            next_page: AtomicU64::new(RESERVED_PAGES),
        }
    }

    /// Number of pages that have been written at least once
    pub fn written_pages(&self) -> usize {
        self.pages.read().len()
    }
}

impl PageStore for MemoryPageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, page: PageId) -> Result<Vec<u8>> {
        self.pages.read().get(&page).cloned().ok_or_else(|| {
            ArchiveError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("page {} was never written", page),
            ))
        })
    }

    fn write_page(&self, page: PageId, data: &[u8]) -> Result<()> {
        if data.len() > self.page_size {
            return Err(ArchiveError::Corruption(format!(
                "page image of {} bytes exceeds page size {}",
                data.len(),
                self.page_size
            )));
        }
        let mut buf = vec![0u8; self.page_size];
        buf[..data.len()].copy_from_slice(data);
        self.pages.write().insert(page, buf);
        Ok(())
    }

    fn allocate(&self) -> Result<PageId> {
        Ok(self.next_page.fetch_add(1, Ordering::SeqCst))
    }

    fn page_count(&self) -> u64 {
        self.next_page.load(Ordering::SeqCst)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        false
    }
}
