//! File-backed page store.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{PageStore, RESERVED_PAGES};
use crate::error::{ArchiveError, Result};
use crate::types::PageId;

/// Pages stored back to back in a single file
pub struct FilePageStore {
    /// Backing file; seek + read/write pairs must not interleave
    file: Mutex<File>,
    path: PathBuf,
    page_size: usize,
    read_only: bool,
    /// Next location `allocate` hands out
    next_page: AtomicU64,
}

impl FilePageStore {
    /// Create a new, empty file. Fails if the file already exists.
    pub fn create(path: &Path, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        tracing::trace!(path = %path.display(), page_size, "created page file");

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            page_size,
            read_only: false,
            next_page: AtomicU64::new(RESERVED_PAGES),
        })
    }

    /// Open an existing file
    pub fn open(path: &Path, page_size: usize, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)?;

        let len = file.metadata()?.len();
        let pages = len.div_ceil(page_size as u64).max(RESERVED_PAGES);

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            page_size,
            read_only,
            next_page: AtomicU64::new(pages),
        })
    }

    /// Read the leading bytes of a file without knowing its page size
    pub fn read_prefix(path: &Path, len: usize) -> Result<Vec<u8>> {
        let mut file = File::open(path)?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset(&self, page: PageId) -> u64 {
        page * self.page_size as u64
    }
}

impl PageStore for FilePageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, page: PageId) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.page_size];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.offset(page)))?;
        file.read_exact(&mut buf)?;
        tracing::trace!(page, "read page");
        Ok(buf)
    }

    fn write_page(&self, page: PageId, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(ArchiveError::ReadOnlyViolation);
        }
        if data.len() > self.page_size {
            return Err(ArchiveError::Corruption(format!(
                "page image of {} bytes exceeds page size {}",
                data.len(),
                self.page_size
            )));
        }

        let mut buf = vec![0u8; self.page_size];
        buf[..data.len()].copy_from_slice(data);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.offset(page)))?;
        file.write_all(&buf)?;
        tracing::trace!(page, "wrote page");
        Ok(())
    }

    fn allocate(&self) -> Result<PageId> {
        if self.read_only {
            return Err(ArchiveError::ReadOnlyViolation);
        }
        Ok(self.next_page.fetch_add(1, Ordering::SeqCst))
    }

    fn page_count(&self) -> u64 {
        self.next_page.load(Ordering::SeqCst)
    }

    fn flush(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
