//! Page Store Module
//!
//! Fixed-size, position-addressed block I/O against one backing medium.
//!
//! ## Contract
//! - `write_page` of a single page is assumed atomic; multi-page writes are not
//! - `allocate` reserves a location past everything handed out so far
//! - `flush` returns only once every prior write is durable
//!
//! Page 0 and page 1 are reserved for the archive header slots.

mod file;
mod memory;

use crate::error::Result;
use crate::types::PageId;

pub use file::FilePageStore;
pub use memory::MemoryPageStore;

/// Pages reserved at the start of every archive (two header slots)
pub const RESERVED_PAGES: u64 = 2;

/// Raw page I/O the archive core is built on
pub trait PageStore: Send + Sync {
    /// Fixed size of every page in bytes
    fn page_size(&self) -> usize;

    /// Read the full page at `page`
    fn read_page(&self, page: PageId) -> Result<Vec<u8>>;

    /// Write `data` (at most one page; shorter input is zero-padded)
    fn write_page(&self, page: PageId, data: &[u8]) -> Result<()>;

    /// Reserve a never-used page location
    fn allocate(&self) -> Result<PageId>;

    /// Locations handed out or present so far; `allocate` never returns less
    fn page_count(&self) -> u64;

    /// Make every preceding write durable
    fn flush(&self) -> Result<()>;

    fn is_read_only(&self) -> bool;
}
