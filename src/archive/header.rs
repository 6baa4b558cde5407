//! Archive header slots
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ Header (48 bytes, at the start of page 0 and of page 1)       │
//! │   Magic "TSAR" (4) | Format: u16 (2) | Reserved (2)           │
//! │   ByteOrderMark: u32 (4) | PageSize: u32 (4)                  │
//! │   Version: u64 (8) | TablePage: u64 (8) | TableLen: u64 (8)   │
//! │   TableCRC: u32 (4) | HeaderCRC: u32 (4)                      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Version `n` is written to slot `n % 2`, so the previous header survives a
//! torn write of the next one. Opening tries the valid slots newest first.

use std::path::Path;

use crate::config::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::encoding::{read_u32_le, read_u64_le};
use crate::error::{ArchiveError, Result};
use crate::page::{FilePageStore, PageStore};
use crate::types::PageId;

pub(crate) const MAGIC: &[u8; 4] = b"TSAR";

pub(crate) const FORMAT_VERSION: u16 = 1;

/// Written little-endian; reads back as `BYTE_ORDER_SWAPPED` on a file
/// produced with the opposite byte order
pub(crate) const BYTE_ORDER_MARK: u32 = 0x0102_0304;
const BYTE_ORDER_SWAPPED: u32 = 0x0403_0201;

pub(crate) const HEADER_SIZE: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub page_size: u32,
    pub version: u64,
    pub table_page: PageId,
    pub table_len: u64,
    pub table_crc: u32,
}

impl Header {
    /// Slot page a header for `version` is written to
    pub(crate) fn slot(version: u64) -> PageId {
        version % 2
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&[0u8; 2]);
        buf.extend_from_slice(&BYTE_ORDER_MARK.to_le_bytes());
        buf.extend_from_slice(&self.page_size.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.table_page.to_le_bytes());
        buf.extend_from_slice(&self.table_len.to_le_bytes());
        buf.extend_from_slice(&self.table_crc.to_le_bytes());
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        let page_size = validate_prefix(bytes)?;

        let crc = read_u32_le(bytes, 44)?;
        if crc32fast::hash(&bytes[..44]) != crc {
            return Err(ArchiveError::Corruption("header checksum mismatch".to_string()));
        }

        Ok(Self {
            page_size,
            version: read_u64_le(bytes, 16)?,
            table_page: read_u64_le(bytes, 24)?,
            table_len: read_u64_le(bytes, 32)?,
            table_crc: read_u32_le(bytes, 40)?,
        })
    }

    /// Read the page size of an archive file before it is opened.
    ///
    /// Slot 1 starts one page in, so when slot 0 is damaged every supported
    /// page size is tried as its offset.
    pub(crate) fn probe_page_size(path: &Path) -> Result<usize> {
        let prefix = FilePageStore::read_prefix(path, MAX_PAGE_SIZE + HEADER_SIZE)?;
        if prefix.len() < HEADER_SIZE {
            return Err(ArchiveError::IncompatibleFormat(format!(
                "file is {} bytes, too short for an archive header",
                prefix.len()
            )));
        }

        let slot0 = match Header::decode(&prefix[..HEADER_SIZE]) {
            Ok(header) => return Ok(header.page_size as usize),
            Err(e) => e,
        };

        let mut page_size = MIN_PAGE_SIZE;
        while page_size <= MAX_PAGE_SIZE {
            if let Some(bytes) = prefix.get(page_size..page_size + HEADER_SIZE) {
                if let Ok(header) = Header::decode(bytes) {
                    if header.page_size as usize == page_size {
                        tracing::debug!(error = %slot0, page_size, "slot 0 unusable, sized from slot 1");
                        return Ok(page_size);
                    }
                }
            }
            page_size *= 2;
        }

        // A slot 0 with only a bad checksum still names its page size
        match validate_prefix(&prefix[..HEADER_SIZE]) {
            Ok(page_size) => Ok(page_size as usize),
            Err(_) => Err(slot0),
        }
    }

    /// Structurally valid headers among the two slots, newest first
    pub(crate) fn read_candidates(store: &dyn PageStore) -> Result<Vec<Self>> {
        let mut found: Vec<Header> = Vec::with_capacity(2);
        let mut first_error = None;

        for slot in 0..2 {
            let decoded = store.read_page(slot).and_then(|page| Header::decode(&page));
            match decoded {
                Ok(header) if Header::slot(header.version) != slot => {
                    tracing::warn!(slot, version = header.version, "header found in wrong slot");
                }
                Ok(header) => found.push(header),
                Err(e) => {
                    tracing::debug!(slot, error = %e, "header slot unusable");
                    // Format mismatches are reported in preference to torn slots
                    if first_error.is_none() || matches!(e, ArchiveError::IncompatibleFormat(_)) {
                        first_error = Some(e);
                    }
                }
            }
        }

        found.sort_unstable_by(|a, b| b.version.cmp(&a.version));
        match (found.is_empty(), first_error) {
            (false, _) => Ok(found),
            (true, Some(e)) => Err(e),
            (true, None) => Err(ArchiveError::Corruption("no valid header slot".to_string())),
        }
    }
}

/// Check magic, format version and byte order; returns the page size
fn validate_prefix(bytes: &[u8]) -> Result<u32> {
    if bytes.len() < HEADER_SIZE {
        return Err(ArchiveError::Corruption(format!(
            "header truncated to {} bytes",
            bytes.len()
        )));
    }
    if &bytes[0..4] != MAGIC {
        return Err(ArchiveError::IncompatibleFormat(format!(
            "invalid magic: expected TSAR, got {:?}",
            &bytes[0..4]
        )));
    }

    let mark = read_u32_le(bytes, 8)?;
    if mark == BYTE_ORDER_SWAPPED {
        return Err(ArchiveError::IncompatibleFormat(
            "archive was written with the opposite byte order".to_string(),
        ));
    }
    if mark != BYTE_ORDER_MARK {
        return Err(ArchiveError::IncompatibleFormat(format!(
            "invalid byte order mark 0x{:08x}",
            mark
        )));
    }

    let format = u16::from_le_bytes([bytes[4], bytes[5]]);
    if format != FORMAT_VERSION {
        return Err(ArchiveError::IncompatibleFormat(format!(
            "unsupported format version {}",
            format
        )));
    }

    let page_size = read_u32_le(bytes, 12)?;
    if !page_size.is_power_of_two() || (page_size as usize) < HEADER_SIZE {
        return Err(ArchiveError::IncompatibleFormat(format!(
            "invalid page size {}",
            page_size
        )));
    }
    Ok(page_size)
}
