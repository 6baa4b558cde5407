//! Leaf page format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (16 bytes)                                            │
//! │   Magic (1) | KeyEnc (1) | ValueEnc (1) | Reserved (1)       │
//! │   Count: u32 | PayloadLen: u32 | PayloadCRC: u32             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload: [key][value] repeated, each relative to the one     │
//! │ before it on this page                                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use crate::encoding::{read_u32_le, read_u8, Codec, EncodingKind};
use crate::error::{ArchiveError, Result};
use crate::types::{Key, Value};

pub(crate) const LEAF_MAGIC: u8 = 0xB7;
pub(crate) const LEAF_HEADER_SIZE: usize = 16;

/// Encode `entries` into a page image, or `None` if they do not fit
pub(crate) fn encode_leaf(
    entries: &[(Key, Value)],
    key_encoding: EncodingKind,
    value_encoding: EncodingKind,
    page_size: usize,
) -> Option<Vec<u8>> {
    let key_codec = key_encoding.key_codec();
    let value_codec = value_encoding.value_codec();

    let mut image = Vec::with_capacity(page_size);
    image.resize(LEAF_HEADER_SIZE, 0);

    let mut prev: Option<&(Key, Value)> = None;
    for entry in entries {
        key_codec.encode(prev.map(|p| &p.0), &entry.0, &mut image);
        value_codec.encode(prev.map(|p| &p.1), &entry.1, &mut image);
        if image.len() > page_size {
            return None;
        }
        prev = Some(entry);
    }

    let payload_len = (image.len() - LEAF_HEADER_SIZE) as u32;
    let crc = crc32fast::hash(&image[LEAF_HEADER_SIZE..]);

    image[0] = LEAF_MAGIC;
    image[1] = key_encoding as u8;
    image[2] = value_encoding as u8;
    image[4..8].copy_from_slice(&(entries.len() as u32).to_le_bytes());
    image[8..12].copy_from_slice(&payload_len.to_le_bytes());
    image[12..16].copy_from_slice(&crc.to_le_bytes());
    Some(image)
}

/// Lazy, forward-only decoder over one leaf page
pub(crate) struct LeafReader {
    image: Vec<u8>,
    end: usize,
    pos: usize,
    remaining: u32,
    key_codec: &'static dyn Codec<Key>,
    value_codec: &'static dyn Codec<Value>,
    prev: Option<(Key, Value)>,
}

impl LeafReader {
    /// Validate the header of `image` and position before the first entry
    pub(crate) fn open(
        image: Vec<u8>,
        key_encoding: EncodingKind,
        value_encoding: EncodingKind,
    ) -> Result<Self> {
        if read_u8(&image, 0)? != LEAF_MAGIC {
            return Err(ArchiveError::Corruption(format!(
                "bad leaf magic 0x{:02x}",
                image[0]
            )));
        }
        let page_key = EncodingKind::from_u8(read_u8(&image, 1)?)?;
        let page_value = EncodingKind::from_u8(read_u8(&image, 2)?)?;
        if page_key != key_encoding || page_value != value_encoding {
            return Err(ArchiveError::Corruption(format!(
                "leaf encoded as {:?}/{:?}, stream expects {:?}/{:?}",
                page_key, page_value, key_encoding, value_encoding
            )));
        }

        let count = read_u32_le(&image, 4)?;
        let payload_len = read_u32_le(&image, 8)? as usize;
        let crc = read_u32_le(&image, 12)?;
        let end = LEAF_HEADER_SIZE + payload_len;
        if end > image.len() {
            return Err(ArchiveError::Corruption(format!(
                "leaf payload of {} bytes overruns page",
                payload_len
            )));
        }
        if crc32fast::hash(&image[LEAF_HEADER_SIZE..end]) != crc {
            return Err(ArchiveError::Corruption("leaf checksum mismatch".to_string()));
        }

        Ok(Self {
            image,
            end,
            pos: LEAF_HEADER_SIZE,
            remaining: count,
            key_codec: key_encoding.key_codec(),
            value_codec: value_encoding.value_codec(),
            prev: None,
        })
    }

    /// Decode the next entry, or `None` once the page is exhausted
    pub(crate) fn next_entry(&mut self) -> Result<Option<(Key, Value)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let input = &self.image[self.pos..self.end];
        let prev_key = self.prev.as_ref().map(|p| &p.0);
        let prev_value = self.prev.as_ref().map(|p| &p.1);

        let (key, key_len) = self.key_codec.decode(prev_key, input)?;
        let (value, value_len) = self.value_codec.decode(prev_value, &input[key_len..])?;

        self.pos += key_len + value_len;
        self.remaining -= 1;
        self.prev = Some((key, value));
        Ok(Some((key, value)))
    }

    pub(crate) fn read_all(mut self) -> Result<Vec<(Key, Value)>> {
        let mut entries = Vec::with_capacity(self.remaining as usize);
        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }
}
