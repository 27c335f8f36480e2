//! Immutable, sorted, on-disk run with an index and an optional Bloom filter.
//!
//! # On-disk layout
//!
//! ```text
//! [data record][data record]...            ascending key order
//! [bloom size u32 be][bloom bytes]          optional
//! [entry_count u32 be]
//! [key_len u32 be][key][data_offset u64 be] x entry_count
//! [index_offset u64 be][bloom_offset u64 be][magic 8 bytes]   <- last 24 bytes
//! ```
//!
//! Each data record is `[key_len u32 be][value_len u32 be][key][value]`; an
//! empty value is a tombstone. `bloom_offset == 0` means the file carries no
//! Bloom filter. All multi-byte integers in the data and index regions are
//! big-endian; the Bloom filter's own header is little-endian (spec'd split,
//! kept for cross-format fidelity rather than collapsed to one endianness).

pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

pub use builder::{SstInfo, SstWriter};
pub use iterator::RangeIter;

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use thiserror::Error;
use tracing::warn;

use crate::bloom::BloomFilter;

/// 8-byte ASCII marker written as the last 8 bytes of every SSTable file.
pub const MAGIC: [u8; 8] = *b"AETNSST1";

/// Fixed footer size: `index_offset(8) + bloom_offset(8) + magic(8)`.
pub const FOOTER_SIZE: usize = 24;

/// Errors produced while building or reading an SSTable.
#[derive(Debug, Error)]
pub enum SSTableError {
    /// Underlying I/O error.
    #[error("sstable io error: {0}")]
    Io(#[from] io::Error),

    /// The file is too short, its magic does not match, or a region is
    /// truncated/out of bounds. The file should be treated as unreadable.
    #[error("corrupt sstable: {0}")]
    Corrupt(String),
}

/// An immutable, memory-mapped reader over one SSTable file.
///
/// Thread-safe for concurrent reads: the mmap is read-only and the parsed
/// index is built once at open time.
pub struct SstReader {
    path: PathBuf,
    mmap: Mmap,
    /// Ascending `(key, data_offset)` pairs, one per record.
    index: Vec<(Vec<u8>, u64)>,
    bloom: Option<BloomFilter>,
}

impl SstReader {
    /// Opens `path`, validates the footer magic, and loads the index (and
    /// Bloom filter, if present) into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SSTableError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // SAFETY: SSTable files are never mutated after creation; the mmap
        // is read-only and outlives no writer.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < FOOTER_SIZE {
            return Err(SSTableError::Corrupt("file shorter than footer".into()));
        }

        let footer_start = mmap.len() - FOOTER_SIZE;
        let footer = &mmap[footer_start..];
        let index_offset = u64::from_be_bytes(footer[0..8].try_into().unwrap());
        let bloom_offset = u64::from_be_bytes(footer[8..16].try_into().unwrap());
        let magic: [u8; 8] = footer[16..24].try_into().unwrap();

        if magic != MAGIC {
            return Err(SSTableError::Corrupt("magic mismatch".into()));
        }

        let index = Self::read_index(&mmap, index_offset, footer_start)?;

        let bloom = if bloom_offset == 0 {
            None
        } else {
            match Self::read_bloom(&mmap, bloom_offset, index_offset) {
                Ok(filter) => Some(filter),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "disabling malformed bloom filter");
                    None
                }
            }
        };

        Ok(Self {
            path,
            mmap,
            index,
            bloom,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total on-disk byte size of this file.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Number of records (including tombstones) indexed in this file.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the file carries no records.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Smallest key in the file, if any.
    pub fn smallest_key(&self) -> Option<&[u8]> {
        self.index.first().map(|(k, _)| k.as_slice())
    }

    /// Largest key in the file, if any.
    pub fn largest_key(&self) -> Option<&[u8]> {
        self.index.last().map(|(k, _)| k.as_slice())
    }

    fn read_index(
        mmap: &Mmap,
        index_offset: u64,
        region_end: usize,
    ) -> Result<Vec<(Vec<u8>, u64)>, SSTableError> {
        let start = index_offset as usize;
        if start > region_end {
            return Err(SSTableError::Corrupt("index offset out of range".into()));
        }
        let region = &mmap[start..region_end];
        if region.len() < 4 {
            return Err(SSTableError::Corrupt("truncated index count".into()));
        }
        let count = u32::from_be_bytes(region[0..4].try_into().unwrap()) as usize;
        let mut pos = 4;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            if pos + 4 > region.len() {
                return Err(SSTableError::Corrupt("truncated index entry".into()));
            }
            let key_len = u32::from_be_bytes(region[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            if pos + key_len + 8 > region.len() {
                return Err(SSTableError::Corrupt("truncated index entry".into()));
            }
            let key = region[pos..pos + key_len].to_vec();
            pos += key_len;
            let data_offset = u64::from_be_bytes(region[pos..pos + 8].try_into().unwrap());
            pos += 8;
            out.push((key, data_offset));
        }
        Ok(out)
    }

    fn read_bloom(
        mmap: &Mmap,
        bloom_offset: u64,
        region_end: u64,
    ) -> Result<BloomFilter, SSTableError> {
        let start = bloom_offset as usize;
        let end = region_end as usize;
        if start > end || end > mmap.len() {
            return Err(SSTableError::Corrupt("bloom offset out of range".into()));
        }
        let region = &mmap[start..end];
        if region.len() < 4 {
            return Err(SSTableError::Corrupt("truncated bloom size".into()));
        }
        let size = u32::from_be_bytes(region[0..4].try_into().unwrap()) as usize;
        if 4 + size > region.len() {
            return Err(SSTableError::Corrupt("truncated bloom body".into()));
        }
        BloomFilter::deserialize(&region[4..4 + size])
            .map_err(|e| SSTableError::Corrupt(format!("bloom: {e}")))
    }

    /// Reads the `(key, value)` record at `data_offset` and verifies the
    /// on-disk key matches `expected_key` (defense against index corruption).
    fn read_record_at(
        &self,
        data_offset: u64,
        expected_key: &[u8],
    ) -> Result<Vec<u8>, SSTableError> {
        let start = data_offset as usize;
        let buf = &self.mmap[..];
        if start + 8 > buf.len() {
            return Err(SSTableError::Corrupt("truncated record header".into()));
        }
        let key_len = u32::from_be_bytes(buf[start..start + 4].try_into().unwrap()) as usize;
        let value_len = u32::from_be_bytes(buf[start + 4..start + 8].try_into().unwrap()) as usize;
        let key_start = start + 8;
        let value_start = key_start + key_len;
        let value_end = value_start + value_len;
        if value_end > buf.len() {
            return Err(SSTableError::Corrupt("truncated record body".into()));
        }
        let key = &buf[key_start..value_start];
        if key != expected_key {
            return Err(SSTableError::Corrupt(
                "index key does not match on-disk key".into(),
            ));
        }
        Ok(buf[value_start..value_end].to_vec())
    }

    /// Looks up `key`. `Some(value)` is returned for both live values and
    /// tombstones (an empty `value`); `None` means the key is absent from
    /// this file entirely.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SSTableError> {
        if let Some(bloom) = &self.bloom
            && !bloom.may_contain(key)
        {
            return Ok(None);
        }

        match self.index.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
            Ok(i) => {
                let (_, offset) = &self.index[i];
                Ok(Some(self.read_record_at(*offset, key)?))
            }
            Err(_) => Ok(None),
        }
    }

    /// Ascending `(key, value)` iterator over `lo <= key <= hi` (either
    /// bound optional). Tombstones are yielded as empty values; callers
    /// filter those out at the layer that understands recency.
    pub fn range<'a>(&'a self, lo: Option<&[u8]>, hi: Option<&[u8]>) -> RangeIter<'a> {
        RangeIter::new(self, lo, hi)
    }
}

#[cfg(test)]
pub(crate) fn test_mmap_len(reader: &SstReader) -> usize {
    reader.mmap.len()
}
